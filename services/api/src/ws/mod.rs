//! WebSocket Session Management
//!
//! This module contains the real-time side of a tutoring session. It is
//! structured into submodules:
//!
//! - `protocol`: The JSON message format of the session socket.
//! - `session`: The session socket lifecycle, from `init` to disconnect.
//! - `cycle`: The tool-calling generation engine backing each session.
//! - `visual`: The display socket that receives show/hide directives.

mod cycle;
pub mod protocol;
pub mod session;
pub mod visual;

pub use session::ws_handler;
pub use visual::visual_ws_handler;
