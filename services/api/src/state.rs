//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the database pool, the directive channel and
//! service clients.

use crate::config::Config;
use crate::db::Db;
use std::sync::Arc;
use vidya_core::{
    channel::DirectiveChannel, curriculum::CurriculumProvider, llm_client::LLMClient,
};

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    /// Routes display directives to each session's visual socket.
    pub channel: DirectiveChannel,
    pub curriculum: Arc<dyn CurriculumProvider>,
    pub llm_client: Arc<dyn LLMClient>,
    pub config: Arc<Config>,
}
