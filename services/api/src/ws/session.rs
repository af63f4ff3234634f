//! Manages the session WebSocket lifecycle for one participant.

use super::{
    cycle::ToolCycleEngine,
    protocol::{ClientMessage, ServerMessage},
};
use crate::state::AppState;
use anyhow::{Result, anyhow, bail};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use rmcp::ServiceExt;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{Instrument, error, info, instrument, warn};
use uuid::Uuid;
use vidya_core::{
    Command,
    conversation::{Mode, SessionEvent},
    error::SessionError,
    orchestrator::{Collaborators, SessionOrchestrator},
    progress::{ProgressService, ProgressUpdate},
};

/// Queued participant utterances awaiting their turn.
const EVENT_BUFFER: usize = 32;
/// Progress updates a single turn may produce before the tool service waits.
const PROGRESS_BUFFER: usize = 32;

type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual session connection.
///
/// The first frame must be an `init` message naming the participant. After
/// that the socket carries participant utterances in and spoken text out
/// until either side closes it.
#[instrument(name = "ws_session", skip_all, fields(session_id, participant_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("New WebSocket connection. Awaiting initialization...");

    let (socket_tx, mut socket_rx) = socket.split();
    let socket_tx: SharedSink = Arc::new(Mutex::new(socket_tx));

    let init = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => parse_init(&text),
        Some(Ok(_)) => Err(anyhow!("First message was not a text `init` message.")),
        _ => {
            info!("Client disconnected before sending init message.");
            return;
        }
    };
    let (participant_id, session_id) = match init {
        Ok(ids) => ids,
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = send_msg(
                &mut *socket_tx.lock().await,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };
    let span = tracing::Span::current();
    span.record("session_id", &session_id.to_string());
    span.record("participant_id", participant_id.as_str());

    if let Err(e) = run_session(state, socket_tx.clone(), socket_rx, participant_id, session_id).await
    {
        error!(error = ?e, "Session terminated with error.");
        let _ = send_msg(
            &mut *socket_tx.lock().await,
            ServerMessage::Error {
                message: e.to_string(),
            },
        )
        .await;
    }
    info!("Session finished.");
}

/// Parses the `init` message into a participant id and session id.
fn parse_init(init_text: &str) -> Result<(String, Uuid)> {
    match serde_json::from_str::<ClientMessage>(init_text)? {
        ClientMessage::Init {
            participant_id,
            session_id,
        } => {
            let participant_id = participant_id.trim().to_string();
            if participant_id.is_empty() {
                bail!("`participant_id` must not be empty");
            }
            Ok((participant_id, session_id.unwrap_or_else(Uuid::new_v4)))
        }
        _ => Err(anyhow!("First message must be `init`")),
    }
}

/// The main event loop for an initialized session.
///
/// Socket reads stay responsive while a turn is generating: turns run on a
/// separate worker, and closing the socket cancels whatever it is doing.
async fn run_session(
    state: Arc<AppState>,
    socket_tx: SharedSink,
    mut socket_rx: SplitStream<WebSocket>,
    participant_id: String,
    session_id: Uuid,
) -> Result<()> {
    let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_BUFFER);
    let progress_service =
        ProgressService::new(participant_id.clone(), state.db.clone(), Some(progress_tx));
    let (server_transport, client_transport) = tokio::io::duplex(4096);

    // Spawn the session's progress tool service.
    let tool_handle = tokio::spawn(async move {
        if let Ok(service) = progress_service.serve(server_transport).await {
            let _ = service.waiting().await;
        }
    });
    let mcp_client = ().serve(client_transport).await?;

    let deps = Collaborators {
        profiles: state.db.clone(),
        summaries: state.db.clone(),
        curriculum: state.curriculum.clone(),
        engine: Arc::new(ToolCycleEngine::new(state.llm_client.clone(), mcp_client)),
        channel: state.channel.clone(),
    };
    let orchestrator = SessionOrchestrator::new(session_id.to_string(), participant_id, deps);
    let cancel = orchestrator.cancellation_token();
    let orchestrator = Arc::new(Mutex::new(orchestrator));

    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    event_tx.send(SessionEvent::Connect).await?;
    let mut turns = tokio::spawn(
        run_turns(
            orchestrator.clone(),
            event_rx,
            progress_rx,
            socket_tx.clone(),
            session_id,
        )
        .in_current_span(),
    );

    let mut outcome = Ok(());
    let mut turns_finished = false;
    loop {
        tokio::select! {
            msg = socket_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::UserMessage { text }) => {
                        if event_tx.send(SessionEvent::UserSpeech(text)).await.is_err() {
                            break;
                        }
                    }
                    Ok(ClientMessage::Init { .. }) => warn!("Ignoring repeated `init` message."),
                    Err(e) => warn!(error = %e, "Ignoring unparseable client message."),
                },
                Some(Ok(Message::Binary(_))) => warn!("Ignoring binary frame on the session socket."),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client closed the session socket.");
                    break;
                }
                Some(Err(e)) => {
                    error!("Error receiving from client WebSocket: {:?}", e);
                    break;
                }
            },
            result = &mut turns => {
                turns_finished = true;
                outcome = match result {
                    Ok(result) => result,
                    Err(e) => Err(anyhow!("Turn worker panicked: {e}")),
                };
                break;
            }
        }
    }

    // Abort any generation in flight before tearing the session down.
    cancel.cancel();
    drop(event_tx);
    if !turns_finished {
        match turns.await {
            Ok(Err(e)) => warn!(error = ?e, "Turn worker failed during shutdown"),
            Err(e) => error!("Turn worker panicked: {e}"),
            Ok(Ok(())) => {}
        }
    }

    let commands = orchestrator.lock().await.disconnect().await;
    // The client may already be gone.
    let _ = deliver(&socket_tx, commands).await;
    tool_handle.abort();
    info!("WebSocket connection closed and session terminated.");
    outcome
}

/// Feeds queued events through the orchestrator one turn at a time.
async fn run_turns(
    orchestrator: Arc<Mutex<SessionOrchestrator>>,
    mut events: mpsc::Receiver<SessionEvent>,
    mut progress: mpsc::Receiver<ProgressUpdate>,
    socket_tx: SharedSink,
    session_id: Uuid,
) -> Result<()> {
    while let Some(event) = events.recv().await {
        let connecting = matches!(event, SessionEvent::Connect);
        let mut session = orchestrator.lock().await;
        let result = session.handle_event(event).await;
        // Tools only run inside a turn, so every update is queued by now.
        while let Ok(update) = progress.try_recv() {
            session.apply_progress(update).await;
        }
        let participant_id = session.participant_id().to_string();
        let mode = session.mode();
        drop(session);

        match result {
            Ok(commands) => {
                if connecting && let Some(mode) = mode {
                    send_msg(
                        &mut *socket_tx.lock().await,
                        ServerMessage::Initialized {
                            session_id,
                            participant_id,
                            mode,
                        },
                    )
                    .await?;
                }
                deliver(&socket_tx, commands).await?;
            }
            Err(SessionError::Cancelled) => break,
            Err(e) if connecting => return Err(e.into()),
            Err(e) => {
                warn!(error = ?e, "Turn failed");
                send_msg(
                    &mut *socket_tx.lock().await,
                    ServerMessage::Error {
                        message: e.to_string(),
                    },
                )
                .await?;
            }
        }
    }
    Ok(())
}

fn to_server_message(command: Command) -> ServerMessage {
    match command {
        Command::SpeakText(text) => ServerMessage::AssistantText { text },
        Command::EnterTeaching(name) => ServerMessage::ModeChanged {
            mode: Mode::Teaching,
            name,
        },
        Command::SessionComplete(summary) => ServerMessage::SessionComplete { summary },
    }
}

async fn deliver(socket_tx: &SharedSink, commands: Vec<Command>) -> Result<()> {
    let mut sink = socket_tx.lock().await;
    for command in commands {
        send_msg(&mut sink, to_server_message(command)).await?;
    }
    Ok(())
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_init() {
        let session_id = Uuid::new_v4();
        let text = format!(
            r#"{{"type":"init","participant_id":" learner-1 ","session_id":"{session_id}"}}"#
        );
        assert_eq!(
            parse_init(&text).unwrap(),
            ("learner-1".to_string(), session_id)
        );

        let (_, generated) = parse_init(r#"{"type":"init","participant_id":"learner-1"}"#).unwrap();
        assert!(!generated.is_nil());
    }

    #[test]
    fn test_parse_init_rejects_other_first_messages() {
        assert!(parse_init(r#"{"type":"user_message","text":"hi"}"#).is_err());
        assert!(parse_init(r#"{"type":"init","participant_id":"  "}"#).is_err());
        assert!(parse_init("not json").is_err());
    }

    #[test]
    fn test_commands_map_to_server_messages() {
        assert_eq!(
            to_server_message(Command::SpeakText("Namaste".into())),
            ServerMessage::AssistantText {
                text: "Namaste".into()
            }
        );
        assert_eq!(
            to_server_message(Command::EnterTeaching("Ravi".into())),
            ServerMessage::ModeChanged {
                mode: Mode::Teaching,
                name: "Ravi".into()
            }
        );
        assert_eq!(
            to_server_message(Command::SessionComplete("done".into())),
            ServerMessage::SessionComplete {
                summary: "done".into()
            }
        );
    }
}
