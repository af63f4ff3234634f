//! The tool-calling generation engine behind a live session.
//!
//! Each turn asks the LLM to either answer or call progress tools. Tool calls
//! are executed against the session's MCP tool service and their results fed
//! back for a final, streamed answer.

use anyhow::{Context, Result};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionTool, ChatCompletionToolArgs, FunctionObjectArgs,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use rmcp::{
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
};
use std::sync::Arc;
use tracing::debug;
use vidya_core::{
    conversation::Turn,
    llm_client::{GenerationEngine, LLMAction, LLMClient, LLMStreamEvent, ToolCall, to_chat_messages},
};

pub struct ToolCycleEngine {
    llm_client: Arc<dyn LLMClient>,
    mcp_client: RunningService<RoleClient, ()>,
}

impl ToolCycleEngine {
    pub fn new(llm_client: Arc<dyn LLMClient>, mcp_client: RunningService<RoleClient, ()>) -> Self {
        Self {
            llm_client,
            mcp_client,
        }
    }

    async fn tools(&self) -> Result<Vec<ChatCompletionTool>> {
        self.mcp_client
            .list_all_tools()
            .await?
            .into_iter()
            .map(|t| {
                Ok(ChatCompletionToolArgs::default()
                    .function(
                        FunctionObjectArgs::default()
                            .name(t.name)
                            .description(t.description.unwrap_or_default())
                            .parameters(serde_json::to_value(&*t.input_schema)?)
                            .build()?,
                    )
                    .build()?)
            })
            .collect()
    }

    async fn call_tool(&self, call: &ToolCall) -> Result<String> {
        let arguments = if call.function.arguments.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(&call.function.arguments)?)
        };
        let result = self
            .mcp_client
            .peer()
            .call_tool(CallToolRequestParam {
                name: call.function.name.clone().into(),
                arguments,
            })
            .await?;

        let annotated_content = result
            .content
            .context("Tool call returned no content")?
            .pop()
            .context("Content list was empty")?;
        Ok(match annotated_content.raw {
            RawContent::Text(text_content) => text_content.text,
            _ => "{\"error\": \"Unexpected content type from tool\"}".to_string(),
        })
    }
}

#[async_trait]
impl GenerationEngine for ToolCycleEngine {
    async fn generate(&self, context: &str, history: &[Turn]) -> Result<String> {
        let messages = to_chat_messages(history)?;
        let tools = self.tools().await?;

        let tool_calls = match self
            .llm_client
            .decide_action(context.to_string(), messages.clone(), tools)
            .await?
        {
            LLMAction::TextResponse(text) => return Ok(text),
            LLMAction::ToolCall(tool_calls) => tool_calls,
        };

        let mut history_with_tools = messages;
        history_with_tools.push(
            ChatCompletionRequestAssistantMessageArgs::default()
                .tool_calls(tool_calls.clone())
                .build()?
                .into(),
        );
        for call in &tool_calls {
            debug!(tool = %call.function.name, "Calling progress tool");
            // Tool failures go back to the model as text so it can recover.
            let result = self
                .call_tool(call)
                .await
                .unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"));
            history_with_tools.push(
                ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(call.id.clone())
                    .content(result)
                    .build()?
                    .into(),
            );
        }

        let mut final_stream = self
            .llm_client
            .stream_after_tools(context.to_string(), history_with_tools)
            .await?;
        let mut full_response = String::new();
        // A partial answer is never spoken; any failed chunk fails the turn.
        while let Some(event_result) = final_stream.next().await {
            let LLMStreamEvent::TextChunk(chunk) =
                event_result.context("Answer stream failed after tool calls")?;
            full_response.push_str(&chunk);
        }
        Ok(full_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::returning_profile;
    use anyhow::anyhow;
    use async_openai::error::OpenAIError;
    use async_openai::types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestMessage, ChatCompletionToolType,
        FunctionCall,
    };
    use futures_util::stream;
    use rmcp::ServiceExt;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use vidya_core::{
        llm_client::LLMStream,
        progress::{ProgressChange, ProgressService},
        store::{InMemoryStore, ProfileStore},
    };

    /// Calls `award_points` once, then answers from the stream.
    #[derive(Default)]
    struct AwardingClient {
        seen_tools: Mutex<Vec<String>>,
        after_tools: Mutex<Vec<ChatCompletionRequestMessage>>,
    }

    #[async_trait]
    impl LLMClient for AwardingClient {
        async fn decide_action(
            &self,
            _system_prompt: String,
            _history: Vec<ChatCompletionRequestMessage>,
            tools: Vec<ChatCompletionTool>,
        ) -> Result<LLMAction> {
            *self.seen_tools.lock().unwrap() = tools.into_iter().map(|t| t.function.name).collect();
            Ok(LLMAction::ToolCall(vec![ChatCompletionMessageToolCall {
                id: "call_1".into(),
                r#type: ChatCompletionToolType::Function,
                function: FunctionCall {
                    name: "award_points".into(),
                    arguments: r#"{"points":2,"reason":"read the letter A"}"#.into(),
                },
            }]))
        }

        async fn stream_after_tools(
            &self,
            _system_prompt: String,
            history: Vec<ChatCompletionRequestMessage>,
        ) -> Result<LLMStream> {
            *self.after_tools.lock().unwrap() = history;
            Ok(stream::iter(vec![
                Ok(LLMStreamEvent::TextChunk("Well ".into())),
                Ok(LLMStreamEvent::TextChunk("done!".into())),
            ])
            .boxed())
        }
    }

    /// Calls `get_learner_profile`, then breaks off mid-answer.
    struct TruncatingClient;

    #[async_trait]
    impl LLMClient for TruncatingClient {
        async fn decide_action(
            &self,
            _system_prompt: String,
            _history: Vec<ChatCompletionRequestMessage>,
            _tools: Vec<ChatCompletionTool>,
        ) -> Result<LLMAction> {
            Ok(LLMAction::ToolCall(vec![ChatCompletionMessageToolCall {
                id: "call_1".into(),
                r#type: ChatCompletionToolType::Function,
                function: FunctionCall {
                    name: "get_learner_profile".into(),
                    arguments: "{}".into(),
                },
            }]))
        }

        async fn stream_after_tools(
            &self,
            _system_prompt: String,
            _history: Vec<ChatCompletionRequestMessage>,
        ) -> Result<LLMStream> {
            Ok(stream::iter(vec![
                Ok(LLMStreamEvent::TextChunk("This is the letter".into())),
                Err(OpenAIError::StreamError("connection reset".into())),
            ])
            .boxed())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl LLMClient for FailingClient {
        async fn decide_action(
            &self,
            _system_prompt: String,
            _history: Vec<ChatCompletionRequestMessage>,
            _tools: Vec<ChatCompletionTool>,
        ) -> Result<LLMAction> {
            Err(anyhow!("provider unavailable"))
        }

        async fn stream_after_tools(
            &self,
            _system_prompt: String,
            _history: Vec<ChatCompletionRequestMessage>,
        ) -> Result<LLMStream> {
            Err(anyhow!("provider unavailable"))
        }
    }

    async fn mcp_client(
        store: InMemoryStore,
        updates: mpsc::Sender<vidya_core::progress::ProgressUpdate>,
    ) -> RunningService<RoleClient, ()> {
        let service = ProgressService::new("learner-1", Arc::new(store), Some(updates));
        let (server_transport, client_transport) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            if let Ok(service) = service.serve(server_transport).await {
                let _ = service.waiting().await;
            }
        });
        ().serve(client_transport).await.unwrap()
    }

    #[tokio::test]
    async fn test_tool_calls_run_before_the_final_answer() {
        let store = InMemoryStore::new();
        store.save_profile(&returning_profile("learner-1")).await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let client = Arc::new(AwardingClient::default());
        let engine = ToolCycleEngine::new(client.clone(), mcp_client(store.clone(), tx).await);

        let reply = engine
            .generate("Teach literacy.", &[Turn::user("A")])
            .await
            .unwrap();
        assert_eq!(reply, "Well done!");

        let tools = client.seen_tools.lock().unwrap().clone();
        assert!(tools.contains(&"award_points".to_string()));
        assert!(tools.contains(&"set_level".to_string()));

        // user turn, assistant tool call, tool result
        assert_eq!(client.after_tools.lock().unwrap().len(), 3);

        let update = rx.recv().await.unwrap();
        assert_eq!(update.change, ProgressChange::PointsAwarded(2));
        assert_eq!(update.profile.points, 2);
        let stored = store.get_profile("learner-1").await.unwrap().unwrap();
        assert_eq!(stored.points, 2);
    }

    #[tokio::test]
    async fn test_truncated_answer_fails_the_turn() {
        let store = InMemoryStore::new();
        store.save_profile(&returning_profile("learner-1")).await.unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let engine = ToolCycleEngine::new(Arc::new(TruncatingClient), mcp_client(store, tx).await);

        let err = engine
            .generate("Teach literacy.", &[Turn::user("A")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Answer stream failed"));
    }

    #[tokio::test]
    async fn test_llm_failure_is_an_error() {
        let (tx, _rx) = mpsc::channel(8);
        let engine = ToolCycleEngine::new(
            Arc::new(FailingClient),
            mcp_client(InMemoryStore::new(), tx).await,
        );
        assert!(engine.generate("ctx", &[]).await.is_err());
    }
}
