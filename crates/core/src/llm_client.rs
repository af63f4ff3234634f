use crate::conversation::{Role, Turn};
use anyhow::{Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;

/// Represents a tool call requested by the LLM.
pub type ToolCall = async_openai::types::ChatCompletionMessageToolCall;

/// Represents the events that can be yielded from a streaming text response.
#[derive(Debug, Clone)]
pub enum LLMStreamEvent {
    TextChunk(String),
}

/// A stream of text chunks from the LLM.
pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMStreamEvent, OpenAIError>> + Send>>;

/// Represents the two possible outcomes of the LLM's initial decision-making turn.
#[derive(Debug, Clone)]
pub enum LLMAction {
    /// The LLM decided to respond directly with text.
    TextResponse(String),
    /// The LLM decided to call one or more tools.
    ToolCall(Vec<ToolCall>),
}

/// Produces the next piece of teaching text.
///
/// `context` is the instructional context for the whole session and
/// `history` the role-tagged turns so far, including orchestrator
/// instructions as system turns.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn generate(&self, context: &str, history: &[Turn]) -> Result<String>;
}

/// A generic client for interacting with an LLM.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Makes a single, non-streaming call to the LLM to decide on the next action.
    async fn decide_action(
        &self,
        system_prompt: String,
        history_with_user_message: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMAction>;

    /// Makes a streaming call to the LLM after tools have been executed.
    async fn stream_after_tools(
        &self,
        system_prompt: String,
        history_with_tool_results: Vec<ChatCompletionRequestMessage>,
    ) -> Result<LLMStream>;
}

/// Converts conversation turns into chat completion messages.
pub fn to_chat_messages(history: &[Turn]) -> Result<Vec<ChatCompletionRequestMessage>> {
    history
        .iter()
        .map(|turn| {
            let message: ChatCompletionRequestMessage = match turn.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
            };
            Ok(message)
        })
        .collect()
}

fn with_system_prompt(
    system_prompt: String,
    messages: Vec<ChatCompletionRequestMessage>,
) -> Result<Vec<ChatCompletionRequestMessage>> {
    if system_prompt.is_empty() {
        return Ok(messages);
    }
    let mut all = Vec::with_capacity(messages.len() + 1);
    all.push(
        ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt)
            .build()?
            .into(),
    );
    all.extend(messages);
    Ok(all)
}

/// An implementation of `LLMClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The specific model identifier to use for chat completions (e.g., "gpt-4o").
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn decide_action(
        &self,
        system_prompt: String,
        history_with_user_message: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMAction> {
        let messages = with_system_prompt(system_prompt, history_with_user_message)?;
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(messages);
        if !tools.is_empty() {
            args.tools(tools).tool_choice("auto");
        }
        let request = args.build()?;

        let response: CreateChatCompletionResponse = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .first()
            .ok_or_else(|| anyhow!("LLM response had no choices."))?;

        if let Some(tool_calls) = &choice.message.tool_calls {
            Ok(LLMAction::ToolCall(tool_calls.clone()))
        } else if let Some(content) = &choice.message.content {
            Ok(LLMAction::TextResponse(content.clone()))
        } else {
            Err(anyhow!(
                "LLM response had neither text content nor tool calls."
            ))
        }
    }

    async fn stream_after_tools(
        &self,
        system_prompt: String,
        history_with_tool_results: Vec<ChatCompletionRequestMessage>,
    ) -> Result<LLMStream> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(with_system_prompt(system_prompt, history_with_tool_results)?)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(request).await?;

        Ok(Box::pin(stream.filter_map(|result| async move {
            match result {
                Ok(response) => {
                    let content = response.choices.first()?.delta.content.clone()?;
                    (!content.is_empty()).then_some(Ok(LLMStreamEvent::TextChunk(content)))
                }
                Err(e) => Some(Err(e)),
            }
        })))
    }
}

/// A tool-less `GenerationEngine` that asks the LLM for plain text.
pub struct ChatEngine {
    client: Arc<dyn LLMClient>,
}

impl ChatEngine {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GenerationEngine for ChatEngine {
    async fn generate(&self, context: &str, history: &[Turn]) -> Result<String> {
        let messages = to_chat_messages(history)?;
        match self
            .client
            .decide_action(context.to_string(), messages, Vec::new())
            .await?
        {
            LLMAction::TextResponse(text) => Ok(text),
            LLMAction::ToolCall(_) => Err(anyhow!("LLM requested tools but none were offered.")),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records what it was asked.
    #[derive(Default)]
    pub struct ScriptedEngine {
        replies: Mutex<VecDeque<String>>,
        calls: Mutex<Vec<(String, Vec<Turn>)>>,
    }

    impl ScriptedEngine {
        pub fn new<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<(String, Vec<Turn>)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn last_context(&self) -> Option<String> {
            self.calls.lock().unwrap().last().map(|(c, _)| c.clone())
        }
    }

    #[async_trait]
    impl GenerationEngine for ScriptedEngine {
        async fn generate(&self, context: &str, history: &[Turn]) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((context.to_string(), history.to_vec()));
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "Very good. What comes next?".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClient(LLMAction);

    #[async_trait]
    impl LLMClient for FixedClient {
        async fn decide_action(
            &self,
            system_prompt: String,
            history: Vec<ChatCompletionRequestMessage>,
            tools: Vec<ChatCompletionTool>,
        ) -> Result<LLMAction> {
            assert_eq!(system_prompt, "context");
            assert_eq!(history.len(), 3);
            assert!(tools.is_empty());
            Ok(self.0.clone())
        }

        async fn stream_after_tools(
            &self,
            _system_prompt: String,
            _history: Vec<ChatCompletionRequestMessage>,
        ) -> Result<LLMStream> {
            Err(anyhow!("not used"))
        }
    }

    fn history() -> Vec<Turn> {
        vec![
            Turn::system("Ask question 1."),
            Turn::assistant("What is your name?"),
            Turn::user("Asha"),
        ]
    }

    #[test]
    fn test_turns_map_to_chat_roles() {
        let messages = to_chat_messages(&history()).unwrap();
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::Assistant(_)));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_system_prompt_is_prepended_when_present() {
        let messages = to_chat_messages(&history()).unwrap();
        assert_eq!(with_system_prompt(String::new(), messages.clone()).unwrap().len(), 3);
        let with = with_system_prompt("context".into(), messages).unwrap();
        assert_eq!(with.len(), 4);
        assert!(matches!(with[0], ChatCompletionRequestMessage::System(_)));
    }

    #[tokio::test]
    async fn test_chat_engine_returns_text() {
        let engine = ChatEngine::new(Arc::new(FixedClient(LLMAction::TextResponse(
            "Hello Asha!".into(),
        ))));
        assert_eq!(engine.generate("context", &history()).await.unwrap(), "Hello Asha!");
    }

    #[tokio::test]
    async fn test_chat_engine_rejects_tool_calls() {
        let engine = ChatEngine::new(Arc::new(FixedClient(LLMAction::ToolCall(vec![]))));
        assert!(engine.generate("context", &history()).await.is_err());
    }
}
