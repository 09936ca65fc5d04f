//! OpenAI chat provider built on the `async-openai` crate.
//!
//! Compatible with any OpenAI-style chat completion API via the base URL
//! override.

use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequest, ResponseFormat,
};
use async_trait::async_trait;

use super::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role};
use crate::error::AgentError;

/// OpenAI-compatible chat provider.
pub struct OpenAiChatProvider {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiChatProvider {
    /// Creates a provider for the given chat model.
    #[must_use]
    pub fn new(api_key: &str, base_url: Option<&str>, model: &str, timeout: Duration) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout,
        }
    }

    fn convert_message(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        match msg.role {
            Role::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: async_openai::types::ChatCompletionRequestSystemMessageContent::Text(
                        msg.content.clone(),
                    ),
                    name: None,
                })
            }
            Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: async_openai::types::ChatCompletionRequestUserMessageContent::Text(
                    msg.content.clone(),
                ),
                name: None,
            }),
            Role::Assistant => {
                #[allow(deprecated)]
                ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content: Some(
                        async_openai::types::ChatCompletionRequestAssistantMessageContent::Text(
                            msg.content.clone(),
                        ),
                    ),
                    name: None,
                    tool_calls: None,
                    refusal: None,
                    audio: None,
                    function_call: None,
                })
            }
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> CreateChatCompletionRequest {
        let messages: Vec<_> = request.messages.iter().map(Self::convert_message).collect();

        let response_format = if request.json_mode {
            Some(ResponseFormat::JsonObject)
        } else {
            None
        };

        CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: request.temperature,
            max_completion_tokens: request.max_tokens,
            response_format,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for OpenAiChatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatProvider")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmProvider for OpenAiChatProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, AgentError> {
        let openai_request = self.build_request(request);

        let response = tokio::time::timeout(
            self.timeout,
            self.client.chat().create(openai_request),
        )
        .await
        .map_err(|_| AgentError::Timeout {
            secs: self.timeout.as_secs(),
        })?
        .map_err(|e| AgentError::ApiRequest {
            message: e.to_string(),
        })?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        Ok(CompletionResponse { content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::provider::{system_message, user_message};

    fn provider() -> OpenAiChatProvider {
        OpenAiChatProvider::new("test-key", None, "gpt-4o-mini", Duration::from_secs(30))
    }

    #[test]
    fn test_convert_system_message() {
        let converted = OpenAiChatProvider::convert_message(&system_message("rules"));
        assert!(matches!(converted, ChatCompletionRequestMessage::System(_)));
    }

    #[test]
    fn test_convert_user_message() {
        let converted = OpenAiChatProvider::convert_message(&user_message("hi"));
        assert!(matches!(converted, ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_build_request_json_mode() {
        let request = CompletionRequest {
            messages: vec![user_message("x")],
            temperature: Some(0.1),
            max_tokens: Some(200),
            json_mode: true,
        };
        let built = provider().build_request(&request);
        assert!(built.response_format.is_some());
        assert_eq!(built.model, "gpt-4o-mini");
        assert_eq!(built.max_completion_tokens, Some(200));
    }

    #[test]
    fn test_build_request_plain() {
        let request = CompletionRequest {
            messages: vec![system_message("s"), user_message("u")],
            temperature: None,
            max_tokens: None,
            json_mode: false,
        };
        let built = provider().build_request(&request);
        assert!(built.response_format.is_none());
        assert_eq!(built.messages.len(), 2);
    }
}
