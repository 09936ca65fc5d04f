//! Pluggable LLM provider trait.
//!
//! Implementations translate the provider-agnostic request/response types
//! into vendor SDK calls, keeping the agents decoupled from any particular
//! LLM vendor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Message content.
    pub content: String,
}

/// A chat completion request (provider-agnostic).
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Ordered conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Request JSON-formatted output.
    pub json_mode: bool,
}

/// A chat completion response (provider-agnostic).
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated text content.
    pub content: String,
}

/// Creates a system message.
#[must_use]
pub fn system_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::System,
        content: content.to_string(),
    }
}

/// Creates a user message.
#[must_use]
pub fn user_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::User,
        content: content.to_string(),
    }
}

/// Trait for LLM provider backends.
///
/// Implementations handle transport (HTTP, SDK calls, timeouts) for a
/// specific provider while presenting a uniform interface to agents.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on API failures, timeouts, or parse errors.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, AgentError>;

    /// Completes with default sampling and returns the content.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on API failures.
    async fn complete_simple(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        let request = CompletionRequest {
            messages: messages.to_vec(),
            temperature: Some(0.2),
            max_tokens: None,
            json_mode: false,
        };
        Ok(self.complete(&request).await?.content)
    }

    /// Completes in JSON mode and returns the content.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] on API failures.
    async fn complete_json(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        let request = CompletionRequest {
            messages: messages.to_vec(),
            temperature: Some(0.1),
            max_tokens: None,
            json_mode: true,
        };
        Ok(self.complete(&request).await?.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = system_message("rules");
        assert_eq!(msg.role, Role::System);
        assert_eq!(msg.content, "rules");

        let msg = user_message("question");
        assert_eq!(msg.role, Role::User);
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
    }

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, AgentError> {
            Ok(CompletionResponse {
                content: request
                    .messages
                    .last()
                    .map(|m| m.content.clone())
                    .unwrap_or_default(),
            })
        }
    }

    #[tokio::test]
    async fn test_complete_simple_returns_content() {
        let provider = EchoProvider;
        let content = provider
            .complete_simple(&[user_message("hello")])
            .await
            .unwrap();
        assert_eq!(content, "hello");
    }
}
