use crate::error::BackendError;
use crate::history::Role;
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// One role-tagged message as the backend sees it. Carries no identity or
/// timestamp; the wire shape is history-free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTurn {
    pub role: Role,
    pub content: String,
}

impl WireTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Request handed to a completion backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub turns: Vec<WireTurn>,
    pub streaming: bool,
}

/// An incremental piece of the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub role: Role,
    pub text: String,
}

impl Fragment {
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment, BackendError>> + Send>>;

/// Streaming text-generation transport. Pure protocol: implementations never
/// persist or interpret content. The stream terminates normally when the
/// backend signals completion and fails with a `BackendError` otherwise.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentStream, BackendError>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_serializes_roles_snake_case() {
        let request = ChatRequest {
            model: "gemma2:2b".into(),
            turns: vec![
                WireTurn::new(Role::System, "be helpful"),
                WireTurn::new(Role::User, "hi"),
            ],
            streaming: true,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"role\":\"system\""));
        assert!(json.contains("\"role\":\"user\""));
        assert!(json.contains("\"streaming\":true"));
    }

    #[test]
    fn fragment_assistant_helper() {
        let fragment = Fragment::assistant("hey");
        assert_eq!(fragment.role, Role::Assistant);
        assert_eq!(fragment.text, "hey");
    }
}
