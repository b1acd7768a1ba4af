use super::port::{ChatRequest, CompletionBackend, Fragment, FragmentStream, WireTurn};
use crate::error::BackendError;
use crate::history::{Role, Turn};
use futures_util::StreamExt;
use std::sync::Arc;

/// Bridges the orchestrator's canonical turn list and a completion backend.
///
/// Owns the request-construction policy: history windowing, the streaming
/// toggle, and empty-fragment filtering. Never touches stored history.
pub struct CompletionAdapter {
    backend: Arc<dyn CompletionBackend>,
    max_history_messages: usize,
    enable_streaming: bool,
}

impl CompletionAdapter {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        max_history_messages: usize,
        enable_streaming: bool,
    ) -> Self {
        Self {
            backend,
            max_history_messages: max_history_messages.max(1),
            enable_streaming,
        }
    }

    /// Builds the wire request from an already-sorted turn list. When the
    /// history exceeds the configured window only the most recent turns are
    /// included; earlier turns stay persisted, just out of model context.
    pub fn build_request(&self, model: &str, turns: &[Turn]) -> ChatRequest {
        let skip = turns.len().saturating_sub(self.max_history_messages);
        if skip > 0 {
            tracing::debug!(
                total = turns.len(),
                window = self.max_history_messages,
                "trimming history for backend request"
            );
        }

        ChatRequest {
            model: model.to_string(),
            turns: turns[skip..]
                .iter()
                .map(|turn| WireTurn::new(turn.role, turn.content.clone()))
                .collect(),
            streaming: self.enable_streaming,
        }
    }

    /// Canonical fragment stream for one exchange.
    ///
    /// With streaming disabled the backend's incremental API is still driven
    /// end to end; fragments are buffered here and surface as one assembled
    /// message, so ordering and tokenization match the streaming mode.
    pub async fn fragments(
        &self,
        model: &str,
        turns: &[Turn],
    ) -> Result<FragmentStream, BackendError> {
        let request = self.build_request(model, turns);
        tracing::debug!(
            backend = self.backend.name(),
            model,
            streaming = self.enable_streaming,
            "requesting completion"
        );
        let inner = self.backend.stream_chat(request).await?;

        if self.enable_streaming {
            Ok(Box::pin(inner.filter(|item| {
                let keep = !matches!(item, Ok(fragment) if fragment.text.is_empty());
                futures_util::future::ready(keep)
            })))
        } else {
            Ok(Self::buffered(inner))
        }
    }

    fn buffered(mut inner: FragmentStream) -> FragmentStream {
        let stream = async_stream::try_stream! {
            let mut role = Role::Assistant;
            let mut text = String::new();

            while let Some(item) = inner.next().await {
                let fragment = item?;
                if fragment.text.is_empty() {
                    continue;
                }
                role = fragment.role;
                text.push_str(&fragment.text);
            }

            if !text.is_empty() {
                yield Fragment { role, text };
            }
        };
        Box::pin(stream)
    }
}
