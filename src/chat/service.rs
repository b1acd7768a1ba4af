use crate::backend::CompletionAdapter;
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::history::{HistoryStore, Role, Session};
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DEFAULT_TITLE: &str = "New Chat";
const LIST_LIMIT: usize = 50;
const TITLE_MAX_CHARS: usize = 40;

pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The session pipeline: lifecycle, turn persistence, and stream-to-store
/// reconciliation. Holds no per-call state; every operation re-reads the
/// session from the store.
pub struct ChatService {
    store: Arc<dyn HistoryStore>,
    adapter: Arc<CompletionAdapter>,
    default_model: String,
    system_prompt: String,
}

impl ChatService {
    pub fn new(store: Arc<dyn HistoryStore>, adapter: CompletionAdapter, config: &Config) -> Self {
        Self {
            store,
            adapter: Arc::new(adapter),
            default_model: config.default_model.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }

    /// Creates a session and seeds it with the system turn before returning,
    /// so no caller ever observes a session without one.
    pub async fn start_new_session(&self, owner_id: &str, title: &str) -> Result<Session> {
        if owner_id.trim().is_empty() {
            return Err(ChatError::Validation("owner id must not be empty".into()));
        }

        let title = if title.trim().is_empty() {
            DEFAULT_TITLE
        } else {
            title
        };
        let session = self.store.create_session(owner_id, title).await?;
        self.store
            .append_turn(&session.id, Role::System, &self.system_prompt, None)
            .await?;

        tracing::info!(session_id = %session.id, owner_id, "started new chat session");
        self.load_session(&session.id).await
    }

    pub async fn get_session(&self, id: &str) -> Result<Session> {
        self.load_session(id).await
    }

    pub async fn list_sessions(&self, owner_id: &str) -> Result<Vec<Session>> {
        Ok(self.store.list_sessions(owner_id, LIST_LIMIT).await?)
    }

    /// Convenience wrapper: drains the streaming variant and concatenates.
    pub async fn send_message(&self, session_id: &str, text: &str) -> Result<String> {
        let mut stream = self.send_message_stream(session_id, text, CancellationToken::new());
        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            reply.push_str(&chunk?);
        }
        Ok(reply)
    }

    /// One exchange as a lazy, finite, forward-only fragment sequence.
    ///
    /// The user turn is durably appended before the backend is contacted, so
    /// a crash or failure mid-stream never loses the input. The assistant
    /// turn is appended only when the stream completes with non-empty
    /// content. Cancelling `cancel` between fragments stops production and
    /// skips assistant persistence; already-emitted fragments stand.
    ///
    /// Concurrent calls for the same session are not serialized here: each
    /// append is atomic at the store, but the relative order of turns from
    /// overlapping exchanges is unspecified.
    pub fn send_message_stream(
        &self,
        session_id: &str,
        text: &str,
        cancel: CancellationToken,
    ) -> ReplyStream {
        let store = Arc::clone(&self.store);
        let adapter = Arc::clone(&self.adapter);
        let model = self.default_model.clone();
        let session_id = session_id.to_string();
        let text = text.to_string();

        let stream = async_stream::try_stream! {
            if text.trim().is_empty() {
                Err(ChatError::Validation("message must not be empty".into()))?;
            }

            let session = store
                .get_session(&session_id)
                .await?
                .ok_or_else(|| ChatError::SessionNotFound(session_id.clone()))?;

            // Retitle first: update_session overwrites the turn list from
            // the loaded snapshot, so it must run before anything new is
            // appended.
            retitle_if_fresh(store.as_ref(), &session, &text).await?;

            // Durable before any backend call; never rolled back.
            let user_turn = store
                .append_turn(&session_id, Role::User, &text, None)
                .await?;
            tracing::debug!(session_id = %session_id, "user turn persisted");

            let mut turns = session.turns;
            turns.push(user_turn);
            turns.sort_by_key(|turn| turn.timestamp);

            // Each select evaluates to a Result so cancellation propagates
            // through one `?` outside the arms; biased polling makes an
            // already-cancelled token win over a ready backend.
            let mut fragments = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!(session_id = %session_id, "exchange cancelled before backend call");
                    Err(ChatError::Cancelled)
                }
                result = adapter.fragments(&model, &turns) => result.map_err(ChatError::from),
            }?;

            let mut reply = String::new();
            loop {
                let item = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        tracing::info!(session_id = %session_id, "exchange cancelled mid-stream");
                        Err(ChatError::Cancelled)
                    }
                    item = fragments.next() => Ok(item),
                }?;
                let Some(item) = item else { break };
                let fragment = item.map_err(|error| {
                    tracing::error!(session_id = %session_id, %error, "backend stream failed");
                    error
                })?;

                reply.push_str(&fragment.text);
                yield fragment.text;
            }

            // A stream that produced nothing leaves no placeholder turn.
            if !reply.is_empty() {
                store
                    .append_turn(&session_id, Role::Assistant, &reply, None)
                    .await?;
                tracing::debug!(
                    session_id = %session_id,
                    reply_chars = reply.chars().count(),
                    "assistant turn persisted"
                );
            }
        };

        Box::pin(stream)
    }

    /// Idempotent; reports whether a record was removed.
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let deleted = self.store.delete_session(id).await?;
        if deleted {
            tracing::info!(session_id = %id, "deleted chat session");
        }
        Ok(deleted)
    }

    async fn load_session(&self, id: &str) -> Result<Session> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(|| ChatError::SessionNotFound(id.to_string()))
    }
}

/// A session still carrying the default title takes its title from the first
/// user message.
async fn retitle_if_fresh(
    store: &dyn HistoryStore,
    session: &Session,
    text: &str,
) -> Result<()> {
    let fresh =
        session.title == DEFAULT_TITLE && session.turns.iter().all(|turn| turn.role != Role::User);
    if !fresh {
        return Ok(());
    }

    let mut updated = session.clone();
    updated.title = derive_title(text);
    store.update_session(&updated).await?;
    Ok(())
}

fn derive_title(text: &str) -> String {
    let trimmed = text.trim();
    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;
    use crate::history::MemoryHistoryStore;

    fn service(backend: ScriptedBackend) -> ChatService {
        let config = Config::default();
        let adapter = CompletionAdapter::new(Arc::new(backend), 100, true);
        ChatService::new(Arc::new(MemoryHistoryStore::new()), adapter, &config)
    }

    #[test]
    fn derive_title_passes_short_text_through() {
        assert_eq!(derive_title("  hello there  "), "hello there");
    }

    #[test]
    fn derive_title_truncates_long_text_with_ellipsis() {
        let long = "x".repeat(120);
        let title = derive_title(&long);
        assert_eq!(title.chars().count(), 41);
        assert!(title.ends_with('…'));
    }

    #[tokio::test]
    async fn new_session_is_seeded_with_system_turn() {
        let service = service(ScriptedBackend::replying(&[]));
        let session = service.start_new_session("u1", "").await.unwrap();

        assert_eq!(session.title, "New Chat");
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.turns[0].role, Role::System);
        assert_eq!(session.turns[0].content, crate::config::DEFAULT_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn empty_owner_is_rejected() {
        let service = service(ScriptedBackend::replying(&[]));
        let err = service.start_new_session("  ", "t").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn send_message_concatenates_fragments() {
        let service = service(ScriptedBackend::replying(&["Hel", "lo ", "there"]));
        let session = service.start_new_session("u1", "t").await.unwrap();

        let reply = service.send_message(&session.id, "hi").await.unwrap();
        assert_eq!(reply, "Hello there");
    }

    #[tokio::test]
    async fn send_to_missing_session_fails_fast() {
        let service = service(ScriptedBackend::replying(&["x"]));
        let err = service.send_message("ghost", "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_any_persistence() {
        let service = service(ScriptedBackend::replying(&["x"]));
        let session = service.start_new_session("u1", "t").await.unwrap();

        let err = service.send_message(&session.id, "   ").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let reloaded = service.get_session(&session.id).await.unwrap();
        assert_eq!(reloaded.turns.len(), 1); // just the seed
    }

    #[tokio::test]
    async fn default_titled_session_takes_title_from_first_message() {
        let service = service(ScriptedBackend::replying(&["ok"]));
        let session = service.start_new_session("u1", "").await.unwrap();

        service
            .send_message(&session.id, "plan my garden")
            .await
            .unwrap();

        let reloaded = service.get_session(&session.id).await.unwrap();
        assert_eq!(reloaded.title, "plan my garden");
    }

    #[tokio::test]
    async fn explicit_title_is_never_overwritten() {
        let service = service(ScriptedBackend::replying(&["ok"]));
        let session = service.start_new_session("u1", "Garden notes").await.unwrap();

        service.send_message(&session.id, "hello").await.unwrap();

        let reloaded = service.get_session(&session.id).await.unwrap();
        assert_eq!(reloaded.title, "Garden notes");
    }

    #[tokio::test]
    async fn delete_session_is_idempotent_at_the_service() {
        let service = service(ScriptedBackend::replying(&[]));
        let session = service.start_new_session("u1", "t").await.unwrap();

        assert!(service.delete_session(&session.id).await.unwrap());
        assert!(!service.delete_session(&session.id).await.unwrap());
    }
}
