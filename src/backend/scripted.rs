use super::port::{ChatRequest, CompletionBackend, Fragment, FragmentStream};
use crate::error::BackendError;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Deterministic backend for tests: plays a fixed fragment script, records
/// every request it receives, and can be told to fail partway through.
pub struct ScriptedBackend {
    fragments: Vec<Fragment>,
    fail_after: Option<usize>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new(fragments: Vec<Fragment>) -> Self {
        Self {
            fragments,
            fail_after: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|text| Fragment::assistant(*text)).collect())
    }

    /// Fail with a backend error after emitting `count` fragments. A count
    /// at or past the script's length fails after the whole script plays.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Sleep between fragments, so a test can cancel mid-stream.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request seen so far, in arrival order.
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentStream, BackendError> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request);

        let fragments = self.fragments.clone();
        let fail_after = self.fail_after;
        let delay = self.delay;

        let stream = async_stream::stream! {
            let total = fragments.len();
            for (index, fragment) in fragments.into_iter().enumerate() {
                if fail_after == Some(index) {
                    yield Err(BackendError::Transport {
                        backend: "scripted".into(),
                        message: "scripted mid-stream failure".into(),
                    });
                    return;
                }
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(fragment);
            }
            // A count past the script's end fails after everything played.
            if fail_after.is_some_and(|count| count >= total) {
                yield Err(BackendError::Transport {
                    backend: "scripted".into(),
                    message: "scripted end-of-stream failure".into(),
                });
            }
        };

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
