#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod backend;
pub mod chat;
pub mod config;
pub mod console;
pub mod error;
pub mod history;

pub use backend::{CompletionAdapter, CompletionBackend, OllamaBackend};
pub use chat::ChatService;
pub use config::Config;
pub use error::{BackendError, ChatError, StoreError};
pub use history::{HistoryStore, MemoryHistoryStore, Role, Session, SqliteHistoryStore, Turn};
