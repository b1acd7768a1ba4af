pub mod adapter;
pub mod ollama;
pub mod port;
pub mod scripted;

pub use adapter::CompletionAdapter;
pub use ollama::OllamaBackend;
pub use port::{ChatRequest, CompletionBackend, Fragment, FragmentStream, WireTurn};
pub use scripted::ScriptedBackend;
