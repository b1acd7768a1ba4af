pub mod sqlite;
pub mod store;
pub mod types;

pub use sqlite::SqliteHistoryStore;
pub use store::{HistoryStore, MemoryHistoryStore};
pub use types::{Role, Session, Turn};
