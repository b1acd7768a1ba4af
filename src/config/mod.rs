pub mod schema;

pub use schema::{Config, DEFAULT_SYSTEM_PROMPT};
