pub mod attachments;
pub mod conversations;
pub mod messages;
pub mod pool;
pub mod schema;

// Re-export the pool type so callers can do `use crate::adapters::sqlite::DbPool`
pub use pool::{open, DbPool};
