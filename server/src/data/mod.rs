//! Data storage layer
//!
//! - `sqlite` - primary store for messages, conversations and user profiles
//! - `streams` - stream fabric client (publish/consume/XACK/XPENDING)
//! - `cache` - in-memory/Redis cache for hot reads (user profiles, presence)
//! - `types` - shared chat domain types
//! - `traits` - repository contracts implemented by the primary store
//! - `error` - unified error type for the data layer

pub mod cache;
pub mod error;
pub mod sqlite;
pub mod streams;
pub mod traits;
pub mod types;

pub use error::DataError;
pub use sqlite::SqliteStore;
pub use traits::{ConversationRepository, CursorDirection, MessageRepository, UserProfileRepository};
