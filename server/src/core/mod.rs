//! Core application infrastructure

pub(crate) mod banner;
pub mod cli;
pub mod config;
pub mod constants;
pub mod secret;
pub mod shutdown;
pub mod storage;
pub(crate) mod update;

pub use crate::app::CoreApp;
pub use cli::{CliConfig, Commands};
pub use config::{AppConfig, AuthConfig, ServerConfig};
pub use secret::{Secret, SecretBackend, SecretManager};
pub use shutdown::ShutdownService;
pub use storage::{AppStorage, DataSubdir};

// Re-export the primary store and stream fabric for direct access when needed
pub use crate::data::sqlite::SqliteStore;
pub use crate::data::streams::{StreamError, StreamFabric, StreamManager};
