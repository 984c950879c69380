//! Background workers draining the technical streams (§4.5 C4–C7)

mod process;

pub mod dlq;
pub mod fallback;
pub mod memory_monitor;
pub mod retry;
pub mod wal;

pub use dlq::spawn_dlq_reader;
pub use fallback::spawn_fallback_worker;
pub use memory_monitor::spawn_memory_monitor;
pub use retry::spawn_retry_worker;
pub use wal::spawn_wal_worker;
