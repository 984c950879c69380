//! Domain logic for the resilient messaging core
//!
//! - `messaging` - circuit breaker, resilient publisher, WAL/retry/fallback/DLQ
//!   workers, delivery engine, presence registry and user cache

pub mod messaging;
