//! Error type for the Stream Fabric (§4.1, §7 StreamError/PoisonMessage)

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("stream connection error: {0}")]
    Connection(String),

    #[error("stream operation failed: {0}")]
    Stream(String),

    #[error("consumer group error: {0}")]
    ConsumerGroup(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("stream configuration error: {0}")]
    Config(String),

    /// A malformed entry (`PoisonMessage`, §7) — the caller must XDEL and
    /// move on, never retry.
    #[error("malformed entry {id} on {stream}: {reason}")]
    Malformed {
        stream: String,
        id: String,
        reason: String,
    },
}

impl StreamError {
    pub fn malformed(stream: impl Into<String>, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            stream: stream.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }
}

impl From<deadpool_redis::PoolError> for StreamError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Connection(e.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for StreamError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        Self::Stream(e.to_string())
    }
}
