//! StreamClient contract (§4.1)
//!
//! All field values are normalised to strings before they reach the backend;
//! `null/undefined -> ""`, objects are pre-serialised to JSON by the caller
//! and carried in a `data` field. Failures with `BUSYGROUP` on group creation
//! are swallowed as success by implementors. Capacity trim is best-effort.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::error::StreamError;

/// A flat map of string fields, as carried by a stream entry (§3 StreamEntry).
pub type StreamFields = BTreeMap<String, String>;

/// One entry read back from a stream: a monotonic id plus its field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: StreamFields,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// The `data` field required on WAL/Retry/Fallback entries, decoded from JSON.
    pub fn data<T: serde::de::DeserializeOwned>(&self) -> Result<T, StreamError> {
        let raw = self
            .field("data")
            .ok_or_else(|| StreamError::malformed("", &self.id, "missing data field"))?;
        serde_json::from_str(raw)
            .map_err(|e| StreamError::malformed("", &self.id, format!("invalid data JSON: {e}")))
    }
}

/// Summary returned by `XPENDING` for a stream/group pair (§4.6 backpressure,
/// §8 property 7 cap enforcement).
#[derive(Debug, Clone, Default)]
pub struct PendingSummary {
    pub length: u64,
    pub pending: u64,
    pub consumers: u64,
    pub oldest_pending_ms: Option<u64>,
}

/// Typed wrapper over the append-only log service (§4.1).
///
/// Implementors must treat `BUSYGROUP` on `create_group` as success and make
/// capacity trimming best-effort (non-blocking, approximate per §8 property 7).
#[async_trait]
pub trait StreamBackend: Send + Sync {
    /// `append(stream, fields) -> id`, trimming to `~ maxlen`.
    async fn append(
        &self,
        stream: &str,
        fields: StreamFields,
        maxlen: u64,
    ) -> Result<String, StreamError>;

    /// Idempotent consumer-group bootstrap; `MKSTREAM` semantics, `BUSYGROUP` swallowed.
    async fn create_group(&self, stream: &str, group: &str, start_id: &str) -> Result<(), StreamError>;

    /// Leased batch read via `XREADGROUP ... > `, blocking up to `block_ms`.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StreamError>;

    /// Unleased range read (`XRANGE`) used where ordering without a group is required.
    async fn read_range(
        &self,
        stream: &str,
        from: &str,
        to: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StreamError>;

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), StreamError>;

    async fn ack_batch(&self, stream: &str, group: &str, ids: &[String]) -> Result<(), StreamError> {
        for id in ids {
            self.ack(stream, group, id).await?;
        }
        Ok(())
    }

    async fn del(&self, stream: &str, id: &str) -> Result<(), StreamError>;

    /// Re-claim entries idle for at least `min_idle_ms` to `consumer` (via
    /// `XPENDING` range then `XCLAIM`).
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StreamError>;

    async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary, StreamError>;

    async fn health_check(&self) -> Result<(), StreamError>;

    fn backend_name(&self) -> &'static str;
}

/// Turns a set of loosely typed values into a `StreamFields` map, matching
/// the `null/undefined -> ""`, `object -> JSON` normalisation rule of §4.1.
pub fn normalize_fields<I, K, V>(pairs: I) -> StreamFields
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
