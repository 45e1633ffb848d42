// =============================================================================
// Store adapter — persistence contract for candles and signals
// =============================================================================
//
// The pipeline treats the schema as opaque: everything goes through this
// trait. Duplicate-key rejections are part of the contract (the aggregator
// replays overlap after warm starts and reconnects), so they surface as a
// dedicated recoverable error code that callers treat as success.

#[cfg(test)]
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::market_data::Candle;
use crate::types::Signal;

#[cfg(test)]
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The row already exists under its unique key. Recoverable; callers
    /// treat it as success.
    #[error("duplicate key")]
    Duplicate,
    /// The backend cannot be reached (connect failure, pool exhausted).
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The query itself failed.
    #[error("store query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Insert a closed candle, keyed by `(symbol, timeframe, open_time)`.
    /// Re-inserting an existing candle returns [`StoreError::Duplicate`] and
    /// leaves the stored row unchanged.
    async fn upsert_candle(&self, candle: &Candle) -> Result<(), StoreError>;

    /// Append a signal row and return the store-assigned row id.
    async fn insert_signal(&self, signal: &Signal) -> Result<i64, StoreError>;

    /// Up to `limit` most recent signals for `(symbol, timeframe)`, ordered
    /// by `generated_at` descending.
    async fn recent_signals(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Signal>, StoreError>;

    /// Maintenance: drop candles older than `cutoff_ms`. Returns rows removed.
    async fn delete_candles_older_than(&self, cutoff_ms: i64) -> Result<u64, StoreError>;

    /// Maintenance: drop candles whose timeframe is not in `timeframes`.
    /// Returns rows removed.
    async fn delete_candles_outside(&self, timeframes: &[String]) -> Result<u64, StoreError>;
}
