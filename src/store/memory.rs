// =============================================================================
// In-memory store — contract-faithful adapter for tests
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::market_data::Candle;
use crate::store::{SignalStore, StoreError};
use crate::types::Signal;

type CandleRowKey = (String, String, i64);

pub struct MemoryStore {
    candles: Mutex<HashMap<CandleRowKey, Candle>>,
    signals: Mutex<Vec<(i64, Signal)>>,
    next_signal_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            candles: Mutex::new(HashMap::new()),
            signals: Mutex::new(Vec::new()),
            next_signal_id: AtomicI64::new(1),
        }
    }

    pub fn candle_count(&self) -> usize {
        self.candles.lock().len()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.lock().len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn upsert_candle(&self, candle: &Candle) -> Result<(), StoreError> {
        let key = (
            candle.symbol.clone(),
            candle.timeframe.clone(),
            candle.open_time,
        );
        let mut candles = self.candles.lock();
        if candles.contains_key(&key) {
            return Err(StoreError::Duplicate);
        }
        candles.insert(key, candle.clone());
        Ok(())
    }

    async fn insert_signal(&self, signal: &Signal) -> Result<i64, StoreError> {
        let mut signals = self.signals.lock();
        if signals.iter().any(|(_, s)| s.id == signal.id) {
            return Err(StoreError::Duplicate);
        }
        let id = self.next_signal_id.fetch_add(1, Ordering::SeqCst);
        signals.push((id, signal.clone()));
        Ok(id)
    }

    async fn recent_signals(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Signal>, StoreError> {
        let signals = self.signals.lock();
        let mut matching: Vec<Signal> = signals
            .iter()
            .filter(|(_, s)| s.symbol == symbol && s.timeframe == timeframe)
            .map(|(_, s)| s.clone())
            .collect();
        matching.sort_by_key(|s| std::cmp::Reverse(s.generated_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn delete_candles_older_than(&self, cutoff_ms: i64) -> Result<u64, StoreError> {
        let mut candles = self.candles.lock();
        let before = candles.len();
        candles.retain(|_, c| c.open_time >= cutoff_ms);
        Ok((before - candles.len()) as u64)
    }

    async fn delete_candles_outside(&self, timeframes: &[String]) -> Result<u64, StoreError> {
        let mut candles = self.candles.lock();
        let before = candles.len();
        candles.retain(|_, c| timeframes.contains(&c.timeframe));
        Ok((before - candles.len()) as u64)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, FusionTier};

    fn candle(symbol: &str, timeframe: &str, open_time: i64) -> Candle {
        Candle {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            open_time,
            close_time: open_time + 59_999,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
            quote_volume: 0.0,
            trade_count: 5,
            taker_buy_base: 0.0,
            taker_buy_quote: 0.0,
        }
    }

    fn signal(symbol: &str, timeframe: &str, generated_at: i64) -> Signal {
        Signal {
            id: uuid::Uuid::new_v4(),
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            direction: Direction::Long,
            entry_price: 100.0,
            stop_loss: 95.0,
            take_profit_1: 103.0,
            take_profit_2: 106.0,
            take_profit_3: 109.0,
            confidence: 0.7,
            fusion_tier: FusionTier::Tier3,
            fusion_reason: "test".into(),
            analyzer_results: Vec::new(),
            generated_at,
        }
    }

    #[tokio::test]
    async fn duplicate_candle_is_surfaced_and_row_unchanged() {
        let store = MemoryStore::new();
        let first = candle("BTCUSDT", "1m", 0);
        store.upsert_candle(&first).await.unwrap();

        let mut replay = first.clone();
        replay.close = 999.0;
        let err = store.upsert_candle(&replay).await.unwrap_err();
        assert!(err.is_duplicate());

        assert_eq!(store.candle_count(), 1);
        let stored = store
            .candles
            .lock()
            .get(&("BTCUSDT".into(), "1m".into(), 0))
            .cloned()
            .unwrap();
        assert_eq!(stored.close, 100.5);
    }

    #[tokio::test]
    async fn signal_ids_are_assigned_in_order() {
        let store = MemoryStore::new();
        let a = store.insert_signal(&signal("BTCUSDT", "1h", 10)).await.unwrap();
        let b = store.insert_signal(&signal("BTCUSDT", "1h", 20)).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn recent_signals_orders_descending_and_limits() {
        let store = MemoryStore::new();
        for t in [10, 30, 20, 40] {
            store.insert_signal(&signal("ETHUSDT", "15m", t)).await.unwrap();
        }
        store.insert_signal(&signal("ETHUSDT", "1h", 99)).await.unwrap();

        let recent = store.recent_signals("ETHUSDT", "15m", 3).await.unwrap();
        let times: Vec<i64> = recent.iter().map(|s| s.generated_at).collect();
        assert_eq!(times, vec![40, 30, 20]);
    }

    #[tokio::test]
    async fn maintenance_deletes() {
        let store = MemoryStore::new();
        store.upsert_candle(&candle("BTCUSDT", "1m", 0)).await.unwrap();
        store.upsert_candle(&candle("BTCUSDT", "1m", 60_000)).await.unwrap();
        store.upsert_candle(&candle("BTCUSDT", "1h", 0)).await.unwrap();

        let removed = store.delete_candles_older_than(50_000).await.unwrap();
        assert_eq!(removed, 2);

        // Only the 1m candle at 60_000 survived the age sweep; the
        // timeframe sweep removes it too.
        let removed = store
            .delete_candles_outside(&["1h".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.candle_count(), 0);
    }
}
