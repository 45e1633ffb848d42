// =============================================================================
// Candle aggregator — per-(symbol, timeframe) rolling windows
// =============================================================================
//
// Receives raw kline updates and maintains one Window of closed candles per
// key, plus at most one in-progress candle. A candle is *committed* exactly
// once, either when its final flag flips true or when a newer open_time shows
// up before the final message arrived (missed close). Committed candles are
// appended to the window, the window is trimmed to `window_size`, and every
// registered close callback fires with a snapshot of the window.
//
// Intermediate (non-final) updates overwrite the in-progress candle in place
// and never fire callbacks.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::market_data::candle::{timeframe_duration_ms, Candle, CandleKey, KlineUpdate};

/// Close callback: `(key, committed candle, window snapshot)`. The snapshot
/// is ordered oldest-first and ends with the committed candle.
pub type CloseCallback = Arc<dyn Fn(&CandleKey, &Candle, &[Candle]) + Send + Sync>;

/// Per-key series state: the window of closed candles plus the forming one.
#[derive(Default)]
struct SeriesState {
    window: VecDeque<Candle>,
    pending: Option<Candle>,
}

impl SeriesState {
    fn tail_open_time(&self) -> Option<i64> {
        self.window.back().map(|c| c.open_time)
    }
}

pub struct CandleAggregator {
    series: RwLock<HashMap<CandleKey, SeriesState>>,
    callbacks: RwLock<Vec<CloseCallback>>,
    window_size: usize,
}

impl CandleAggregator {
    /// `window_size` is the maximum number of closed candles retained per key.
    pub fn new(window_size: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(Vec::new()),
            window_size,
        }
    }

    /// Register a close callback. Callbacks for one key fire in commit order;
    /// registration happens before streaming starts.
    pub fn on_close(&self, callback: CloseCallback) {
        self.callbacks.write().push(callback);
    }

    /// Pre-load a window from history. Candles are sorted by `open_time`,
    /// de-duplicated, and trimmed to `window_size`; no callbacks fire.
    pub fn preload(&self, key: &CandleKey, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);

        let mut window: VecDeque<Candle> = candles.into();
        while window.len() > self.window_size {
            window.pop_front();
        }

        debug!(key = %key, len = window.len(), "window preloaded from history");
        let mut series = self.series.write();
        series.entry(key.clone()).or_default().window = window;
    }

    /// Apply one kline update. Returns the number of candles committed
    /// (0, 1, or 2 — a missed close followed by an already-final update).
    pub fn apply(&self, update: KlineUpdate) -> usize {
        let key = update.candle.key();

        if !update.candle.is_price_consistent() {
            warn!(key = %key, open_time = update.candle.open_time, "inconsistent OHLC dropped");
            return 0;
        }
        // Fixed-width timeframes must span exactly one interval.
        if let Some(duration) = timeframe_duration_ms(&key.timeframe) {
            if update.candle.close_time - update.candle.open_time + 1 != duration {
                warn!(
                    key = %key,
                    open_time = update.candle.open_time,
                    close_time = update.candle.close_time,
                    "kline span does not match its timeframe; dropped"
                );
                return 0;
            }
        }

        // Decide commits under the lock, fire callbacks after releasing it.
        let mut commits: Vec<(Candle, Vec<Candle>)> = Vec::new();
        {
            let mut series = self.series.write();
            let state = series.entry(key.clone()).or_default();

            // Anything at or before the committed tail is stale: either a
            // replay of a candle we already hold (warm start overlap) or an
            // out-of-order frame.
            if let Some(tail) = state.tail_open_time() {
                if update.candle.open_time <= tail {
                    debug!(
                        key = %key,
                        open_time = update.candle.open_time,
                        tail,
                        "stale kline update dropped"
                    );
                    return 0;
                }
            }

            match state.pending.take() {
                Some(pending) if update.candle.open_time < pending.open_time => {
                    debug!(key = %key, open_time = update.candle.open_time, "out-of-order kline dropped");
                    state.pending = Some(pending);
                }
                Some(pending) if update.candle.open_time > pending.open_time => {
                    // The final frame for `pending` never arrived; commit the
                    // last observed state of it before moving on.
                    warn!(
                        key = %key,
                        open_time = pending.open_time,
                        "close frame missed; committing last observed candle"
                    );
                    Self::commit(state, pending, self.window_size, &mut commits);
                    if update.is_final {
                        Self::commit(state, update.candle, self.window_size, &mut commits);
                    } else {
                        state.pending = Some(update.candle);
                    }
                }
                // Same open_time: the in-progress candle, updated in place.
                Some(_) | None => {
                    if update.is_final {
                        Self::commit(state, update.candle, self.window_size, &mut commits);
                    } else {
                        state.pending = Some(update.candle);
                    }
                }
            }
        }

        let committed = commits.len();
        if committed > 0 {
            let callbacks = self.callbacks.read().clone();
            for (candle, snapshot) in &commits {
                for cb in &callbacks {
                    cb(&key, candle, snapshot);
                }
            }
        }
        committed
    }

    fn commit(
        state: &mut SeriesState,
        candle: Candle,
        window_size: usize,
        commits: &mut Vec<(Candle, Vec<Candle>)>,
    ) {
        state.window.push_back(candle.clone());
        while state.window.len() > window_size {
            state.window.pop_front();
        }
        let snapshot: Vec<Candle> = state.window.iter().cloned().collect();
        commits.push((candle, snapshot));
    }

    /// Snapshot of the closed-candle window for `key`, oldest first.
    #[cfg(test)]
    pub fn window(&self, key: &CandleKey) -> Vec<Candle> {
        self.series
            .read()
            .get(key)
            .map(|s| s.window.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of closed candles held for `key`.
    pub fn window_len(&self, key: &CandleKey) -> usize {
        self.series.read().get(key).map_or(0, |s| s.window.len())
    }

    /// All keys with at least one closed or in-progress candle.
    pub fn tracked_keys(&self) -> Vec<CandleKey> {
        self.series.read().keys().cloned().collect()
    }
}
