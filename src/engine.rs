// =============================================================================
// Signal engine — wiring between aggregator, store, and fuser
// =============================================================================
//
// Commits flow out of the aggregator as typed close events into one worker
// per (symbol, timeframe). That keeps close events for a key strictly in
// commit order while distinct keys process concurrently. Each worker first
// runs the persistence hook (idempotent candle insert, duplicates logged at
// INFO and ignored), then hands the event to the fuser.
//
// Shutdown is cooperative: closing the event channels lets every worker
// drain its queue, bounded by a five-second wait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fusion::SignalFuser;
use crate::market_data::history::HistoryClient;
use crate::market_data::{Candle, CandleAggregator, CandleKey};
use crate::store::SignalStore;

/// Parallel warm-start fetches in flight at once.
const WARM_START_CONCURRENCY: usize = 8;
/// Bounded wait for in-flight close events on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Candle insert attempts before the row is abandoned to the next commit.
const UPSERT_ATTEMPTS: u32 = 3;

/// One committed candle plus the window snapshot it completed.
struct CloseEvent {
    candle: Candle,
    window: Vec<Candle>,
}

pub struct SignalEngine {
    aggregator: Arc<CandleAggregator>,
    fuser: Arc<SignalFuser>,
    store: Arc<dyn SignalStore>,
    workers: Mutex<HashMap<CandleKey, mpsc::UnboundedSender<CloseEvent>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SignalEngine {
    pub fn new(
        aggregator: Arc<CandleAggregator>,
        fuser: Arc<SignalFuser>,
        store: Arc<dyn SignalStore>,
    ) -> Arc<Self> {
        let engine = Arc::new(Self {
            aggregator,
            fuser,
            store,
            workers: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
        });

        let dispatcher = engine.clone();
        engine
            .aggregator
            .on_close(Arc::new(move |key, candle, window| {
                Self::dispatch(&dispatcher, key, candle, window);
            }));

        engine
    }

    pub fn aggregator(&self) -> Arc<CandleAggregator> {
        self.aggregator.clone()
    }

    pub fn fuser(&self) -> Arc<SignalFuser> {
        self.fuser.clone()
    }

    /// Route one commit into its per-key worker, spawning the worker on
    /// first use.
    fn dispatch(engine: &Arc<Self>, key: &CandleKey, candle: &Candle, window: &[Candle]) {
        let event = CloseEvent {
            candle: candle.clone(),
            window: window.to_vec(),
        };

        let mut workers = engine.workers.lock();
        let sender = workers.entry(key.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = engine.clone();
            let worker_key = key.clone();
            let handle = tokio::spawn(async move {
                worker.run_worker(worker_key, rx).await;
            });
            engine.handles.lock().push(handle);
            tx
        });

        if sender.send(event).is_err() {
            warn!(key = %key, "close event dropped; worker already stopped");
        }
    }

    async fn run_worker(&self, key: CandleKey, mut rx: mpsc::UnboundedReceiver<CloseEvent>) {
        debug!(key = %key, "close-event worker started");
        while let Some(event) = rx.recv().await {
            self.persist_candle(&event.candle).await;
            self.fuser
                .on_candle_close(&key, &event.candle, &event.window)
                .await;
        }
        debug!(key = %key, "close-event worker drained");
    }

    /// Idempotent persistence hook. A duplicate key means the row is already
    /// there (warm-start overlap, reconnect replay) and counts as success.
    async fn persist_candle(&self, candle: &Candle) {
        let mut backoff = Duration::from_millis(200);
        for attempt in 1..=UPSERT_ATTEMPTS {
            match self.store.upsert_candle(candle).await {
                Ok(()) => return,
                Err(e) if e.is_duplicate() => {
                    info!(
                        symbol = %candle.symbol,
                        timeframe = %candle.timeframe,
                        open_time = candle.open_time,
                        "candle already stored"
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        symbol = %candle.symbol,
                        timeframe = %candle.timeframe,
                        attempt,
                        error = %e,
                        "candle insert failed"
                    );
                    if attempt < UPSERT_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
    }

    /// Pre-load windows from history before the stream connects. A key whose
    /// fetch fails starts empty; the live stream seeds it.
    pub async fn warm_start(&self, history: &HistoryClient, keys: &[CandleKey], limit: u32) {
        use futures_util::StreamExt;

        futures_util::stream::iter(keys)
            .for_each_concurrent(WARM_START_CONCURRENCY, |key| async move {
                match history.fetch_closed(key, limit).await {
                    Ok(candles) if candles.is_empty() => {
                        warn!(key = %key, "history returned no candles");
                    }
                    Ok(candles) => self.aggregator.preload(key, candles),
                    Err(e) => {
                        warn!(key = %key, error = %e, "warm start failed; stream will seed the window");
                    }
                }
            })
            .await;

        info!(keys = keys.len(), "warm start complete");
    }

    /// Stop accepting close events and drain in-flight workers, bounded by
    /// [`DRAIN_TIMEOUT`].
    pub async fn shutdown(&self) {
        self.workers.lock().clear();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("close-event drain timed out; abandoning in-flight events");
        } else {
            info!("close-event workers drained");
        }
    }
}
