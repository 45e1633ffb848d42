// =============================================================================
// Signal fuser — tiered combination of analyzer verdicts
// =============================================================================
//
// Every close event runs the enabled analyzers over the window snapshot and
// feeds their verdicts through a tier table (first match wins):
//
//   1    Wyckoff and Elliott agree          avg + 0.05 per agreeing indicator
//   2    one pattern + RSI and MACD agree   avg of the three
//   3    RSI and MACD agree, no pattern     avg of the two
//   3.5  a lone momentum signal over its solo gate        conf * 0.85
//   4    a lone pattern signal over its solo gate         conf * 0.90
//
// A matched candidate still has to survive, in order: the contradiction veto
// (any present analyzer pointing the other way), the confidence floor, the
// per-(symbol, timeframe) cooldown, the per-symbol opposite-direction
// conflict window, and level computation (ATR must produce a positive risk).
// Emitting updates the cooldown and conflict stamps, inserts the signal into
// the store, and hands it to the notifier; every other exit leaves state
// untouched and bumps a per-reason reject counter.
//
// Close events for keys that share a symbol are linearized behind a
// per-symbol async lock so conflict checks always observe the previous
// emission completed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::analyzers::{
    run_guarded, CandleAnalyzer, ElliottAnalyzer, MacdAnalyzer, RsiAnalyzer, WyckoffAnalyzer,
};
use crate::indicators::atr;
use crate::market_data::{Candle, CandleKey};
use crate::notify::SignalNotifier;
use crate::store::SignalStore;
use crate::types::{AnalyzerKind, AnalyzerResult, Direction, FusionTier, Signal};

/// ATR look-back for level sizing.
const ATR_PERIOD: usize = 14;
/// Solo gate for a lone pattern signal (tier 4).
const PATTERN_SOLO_MIN_CONFIDENCE: f64 = 0.75;
/// Tier-1 confidence never exceeds this cap.
const TIER1_CONFIDENCE_CAP: f64 = 0.95;
/// Store insert attempts before giving up on a signal row.
const INSERT_ATTEMPTS: u32 = 3;

/// Tunables the fuser needs, lifted from the bot configuration.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub min_candles: usize,
    pub min_confidence: f64,
    pub cooldown_seconds: i64,
    pub prevent_conflicts: bool,
    pub conflict_window_seconds: i64,
    pub atr_sl_mult: f64,
    pub atr_tp_mult: f64,
    pub rsi_solo_min_confidence: f64,
    pub macd_solo_min_confidence: f64,
    pub enable_wyckoff: bool,
    pub enable_elliott: bool,
    pub enable_rsi: bool,
    pub enable_macd: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_candles: 100,
            min_confidence: 0.55,
            cooldown_seconds: 300,
            prevent_conflicts: true,
            conflict_window_seconds: 3600,
            atr_sl_mult: 2.0,
            atr_tp_mult: 3.0,
            rsi_solo_min_confidence: 0.80,
            macd_solo_min_confidence: 0.75,
            enable_wyckoff: true,
            enable_elliott: true,
            enable_rsi: true,
            enable_macd: true,
        }
    }
}

/// Why a candidate was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InsufficientData,
    NoTier,
    Contradiction,
    LowConfidence,
    Cooldown,
    Conflict,
    DegenerateLevels,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientData => "insufficient-data",
            Self::NoTier => "no-tier",
            Self::Contradiction => "contradiction",
            Self::LowConfidence => "low-confidence",
            Self::Cooldown => "cooldown",
            Self::Conflict => "conflict",
            Self::DegenerateLevels => "degenerate-levels",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one close event.
#[derive(Debug, Clone)]
pub enum FusionOutcome {
    Emitted(Signal),
    Rejected(RejectReason),
}

/// The four verdicts feeding one fusion decision. Disabled analyzers simply
/// hold a None verdict.
#[derive(Debug, Clone)]
pub struct AnalyzerInputs {
    pub wyckoff: AnalyzerResult,
    pub elliott: AnalyzerResult,
    pub rsi: AnalyzerResult,
    pub macd: AnalyzerResult,
}

impl AnalyzerInputs {
    pub fn all_none() -> Self {
        Self {
            wyckoff: AnalyzerResult::none("disabled"),
            elliott: AnalyzerResult::none("disabled"),
            rsi: AnalyzerResult::none("disabled"),
            macd: AnalyzerResult::none("disabled"),
        }
    }

    fn as_pairs(&self) -> [(AnalyzerKind, &AnalyzerResult); 4] {
        [
            (AnalyzerKind::Wyckoff, &self.wyckoff),
            (AnalyzerKind::Elliott, &self.elliott),
            (AnalyzerKind::Rsi, &self.rsi),
            (AnalyzerKind::Macd, &self.macd),
        ]
    }

    /// All analyzers currently signaling, with their kinds.
    fn present(&self) -> Vec<(AnalyzerKind, &AnalyzerResult)> {
        self.as_pairs()
            .into_iter()
            .filter(|(_, r)| !r.is_none())
            .collect()
    }
}

/// Process-local fusion state. Mutated only on emit.
#[derive(Debug, Default)]
struct FuserState {
    last_signal_by_key: HashMap<CandleKey, i64>,
    last_direction_by_symbol: HashMap<String, (Direction, i64)>,
    emitted: u64,
    rejects: HashMap<&'static str, u64>,
}

/// Read-only copy of the fuser state for status consumers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FuserStats {
    pub emitted: u64,
    pub rejects: HashMap<&'static str, u64>,
    pub keys_on_cooldown: usize,
    pub symbols_with_direction: usize,
}

pub struct SignalFuser {
    config: FusionConfig,
    analyzers: Vec<Box<dyn CandleAnalyzer>>,
    state: Mutex<FuserState>,
    symbol_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    store: Arc<dyn SignalStore>,
    notifier: Arc<dyn SignalNotifier>,
}

impl SignalFuser {
    pub fn new(
        config: FusionConfig,
        store: Arc<dyn SignalStore>,
        notifier: Arc<dyn SignalNotifier>,
    ) -> Self {
        let mut analyzers: Vec<Box<dyn CandleAnalyzer>> = Vec::new();
        if config.enable_wyckoff {
            analyzers.push(Box::new(WyckoffAnalyzer::new(config.min_candles)));
        }
        if config.enable_elliott {
            analyzers.push(Box::new(ElliottAnalyzer::new(config.min_candles)));
        }
        if config.enable_rsi {
            analyzers.push(Box::new(RsiAnalyzer::new(config.min_candles)));
        }
        if config.enable_macd {
            analyzers.push(Box::new(MacdAnalyzer::new(config.min_candles)));
        }

        Self {
            config,
            analyzers,
            state: Mutex::new(FuserState::default()),
            symbol_locks: Mutex::new(HashMap::new()),
            store,
            notifier,
        }
    }

    /// Entry point for live close events.
    pub async fn on_candle_close(&self, key: &CandleKey, candle: &Candle, window: &[Candle]) {
        let now_ms = Utc::now().timestamp_millis();
        self.on_candle_close_at(key, candle, window, now_ms).await;
    }

    /// Close-event handler with an explicit clock, shared by tests.
    pub async fn on_candle_close_at(
        &self,
        key: &CandleKey,
        candle: &Candle,
        window: &[Candle],
        now_ms: i64,
    ) -> FusionOutcome {
        if window.len() < self.config.min_candles {
            debug!(key = %key, len = window.len(), "window below analysis minimum");
            return self.reject(key, RejectReason::InsufficientData, false);
        }

        // Linearize per symbol before analysis so a same-symbol emission on
        // another timeframe is fully visible to the conflict check.
        let lock = self.symbol_lock(&key.symbol);
        let _guard = lock.lock().await;

        let inputs = self.run_analyzers(key, window);
        self.process_at(key, candle, window, inputs, now_ms).await
    }

    /// Decide + emit for pre-computed analyzer inputs. Exposed so tests can
    /// drive exact verdicts; production flow always goes through
    /// [`Self::on_candle_close_at`], which already holds the symbol lock.
    pub async fn process_at(
        &self,
        key: &CandleKey,
        candle: &Candle,
        window: &[Candle],
        inputs: AnalyzerInputs,
        now_ms: i64,
    ) -> FusionOutcome {
        match self.decide(key, candle, window, &inputs, now_ms) {
            Ok(signal) => {
                {
                    let mut state = self.state.lock();
                    state.last_signal_by_key.insert(key.clone(), now_ms);
                    state
                        .last_direction_by_symbol
                        .insert(key.symbol.clone(), (signal.direction, now_ms));
                    state.emitted += 1;
                }

                info!(
                    key = %key,
                    direction = %signal.direction,
                    tier = %signal.fusion_tier,
                    confidence = signal.confidence,
                    entry = signal.entry_price,
                    stop_loss = signal.stop_loss,
                    "signal emitted"
                );

                self.persist_signal(&signal).await;
                if let Err(e) = self.notifier.publish_signal(&signal).await {
                    warn!(key = %key, error = %e, "notifier publish failed; signal remains persisted");
                }
                FusionOutcome::Emitted(signal)
            }
            Err(reason) => self.reject(key, reason, true),
        }
    }

    fn reject(&self, key: &CandleKey, reason: RejectReason, log: bool) -> FusionOutcome {
        if log {
            debug!(key = %key, reason = %reason, "candidate rejected");
        }
        let mut state = self.state.lock();
        *state.rejects.entry(reason.as_str()).or_insert(0) += 1;
        FusionOutcome::Rejected(reason)
    }

    fn run_analyzers(&self, key: &CandleKey, window: &[Candle]) -> AnalyzerInputs {
        let mut inputs = AnalyzerInputs::all_none();
        for analyzer in &self.analyzers {
            let result = run_guarded(analyzer.as_ref(), window, key);
            match analyzer.kind() {
                AnalyzerKind::Wyckoff => inputs.wyckoff = result,
                AnalyzerKind::Elliott => inputs.elliott = result,
                AnalyzerKind::Rsi => inputs.rsi = result,
                AnalyzerKind::Macd => inputs.macd = result,
            }
        }
        inputs
    }

    /// The pure decision: tier table, veto, thresholds, state gates, levels.
    fn decide(
        &self,
        key: &CandleKey,
        candle: &Candle,
        window: &[Candle],
        inputs: &AnalyzerInputs,
        now_ms: i64,
    ) -> Result<Signal, RejectReason> {
        let (tier, direction, confidence, reason) =
            self.match_tier(inputs).ok_or(RejectReason::NoTier)?;

        // Veto: any present verdict pointing the other way kills the
        // candidate, whichever tier matched.
        if inputs.present().iter().any(|(_, r)| r.opposes(direction)) {
            return Err(RejectReason::Contradiction);
        }

        if confidence < self.config.min_confidence {
            return Err(RejectReason::LowConfidence);
        }

        {
            let state = self.state.lock();
            if let Some(&last) = state.last_signal_by_key.get(key) {
                if now_ms - last < self.config.cooldown_seconds * 1000 {
                    return Err(RejectReason::Cooldown);
                }
            }
            if self.config.prevent_conflicts {
                if let Some(&(last_dir, at)) = state.last_direction_by_symbol.get(&key.symbol) {
                    if last_dir != direction
                        && now_ms - at < self.config.conflict_window_seconds * 1000
                    {
                        return Err(RejectReason::Conflict);
                    }
                }
            }
        }

        let levels = self.compute_levels(direction, candle.close, window)?;

        let signal = Signal {
            id: uuid::Uuid::new_v4(),
            symbol: key.symbol.clone(),
            timeframe: key.timeframe.clone(),
            direction,
            entry_price: candle.close,
            stop_loss: levels.stop_loss,
            take_profit_1: levels.take_profits[0],
            take_profit_2: levels.take_profits[1],
            take_profit_3: levels.take_profits[2],
            confidence,
            fusion_tier: tier,
            fusion_reason: reason,
            analyzer_results: inputs
                .as_pairs()
                .into_iter()
                .map(|(k, r)| (k, r.clone()))
                .collect(),
            generated_at: now_ms,
        };
        debug_assert!(signal.levels_ordered());
        Ok(signal)
    }

    /// First matching tier, or None.
    fn match_tier(
        &self,
        inputs: &AnalyzerInputs,
    ) -> Option<(FusionTier, Direction, f64, String)> {
        let AnalyzerInputs {
            wyckoff,
            elliott,
            rsi,
            macd,
        } = inputs;

        // Tier 1: the two pattern analyzers agree.
        if let (Some(dw), Some(de)) = (wyckoff.direction, elliott.direction) {
            if dw == de {
                let mut confidence = (wyckoff.confidence + elliott.confidence) / 2.0;
                let mut agreeing = 0;
                for indicator in [rsi, macd] {
                    if indicator.agrees_with(dw) {
                        confidence += 0.05;
                        agreeing += 1;
                    }
                }
                return Some((
                    FusionTier::Tier1,
                    dw,
                    confidence.min(TIER1_CONFIDENCE_CAP),
                    format!("wyckoff and elliott agree on {dw}, {agreeing} indicator(s) confirm"),
                ));
            }
        }

        // Tier 2: a pattern signal backed by both momentum indicators.
        let pattern = if !wyckoff.is_none() {
            Some((AnalyzerKind::Wyckoff, wyckoff))
        } else if !elliott.is_none() {
            Some((AnalyzerKind::Elliott, elliott))
        } else {
            None
        };
        if let Some((kind, p)) = pattern {
            let direction = p.direction.expect("pattern is present");
            if rsi.agrees_with(direction) && macd.agrees_with(direction) {
                let confidence = (p.confidence + rsi.confidence + macd.confidence) / 3.0;
                return Some((
                    FusionTier::Tier2,
                    direction,
                    confidence,
                    format!("{kind} {direction} confirmed by rsi and macd"),
                ));
            }
        }

        // Tier 3: momentum agreement with no pattern in play.
        if wyckoff.is_none() && elliott.is_none() {
            if let (Some(dr), Some(dm)) = (rsi.direction, macd.direction) {
                if dr == dm {
                    let confidence = (rsi.confidence + macd.confidence) / 2.0;
                    return Some((
                        FusionTier::Tier3,
                        dr,
                        confidence,
                        format!("rsi and macd agree on {dr}"),
                    ));
                }
            }
        }

        // Tiers 3.5 / 4: exactly one analyzer signaling, over its solo gate.
        let present = inputs.present();
        if present.len() == 1 {
            let (kind, result) = present[0];
            let direction = result.direction.expect("present implies direction");
            match kind {
                AnalyzerKind::Rsi if result.confidence >= self.config.rsi_solo_min_confidence => {
                    return Some((
                        FusionTier::Tier35,
                        direction,
                        result.confidence * 0.85,
                        format!("rsi alone at {:.2}", result.confidence),
                    ));
                }
                AnalyzerKind::Macd if result.confidence >= self.config.macd_solo_min_confidence => {
                    return Some((
                        FusionTier::Tier35,
                        direction,
                        result.confidence * 0.85,
                        format!("macd alone at {:.2}", result.confidence),
                    ));
                }
                kind if kind.is_pattern() && result.confidence >= PATTERN_SOLO_MIN_CONFIDENCE => {
                    return Some((
                        FusionTier::Tier4,
                        direction,
                        result.confidence * 0.90,
                        format!("{kind} alone at {:.2}", result.confidence),
                    ));
                }
                _ => {}
            }
        }

        None
    }

    fn compute_levels(
        &self,
        direction: Direction,
        entry: f64,
        window: &[Candle],
    ) -> Result<Levels, RejectReason> {
        let Some(atr_value) = atr(window, ATR_PERIOD) else {
            return Err(RejectReason::DegenerateLevels);
        };

        let sl_distance = self.config.atr_sl_mult * atr_value;
        let tp_distance = self.config.atr_tp_mult * atr_value;
        if !(sl_distance > 0.0) || !(tp_distance > 0.0) {
            return Err(RejectReason::DegenerateLevels);
        }

        let levels = match direction {
            Direction::Long => Levels {
                stop_loss: entry - sl_distance,
                take_profits: [
                    entry + tp_distance,
                    entry + 2.0 * tp_distance,
                    entry + 3.0 * tp_distance,
                ],
            },
            Direction::Short => Levels {
                stop_loss: entry + sl_distance,
                take_profits: [
                    entry - tp_distance,
                    entry - 2.0 * tp_distance,
                    entry - 3.0 * tp_distance,
                ],
            },
        };

        // Risk must be strictly positive in the trade direction.
        let risk = match direction {
            Direction::Long => entry - levels.stop_loss,
            Direction::Short => levels.stop_loss - entry,
        };
        if risk > 0.0 {
            Ok(levels)
        } else {
            Err(RejectReason::DegenerateLevels)
        }
    }

    async fn persist_signal(&self, signal: &Signal) {
        let mut backoff = std::time::Duration::from_millis(200);
        for attempt in 1..=INSERT_ATTEMPTS {
            match self.store.insert_signal(signal).await {
                Ok(row_id) => {
                    debug!(signal = %signal.id, row_id, "signal persisted");
                    return;
                }
                Err(e) if e.is_duplicate() => {
                    info!(signal = %signal.id, "signal already stored");
                    return;
                }
                Err(e) => {
                    warn!(signal = %signal.id, attempt, error = %e, "signal insert failed");
                    if attempt < INSERT_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        error!(signal = %signal.id, "signal not persisted after retries");
    }

    fn symbol_lock(&self, symbol: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.symbol_locks
            .lock()
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Copy of the fuser counters for status reporting.
    pub fn stats(&self) -> FuserStats {
        let state = self.state.lock();
        FuserStats {
            emitted: state.emitted,
            rejects: state.rejects.clone(),
            keys_on_cooldown: state.last_signal_by_key.len(),
            symbols_with_direction: state.last_direction_by_symbol.len(),
        }
    }

    /// The last emitted direction for `symbol`, if any.
    #[cfg(test)]
    pub fn last_direction(&self, symbol: &str) -> Option<(Direction, i64)> {
        self.state
            .lock()
            .last_direction_by_symbol
            .get(symbol)
            .copied()
    }
}

struct Levels {
    stop_loss: f64,
    take_profits: [f64; 3],
}
