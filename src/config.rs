// =============================================================================
// Bot configuration — JSON file + env overrides, validated at startup
// =============================================================================
//
// Every field carries a serde default so older config files keep loading
// after new fields are added. `validate()` runs once at startup; any
// violation aborts the process with a descriptive message.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fusion::FusionConfig;
use crate::market_data::candle::is_valid_timeframe;
use crate::market_data::CandleKey;

// =============================================================================
// Default-value helpers (required by serde `default = "..."`)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_timeframes() -> Vec<String> {
    vec!["15m".to_string(), "1h".to_string(), "4h".to_string()]
}

fn default_window_size() -> usize {
    500
}

fn default_startup_candles() -> u32 {
    500
}

fn default_min_candles() -> usize {
    100
}

fn default_min_confidence() -> f64 {
    0.55
}

fn default_cooldown_seconds() -> i64 {
    300
}

fn default_conflict_window_seconds() -> i64 {
    3600
}

fn default_atr_sl_mult() -> f64 {
    2.0
}

fn default_atr_tp_mult() -> f64 {
    3.0
}

fn default_rsi_solo_min_confidence() -> f64 {
    0.80
}

fn default_macd_solo_min_confidence() -> f64 {
    0.75
}

fn default_database_url() -> String {
    "sqlite://data/borealis.db".to_string()
}

fn default_status_interval_seconds() -> u64 {
    60
}

// =============================================================================
// BotConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    // --- Universe -----------------------------------------------------------

    /// USDT-quoted symbols to monitor.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Timeframe tags to subscribe per symbol.
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,

    // --- Windows ------------------------------------------------------------

    /// Maximum closed candles retained per (symbol, timeframe).
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Candles fetched per key for the warm start.
    #[serde(default = "default_startup_candles")]
    pub startup_candles: u32,

    /// Minimum window length before a close event is analyzed.
    #[serde(default = "default_min_candles")]
    pub min_candles: usize,

    // --- Fusion -------------------------------------------------------------

    /// Candidates below this confidence are rejected.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Minimum seconds between signals for the same (symbol, timeframe).
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: i64,

    /// Block opposite-direction signals for a symbol inside the window below.
    #[serde(default = "default_true")]
    pub prevent_conflicts: bool,

    /// Seconds an emitted direction blocks the opposite one per symbol.
    #[serde(default = "default_conflict_window_seconds")]
    pub conflict_window_seconds: i64,

    /// Stop-loss distance in ATR multiples.
    #[serde(default = "default_atr_sl_mult")]
    pub atr_sl_mult: f64,

    /// Take-profit-1 distance in ATR multiples (TP2/TP3 are 2x and 3x it).
    #[serde(default = "default_atr_tp_mult")]
    pub atr_tp_mult: f64,

    /// Solo gate for a lone RSI signal (tier 3.5).
    #[serde(default = "default_rsi_solo_min_confidence")]
    pub rsi_solo_min_confidence: f64,

    /// Solo gate for a lone MACD signal (tier 3.5).
    #[serde(default = "default_macd_solo_min_confidence")]
    pub macd_solo_min_confidence: f64,

    // --- Analyzer toggles ---------------------------------------------------

    #[serde(default = "default_true")]
    pub enable_wyckoff: bool,

    #[serde(default = "default_true")]
    pub enable_elliott: bool,

    #[serde(default = "default_true")]
    pub enable_rsi: bool,

    #[serde(default = "default_true")]
    pub enable_macd: bool,

    // --- Infrastructure -----------------------------------------------------

    /// SQLite connection string for the signal store.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Webhook endpoint for emitted signals. None disables publication.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Seconds between status log lines.
    #[serde(default = "default_status_interval_seconds")]
    pub status_interval_seconds: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults always deserialize")
    }
}

impl BotConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            timeframes = ?config.timeframes,
            "config loaded"
        );
        Ok(config)
    }

    /// Apply environment overrides on top of the loaded file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(symbols) = std::env::var("BOREALIS_SYMBOLS") {
            let parsed: Vec<String> = symbols
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.symbols = parsed;
            }
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                self.database_url = url;
            }
        }
        if let Ok(url) = std::env::var("BOREALIS_WEBHOOK_URL") {
            if !url.is_empty() {
                self.webhook_url = Some(url);
            }
        }
    }

    /// Startup validation. Any error here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("config: symbols must not be empty");
        }
        for symbol in &self.symbols {
            if symbol.trim().is_empty()
                || *symbol != symbol.to_uppercase()
                || !symbol.ends_with("USDT")
            {
                bail!("config: symbol {symbol:?} must be an uppercase USDT-quoted ticker");
            }
        }

        if self.timeframes.is_empty() {
            bail!("config: timeframes must not be empty");
        }
        for timeframe in &self.timeframes {
            if !is_valid_timeframe(timeframe) {
                bail!("config: unknown timeframe tag {timeframe:?}");
            }
        }

        if self.window_size < 100 {
            bail!(
                "config: window_size {} below the minimum usable 100",
                self.window_size
            );
        }
        if self.min_candles == 0 || self.min_candles > self.window_size {
            bail!(
                "config: min_candles {} must be in 1..={}",
                self.min_candles,
                self.window_size
            );
        }
        if self.startup_candles == 0 {
            bail!("config: startup_candles must be positive");
        }

        if !(0.0..=1.0).contains(&self.min_confidence) || self.min_confidence == 0.0 {
            bail!(
                "config: min_confidence {} must be in (0, 1]",
                self.min_confidence
            );
        }
        for (name, gate) in [
            ("rsi_solo_min_confidence", self.rsi_solo_min_confidence),
            ("macd_solo_min_confidence", self.macd_solo_min_confidence),
        ] {
            if !(0.0..=1.0).contains(&gate) {
                bail!("config: {name} {gate} must be in [0, 1]");
            }
        }

        if self.cooldown_seconds < 0 {
            bail!("config: cooldown_seconds must not be negative");
        }
        if self.conflict_window_seconds < 0 {
            bail!("config: conflict_window_seconds must not be negative");
        }

        if !(self.atr_sl_mult > 0.0) || !(self.atr_tp_mult > 0.0) {
            bail!("config: ATR multipliers must be positive");
        }

        Ok(())
    }

    /// Every (symbol, timeframe) pair the engine subscribes to.
    pub fn stream_keys(&self) -> Vec<CandleKey> {
        let mut keys = Vec::with_capacity(self.symbols.len() * self.timeframes.len());
        for symbol in &self.symbols {
            for timeframe in &self.timeframes {
                keys.push(CandleKey::new(symbol.clone(), timeframe.clone()));
            }
        }
        keys
    }

    /// The slice of this config the fuser consumes.
    pub fn fusion(&self) -> FusionConfig {
        FusionConfig {
            min_candles: self.min_candles,
            min_confidence: self.min_confidence,
            cooldown_seconds: self.cooldown_seconds,
            prevent_conflicts: self.prevent_conflicts,
            conflict_window_seconds: self.conflict_window_seconds,
            atr_sl_mult: self.atr_sl_mult,
            atr_tp_mult: self.atr_tp_mult,
            rsi_solo_min_confidence: self.rsi_solo_min_confidence,
            macd_solo_min_confidence: self.macd_solo_min_confidence,
            enable_wyckoff: self.enable_wyckoff,
            enable_elliott: self.enable_elliott,
            enable_rsi: self.enable_rsi,
            enable_macd: self.enable_macd,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.symbols.len(), 5);
        assert_eq!(cfg.timeframes, vec!["15m", "1h", "4h"]);
        assert_eq!(cfg.window_size, 500);
        assert_eq!(cfg.startup_candles, 500);
        assert_eq!(cfg.min_candles, 100);
        assert!((cfg.min_confidence - 0.55).abs() < f64::EPSILON);
        assert_eq!(cfg.cooldown_seconds, 300);
        assert!(cfg.prevent_conflicts);
        assert_eq!(cfg.conflict_window_seconds, 3600);
        assert!((cfg.atr_sl_mult - 2.0).abs() < f64::EPSILON);
        assert!((cfg.atr_tp_mult - 3.0).abs() < f64::EPSILON);
        assert!(cfg.enable_wyckoff && cfg.enable_elliott && cfg.enable_rsi && cfg.enable_macd);
        assert!(cfg.webhook_url.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: BotConfig = serde_json::from_str(
            r#"{ "symbols": ["DOGEUSDT"], "min_confidence": 0.6 }"#,
        )
        .unwrap();
        assert_eq!(cfg.symbols, vec!["DOGEUSDT"]);
        assert!((cfg.min_confidence - 0.6).abs() < f64::EPSILON);
        assert_eq!(cfg.cooldown_seconds, 300);
        assert!(cfg.enable_macd);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = BotConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: BotConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, back.symbols);
        assert_eq!(cfg.timeframes, back.timeframes);
        assert_eq!(cfg.window_size, back.window_size);
    }

    #[test]
    fn validation_rejects_bad_symbols() {
        let mut cfg = BotConfig::default();
        cfg.symbols = vec!["btcusdt".into()];
        assert!(cfg.validate().is_err());

        cfg.symbols = vec!["BTCEUR".into()];
        assert!(cfg.validate().is_err());

        cfg.symbols = vec![];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_timeframes() {
        let mut cfg = BotConfig::default();
        cfg.timeframes = vec!["7m".into()];
        assert!(cfg.validate().is_err());

        cfg.timeframes = vec![];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_inconsistent_windows() {
        let mut cfg = BotConfig::default();
        cfg.window_size = 50;
        assert!(cfg.validate().is_err());

        let mut cfg = BotConfig::default();
        cfg.min_candles = 600; // above window_size 500
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_thresholds() {
        let mut cfg = BotConfig::default();
        cfg.min_confidence = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = BotConfig::default();
        cfg.min_confidence = 1.2;
        assert!(cfg.validate().is_err());

        let mut cfg = BotConfig::default();
        cfg.atr_sl_mult = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = BotConfig::default();
        cfg.cooldown_seconds = -5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn stream_keys_is_the_cartesian_product() {
        let mut cfg = BotConfig::default();
        cfg.symbols = vec!["BTCUSDT".into(), "ETHUSDT".into()];
        cfg.timeframes = vec!["1h".into(), "4h".into()];

        let keys = cfg.stream_keys();
        assert_eq!(keys.len(), 4);
        assert!(keys.contains(&CandleKey::new("ETHUSDT", "4h")));
    }

    #[test]
    fn fusion_view_mirrors_fields() {
        let mut cfg = BotConfig::default();
        cfg.min_confidence = 0.7;
        cfg.enable_elliott = false;
        let fusion = cfg.fusion();
        assert!((fusion.min_confidence - 0.7).abs() < f64::EPSILON);
        assert!(!fusion.enable_elliott);
        assert!(fusion.enable_wyckoff);
    }
}
