// =============================================================================
// Shared types used across the Borealis signal engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of a trade signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// The opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Which fusion rule produced a signal.
///
/// Tier 3.5 sits between the indicator-agreement tier and the lone-pattern
/// tier; it is reported as `3.5` everywhere user-facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FusionTier {
    Tier1,
    Tier2,
    Tier3,
    Tier35,
    Tier4,
}

impl FusionTier {
    /// Numeric representation, used for persistence and display.
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Tier1 => 1.0,
            Self::Tier2 => 2.0,
            Self::Tier3 => 3.0,
            Self::Tier35 => 3.5,
            Self::Tier4 => 4.0,
        }
    }

    /// Parse the persisted numeric form back into a tier.
    pub fn from_f64(value: f64) -> Option<Self> {
        match value {
            v if (v - 1.0).abs() < 1e-9 => Some(Self::Tier1),
            v if (v - 2.0).abs() < 1e-9 => Some(Self::Tier2),
            v if (v - 3.0).abs() < 1e-9 => Some(Self::Tier3),
            v if (v - 3.5).abs() < 1e-9 => Some(Self::Tier35),
            v if (v - 4.0).abs() < 1e-9 => Some(Self::Tier4),
            _ => None,
        }
    }
}

impl std::fmt::Display for FusionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tier35 => write!(f, "3.5"),
            other => write!(f, "{}", other.as_f64() as i64),
        }
    }
}

/// Identity of an analyzer inside the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Wyckoff,
    Elliott,
    Rsi,
    Macd,
}

impl AnalyzerKind {
    /// True for the pattern analyzers (Wyckoff, Elliott), false for the
    /// momentum indicators (RSI, MACD).
    pub fn is_pattern(self) -> bool {
        matches!(self, Self::Wyckoff | Self::Elliott)
    }
}

impl std::fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wyckoff => write!(f, "wyckoff"),
            Self::Elliott => write!(f, "elliott"),
            Self::Rsi => write!(f, "rsi"),
            Self::Macd => write!(f, "macd"),
        }
    }
}

/// Verdict of a single analyzer for one close event.
///
/// `direction == None` always carries `confidence == 0.0`; the constructors
/// enforce this so downstream consumers never need to re-check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerResult {
    pub direction: Option<Direction>,
    pub confidence: f64,
    /// Short human-readable explanation ("spring @ 41250.0, vol x2.1").
    pub detail: String,
}

impl AnalyzerResult {
    /// A directional verdict. Confidence is clamped to `[0, 1]`.
    pub fn signal(direction: Direction, confidence: f64, detail: impl Into<String>) -> Self {
        Self {
            direction: Some(direction),
            confidence: confidence.clamp(0.0, 1.0),
            detail: detail.into(),
        }
    }

    /// No signal. Confidence is zero by construction.
    pub fn none(detail: impl Into<String>) -> Self {
        Self {
            direction: None,
            confidence: 0.0,
            detail: detail.into(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.direction.is_none()
    }

    /// True when this result points in `direction`.
    pub fn agrees_with(&self, direction: Direction) -> bool {
        self.direction == Some(direction)
    }

    /// True when this result points against `direction`.
    pub fn opposes(&self, direction: Direction) -> bool {
        self.direction == Some(direction.opposite())
    }
}

/// The emitted artifact of the fusion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Client-side id; the store assigns its own row id on insert.
    pub id: uuid::Uuid,
    pub symbol: String,
    pub timeframe: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    pub confidence: f64,
    pub fusion_tier: FusionTier,
    /// Human-readable explanation of the matched tier.
    pub fusion_reason: String,
    /// Per-analyzer sub-results that fed the decision.
    pub analyzer_results: Vec<(AnalyzerKind, AnalyzerResult)>,
    /// Milliseconds since epoch, UTC.
    pub generated_at: i64,
}

impl Signal {
    /// Check the level-ordering invariant:
    /// LONG  => SL < entry < TP1 < TP2 < TP3
    /// SHORT => SL > entry > TP1 > TP2 > TP3
    pub fn levels_ordered(&self) -> bool {
        match self.direction {
            Direction::Long => {
                self.stop_loss < self.entry_price
                    && self.entry_price < self.take_profit_1
                    && self.take_profit_1 < self.take_profit_2
                    && self.take_profit_2 < self.take_profit_3
            }
            Direction::Short => {
                self.stop_loss > self.entry_price
                    && self.entry_price > self.take_profit_1
                    && self.take_profit_1 > self.take_profit_2
                    && self.take_profit_2 > self.take_profit_3
            }
        }
    }
}
