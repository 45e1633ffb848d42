// =============================================================================
// Pattern & momentum analyzers
// =============================================================================
//
// Each analyzer is a pure function over a window snapshot: equal windows in,
// equal verdicts out. The fuser owns the suite and treats any analyzer
// failure as a None verdict so one detector can never abort the others.

pub mod elliott;
pub mod momentum;
pub mod wyckoff;

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::market_data::{Candle, CandleKey};
use crate::types::{AnalyzerKind, AnalyzerResult};

pub use elliott::ElliottAnalyzer;
pub use momentum::{MacdAnalyzer, RsiAnalyzer};
pub use wyckoff::WyckoffAnalyzer;

/// A technical detector producing one verdict per close event.
pub trait CandleAnalyzer: Send + Sync {
    fn kind(&self) -> AnalyzerKind;

    /// Analyze the closed-candle window (oldest first, the committed candle
    /// last). Must be deterministic and side-effect free.
    fn analyze(&self, window: &[Candle], key: &CandleKey) -> AnalyzerResult;
}

/// Run one analyzer, converting a panic into a None verdict with an ERROR
/// log. Analyzers are pure, so unwinding here cannot leave shared state
/// inconsistent.
pub fn run_guarded(
    analyzer: &dyn CandleAnalyzer,
    window: &[Candle],
    key: &CandleKey,
) -> AnalyzerResult {
    match catch_unwind(AssertUnwindSafe(|| analyzer.analyze(window, key))) {
        Ok(result) => result,
        Err(_) => {
            error!(analyzer = %analyzer.kind(), key = %key, "analyzer panicked; treating as no signal");
            AnalyzerResult::none("analyzer failure")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    struct Panicking;
    impl CandleAnalyzer for Panicking {
        fn kind(&self) -> AnalyzerKind {
            AnalyzerKind::Wyckoff
        }
        fn analyze(&self, _window: &[Candle], _key: &CandleKey) -> AnalyzerResult {
            panic!("boom");
        }
    }

    struct Fixed;
    impl CandleAnalyzer for Fixed {
        fn kind(&self) -> AnalyzerKind {
            AnalyzerKind::Rsi
        }
        fn analyze(&self, _window: &[Candle], _key: &CandleKey) -> AnalyzerResult {
            AnalyzerResult::signal(Direction::Long, 0.6, "fixed")
        }
    }

    #[test]
    fn panic_becomes_none_verdict() {
        let key = CandleKey::new("BTCUSDT", "1h");
        let result = run_guarded(&Panicking, &[], &key);
        assert!(result.is_none());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn healthy_analyzer_passes_through() {
        let key = CandleKey::new("BTCUSDT", "1h");
        let result = run_guarded(&Fixed, &[], &key);
        assert_eq!(result.direction, Some(Direction::Long));
    }
}
