pub mod aggregator;
pub mod candle;
pub mod history;
pub mod stream;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Candle`).
pub use aggregator::CandleAggregator;
pub use candle::{Candle, CandleKey, KlineUpdate};
pub use history::HistoryClient;
