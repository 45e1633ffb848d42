// =============================================================================
// Technical indicators
// =============================================================================
//
// Pure, side-effect-free functions over slices of closes or candles. Every
// entry point returns `Option<T>` or an empty series when the input is too
// short or a value goes non-finite; nothing here panics on market data.

pub mod atr;
pub mod ema;
pub mod macd;
pub mod rsi;

pub use atr::atr;
pub use ema::{ema_series, sma};
pub use macd::{macd_last_two, macd_series, MacdPoint};
pub use rsi::{rsi_last, rsi_series};
