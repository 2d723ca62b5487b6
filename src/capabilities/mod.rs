//! 能力模块：在 Tool trait 之后实现具体外部 API 调用

pub mod coingecko;

pub use coingecko::{CoinGeckoSettings, GetPrice, GetTokenInfo};
