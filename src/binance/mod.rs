pub mod client;
pub mod rate_limit;

pub use client::{BinanceFuturesClient, LongShortSnapshot, PremiumIndex};
pub use rate_limit::RateLimitTracker;
