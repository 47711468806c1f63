// =============================================================================
// Market-data stream — one multiplexed subscription, typed events, routing
// =============================================================================

pub mod dispatcher;
pub mod event;
pub mod router;

pub use dispatcher::{StreamCounters, StreamDispatcher};
pub use event::{KlineEvent, MarkPriceEvent, MarketEvent, TickerEvent, TradeEvent};
pub use router::{EventRouter, RouterConfig};
