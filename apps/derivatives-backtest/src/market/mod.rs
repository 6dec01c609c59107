//! Market data model and the collaborators that feed the engine.
//!
//! - [`PriceSeries`]: validated OHLCV bars for one instrument
//! - [`PositionSeries`]: per-bar target positions
//! - [`MarketDataProvider`]: source of price series
//! - [`Strategy`]: source of position series

mod bar;
mod position;
mod provider;
mod strategy;

pub use bar::{Bar, PriceSeries};
pub use position::{PositionEntry, PositionSeries};
pub use provider::{
    API_KEY_ENV, BASE_URL_ENV, Frequency, InMemoryProvider, MarketDataProvider, ProviderContext,
};
pub use strategy::Strategy;
