//! chainstream-solana: Pump.fun trade decoding and price tracking.
//!
//! ```text
//! ForwardData ──► block_trade (decode + filter by mint, last wins)
//!                      │
//!                      ▼
//!             PriceSeries::observe ──► PriceObservation ──► PriceSink
//! ```

pub mod price;
pub mod tracker;
pub mod trade;

pub use price::{next_observation, PriceObservation, PriceSeries};
pub use tracker::{PriceSink, PriceTracker};
pub use trade::{block_trade, extract_trades, last_trade_for, TradeEvent};
