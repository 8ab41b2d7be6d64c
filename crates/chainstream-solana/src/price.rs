//! Gap-filled price series.
//!
//! Each forward block yields at most one observation. A block with a
//! qualifying trade sets a fresh price; a block without one repeats the
//! previous price marked as carried forward. Before the first trade there is
//! nothing to carry, so no observation is produced.

use serde::{Deserialize, Serialize};

use chainstream_core::error::DecodeError;

use crate::trade::TradeEvent;

/// Price of the monitored asset at one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceObservation {
    pub block_number: u64,
    pub price: f64,
    /// `true` when no trade happened in this block and the price was repeated.
    pub carried_forward: bool,
}

/// Compute the observation for `block_number`.
pub fn next_observation(
    previous: Option<&PriceObservation>,
    block_number: u64,
    trade: Option<&TradeEvent>,
) -> Result<Option<PriceObservation>, DecodeError> {
    match (trade, previous) {
        (Some(trade), _) => Ok(Some(PriceObservation {
            block_number,
            price: trade.price()?,
            carried_forward: false,
        })),
        (None, Some(prev)) => Ok(Some(PriceObservation {
            block_number,
            price: prev.price,
            carried_forward: true,
        })),
        (None, None) => Ok(None),
    }
}

/// Owned, append-only history of observations, ordered by block.
///
/// Mutating operations consume the series and hand back the new state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    observations: Vec<PriceObservation>,
}

impl PriceSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&PriceObservation> {
        self.observations.last()
    }

    pub fn observations(&self) -> &[PriceObservation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// The observation `block_number` would add, or `None` if it adds nothing.
    ///
    /// A block at or below the last observed one is a redelivery and is
    /// ignored, which keeps replays after a reconnect idempotent.
    pub fn observe(
        &self,
        block_number: u64,
        trade: Option<&TradeEvent>,
    ) -> Result<Option<PriceObservation>, DecodeError> {
        if let Some(last) = self.last() {
            if block_number <= last.block_number {
                tracing::debug!(block = block_number, last = last.block_number, "duplicate block ignored");
                return Ok(None);
            }
        }
        next_observation(self.last(), block_number, trade)
    }

    /// Append an observation produced by [`observe`](Self::observe).
    ///
    /// Out-of-order observations are dropped.
    pub fn append(mut self, observation: PriceObservation) -> Self {
        if self
            .last()
            .map_or(true, |last| observation.block_number > last.block_number)
        {
            self.observations.push(observation);
        }
        self
    }

    /// Drop every observation at or after `first_invalid_block`.
    pub fn truncate_from(mut self, first_invalid_block: u64) -> Self {
        let keep = self
            .observations
            .partition_point(|o| o.block_number < first_invalid_block);
        self.observations.truncate(keep);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(sol: u64, token: u64) -> TradeEvent {
        TradeEvent {
            mint: "T".into(),
            sol_amount: sol,
            token_amount: token,
            is_buy: true,
            user: String::new(),
        }
    }

    fn step(series: PriceSeries, block: u64, trade: Option<&TradeEvent>) -> PriceSeries {
        match series.observe(block, trade).unwrap() {
            Some(obs) => series.append(obs),
            None => series,
        }
    }

    #[test]
    fn trade_sets_fresh_price() {
        let obs = next_observation(None, 100, Some(&trade(2, 100))).unwrap().unwrap();
        assert_eq!(obs.block_number, 100);
        assert_eq!(obs.price, 0.02);
        assert!(!obs.carried_forward);
    }

    #[test]
    fn gap_carries_previous_price() {
        let prev = PriceObservation {
            block_number: 100,
            price: 0.5,
            carried_forward: false,
        };
        let obs = next_observation(Some(&prev), 101, None).unwrap().unwrap();
        assert_eq!(obs.price, 0.5);
        assert!(obs.carried_forward);
    }

    #[test]
    fn no_leading_fill() {
        assert!(next_observation(None, 99, None).unwrap().is_none());
    }

    #[test]
    fn zero_token_trade_fails() {
        assert!(next_observation(None, 1, Some(&trade(1, 0))).is_err());
    }

    #[test]
    fn scenario_series() {
        let series = step(PriceSeries::new(), 99, None);
        assert!(series.is_empty());

        let series = step(series, 100, Some(&trade(2, 100)));
        let series = step(series, 101, None);
        assert_eq!(
            series.observations(),
            &[
                PriceObservation {
                    block_number: 100,
                    price: 0.02,
                    carried_forward: false
                },
                PriceObservation {
                    block_number: 101,
                    price: 0.02,
                    carried_forward: true
                },
            ]
        );
    }

    #[test]
    fn redelivered_block_is_ignored() {
        let series = step(PriceSeries::new(), 100, Some(&trade(2, 100)));
        let series = step(series, 101, None);
        let series = step(series, 101, Some(&trade(9, 1)));
        let series = step(series, 100, None);
        assert_eq!(series.len(), 2);
        assert_eq!(series.last().unwrap().price, 0.02);
    }

    #[test]
    fn blocks_stay_ordered() {
        let mut series = PriceSeries::new();
        for block in [10, 12, 11, 15, 15, 14, 20] {
            series = step(series, block, Some(&trade(block, 1)));
        }
        let blocks: Vec<_> = series.observations().iter().map(|o| o.block_number).collect();
        assert_eq!(blocks, vec![10, 12, 15, 20]);
    }

    #[test]
    fn truncate_drops_invalidated_blocks() {
        let mut series = PriceSeries::new();
        for block in 200..=205 {
            series = step(series, block, Some(&trade(1, 1)));
        }
        let series = series.truncate_from(203);
        assert_eq!(series.last().unwrap().block_number, 202);
        assert_eq!(series.len(), 3);

        // Re-applying the invalidated blocks is accepted again.
        let series = step(series, 203, None);
        assert_eq!(series.last().unwrap().block_number, 203);
    }
}
