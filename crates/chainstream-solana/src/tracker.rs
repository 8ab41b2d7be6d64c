//! `PriceTracker`: stream handler that turns forward blocks into price
//! observations for one mint.

use async_trait::async_trait;

use chainstream_core::error::StreamError;
use chainstream_core::handler::StreamHandlers;
use chainstream_core::registry::TypeRegistry;
use chainstream_core::types::{BlockRange, ForwardData, ModulesProgress, UndoSignal};

use crate::price::{PriceObservation, PriceSeries};
use crate::trade::block_trade;

/// Receives what the tracker produces.
#[async_trait]
pub trait PriceSink: Send {
    async fn on_observation(&mut self, observation: &PriceObservation) -> Result<(), StreamError>;

    /// Blocks in `invalidated` are no longer canonical. Anything derived from
    /// them downstream should be reverted.
    async fn on_reorg(&mut self, invalidated: BlockRange) -> Result<(), StreamError> {
        let _ = invalidated;
        Ok(())
    }
}

/// Builds a gap-filled price series for one mint.
///
/// On an undo signal the series drops every observation from the first
/// invalid block on, so the canonical blocks that follow are priced against
/// the last valid observation. The sink is told about the invalidated range
/// before any replacement observation reaches it.
pub struct PriceTracker<S> {
    mint: String,
    series: PriceSeries,
    sink: S,
}

impl<S: PriceSink> PriceTracker<S> {
    pub fn new(mint: impl Into<String>, sink: S) -> Self {
        Self {
            mint: mint.into(),
            series: PriceSeries::new(),
            sink,
        }
    }

    pub fn mint(&self) -> &str {
        &self.mint
    }

    pub fn series(&self) -> &PriceSeries {
        &self.series
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_parts(self) -> (PriceSeries, S) {
        (self.series, self.sink)
    }
}

#[async_trait]
impl<S: PriceSink> StreamHandlers for PriceTracker<S> {
    async fn on_forward_data(
        &mut self,
        data: &ForwardData,
        registry: &TypeRegistry,
    ) -> Result<(), StreamError> {
        let trade = block_trade(data, registry, &self.mint)?;
        let Some(observation) = self.series.observe(data.block_number(), trade.as_ref())? else {
            return Ok(());
        };
        self.series = std::mem::take(&mut self.series).append(observation.clone());
        self.sink.on_observation(&observation).await
    }

    async fn on_undo_signal(
        &mut self,
        signal: &UndoSignal,
        invalidated: BlockRange,
    ) -> Result<(), StreamError> {
        let before = self.series.len();
        self.series = std::mem::take(&mut self.series).truncate_from(signal.first_invalid_block());
        tracing::info!(
            mint = %self.mint,
            dropped = before - self.series.len(),
            first_invalid = signal.first_invalid_block(),
            "price series reverted"
        );
        self.sink.on_reorg(invalidated).await
    }

    async fn on_progress(&mut self, progress: &ModulesProgress) -> Result<(), StreamError> {
        for module in &progress.modules {
            tracing::debug!(
                module = %module.name,
                processed = module.processed_blocks,
                bytes = module.bytes_read,
                "module progress"
            );
        }
        Ok(())
    }
}
