//! Consumer handler trait + envelope dispatch.

use async_trait::async_trait;

use crate::error::StreamError;
use crate::registry::TypeRegistry;
use crate::types::{BlockRange, ForwardData, InboundEnvelope, ModulesProgress, UndoSignal};

/// The three callbacks a stream consumer provides.
///
/// Handlers are invoked inline by the driver, one envelope at a time and in
/// delivery order; a slow handler stalls the stream. Returning an error
/// terminates the session unless the driver is configured to skip decode
/// failures and the error is a [`StreamError::Decode`].
#[async_trait]
pub trait StreamHandlers: Send {
    /// Block-scoped module output. `registry` decodes the opaque payload.
    async fn on_forward_data(
        &mut self,
        data: &ForwardData,
        registry: &TypeRegistry,
    ) -> Result<(), StreamError>;

    /// Chain reorganization. `invalidated` covers every block delivered in
    /// this session that is no longer canonical.
    async fn on_undo_signal(
        &mut self,
        signal: &UndoSignal,
        invalidated: BlockRange,
    ) -> Result<(), StreamError>;

    /// Server-side progress report.
    async fn on_progress(&mut self, progress: &ModulesProgress) -> Result<(), StreamError> {
        tracing::debug!(modules = progress.modules.len(), "progress");
        Ok(())
    }
}

/// Route one envelope to exactly one handler callback.
///
/// `highest_delivered` is the highest forward block already dispatched in
/// this session; it bounds the invalidated range of an undo signal.
pub async fn dispatch<H: StreamHandlers + ?Sized>(
    handlers: &mut H,
    envelope: &InboundEnvelope,
    registry: &TypeRegistry,
    highest_delivered: Option<u64>,
) -> Result<(), StreamError> {
    match envelope {
        InboundEnvelope::ForwardData(data) => handlers.on_forward_data(data, registry).await,
        InboundEnvelope::UndoSignal(signal) => {
            handlers
                .on_undo_signal(signal, invalidated_range(signal, highest_delivered))
                .await
        }
        InboundEnvelope::Progress(progress) => handlers.on_progress(progress).await,
    }
}

fn invalidated_range(signal: &UndoSignal, highest_delivered: Option<u64>) -> BlockRange {
    let first = signal.first_invalid_block();
    let last = highest_delivered.filter(|h| *h >= first).unwrap_or(first);
    BlockRange::new(first, last)
}
