//! The `StreamTransport` trait: the driver's only view of the network.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StreamError;
use crate::request::StreamRequest;
use crate::types::InboundEnvelope;

/// Inbound envelopes in delivery order. The stream ending (`None`) means the
/// server finished the request cleanly.
pub type EnvelopeStream = BoxStream<'static, Result<InboundEnvelope, StreamError>>;

/// An authenticated, server-streaming channel.
///
/// `open` is called once per connection attempt. Errors from `open` or from
/// the returned stream are classified by [`StreamError::is_retryable`].
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn StreamTransport>`.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, request: &StreamRequest) -> Result<EnvelopeStream, StreamError>;

    /// The endpoint this transport connects to.
    fn endpoint(&self) -> &str;
}

#[async_trait]
impl<T: StreamTransport + ?Sized> StreamTransport for std::sync::Arc<T> {
    async fn open(&self, request: &StreamRequest) -> Result<EnvelopeStream, StreamError> {
        (**self).open(request).await
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}
