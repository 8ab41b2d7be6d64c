//! The stream driver: connect, read, dispatch, persist, reconnect.
//!
//! # Session loop
//! 1. Build a request from the newest known cursor (or the start block).
//! 2. Open the transport and read envelopes in order.
//! 3. Dispatch each envelope to the handlers, then advance the cursor.
//! 4. On a retryable error, back off and go to 1. Any other error ends the
//!    session and is returned to the caller.
//!
//! The backoff resets once a connection delivers its first envelope. There
//! is no retry ceiling; a cancelled [`CancellationToken`] ends the session
//! with `Ok(())`.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, BackoffConfig, Sleeper, TokioSleeper};
use crate::config::DEFAULT_OUTPUT_MODULE;
use crate::cursor::{CursorManager, SaveOutcome};
use crate::error::{StreamError, TransportError};
use crate::handler::{dispatch, StreamHandlers};
use crate::package::Package;
use crate::registry::TypeRegistry;
use crate::request::{RequestBuilder, StreamRequest};
use crate::transport::StreamTransport;
use crate::types::{Cursor, InboundEnvelope};

/// Runtime state of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    /// Not yet started.
    Idle,
    /// Opening a connection.
    Connecting,
    /// Reading envelopes.
    Streaming,
    /// Waiting out a reconnect delay.
    Backoff,
    /// Finished, cancelled, or failed fatally.
    Terminated,
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Backoff => write!(f, "backoff"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// What to do when a handler reports a [`StreamError::Decode`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeFailurePolicy {
    /// End the session with the error.
    #[default]
    Abort,
    /// Log, count, advance the cursor past the envelope and keep streaming.
    Skip,
}

/// Configuration for a [`StreamDriver`].
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Reference the server resolves the package from.
    pub package_reference: String,
    /// Output module to stream.
    pub output_module: String,
    /// First block when no cursor is available.
    pub start_block: u64,
    /// Optional last block. `None` = stream forever.
    pub stop_block: Option<u64>,
    pub production_mode: bool,
    pub backoff: BackoffConfig,
    pub decode_failure: DecodeFailurePolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            package_reference: String::new(),
            output_module: DEFAULT_OUTPUT_MODULE.into(),
            start_block: 0,
            stop_block: None,
            production_mode: false,
            backoff: BackoffConfig::default(),
            decode_failure: DecodeFailurePolicy::Abort,
        }
    }
}

/// Counters for one driver session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetrics {
    pub connection_attempts: u64,
    pub reconnects: u64,
    pub envelopes: u64,
    pub forward_blocks: u64,
    pub undo_signals: u64,
    pub progress_messages: u64,
    pub cursor_save_failures: u64,
    pub skipped_envelopes: u64,
}

enum ConnectionEnd {
    /// The server finished a bounded request.
    Completed,
    Cancelled,
}

/// Owns one streaming session.
pub struct StreamDriver {
    config: DriverConfig,
    package: Arc<Package>,
    registry: Arc<TypeRegistry>,
    transport: Arc<dyn StreamTransport>,
    cursors: Option<CursorManager>,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
    state: DriverState,
    metrics: StreamMetrics,
    cursor: Option<Cursor>,
    highest_delivered: Option<u64>,
}

impl std::fmt::Debug for StreamDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDriver")
            .field("endpoint", &self.transport.endpoint())
            .field("module", &self.config.output_module)
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl StreamDriver {
    pub fn builder(
        transport: Arc<dyn StreamTransport>,
        package: Arc<Package>,
    ) -> StreamDriverBuilder {
        StreamDriverBuilder::new(transport, package)
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn metrics(&self) -> StreamMetrics {
        self.metrics
    }

    /// The newest cursor the session has acknowledged.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the session until completion, cancellation, or a fatal error.
    pub async fn run<H: StreamHandlers + ?Sized>(
        &mut self,
        handlers: &mut H,
    ) -> Result<(), StreamError> {
        if let Some(mgr) = &self.cursors {
            if let Some(saved) = mgr.load().await? {
                tracing::info!(
                    key = %mgr.key(),
                    block = saved.block_number,
                    "resuming from saved cursor"
                );
                // Blocks up to the saved cursor reached the consumer last session.
                self.highest_delivered = Some(saved.block_number);
                self.cursor = Some(saved);
            }
        }

        let mut backoff = Backoff::new(self.config.backoff.clone());
        loop {
            if self.cancel.is_cancelled() {
                self.terminate("cancelled");
                return Ok(());
            }

            let request = self.request()?;
            self.state = DriverState::Connecting;
            self.metrics.connection_attempts += 1;
            if self.metrics.connection_attempts > 1 {
                self.metrics.reconnects += 1;
            }
            tracing::info!(
                endpoint = self.transport.endpoint(),
                module = %request.output_module,
                block = request.start_block(),
                attempt = self.metrics.connection_attempts,
                "connecting"
            );

            match self.connection(&request, handlers, &mut backoff).await {
                Ok(ConnectionEnd::Completed) => {
                    self.terminate("completed");
                    return Ok(());
                }
                Ok(ConnectionEnd::Cancelled) => {
                    self.terminate("cancelled");
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    self.state = DriverState::Backoff;
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "stream interrupted; reconnecting"
                    );
                    let cancelled = tokio::select! {
                        _ = self.cancel.cancelled() => true,
                        _ = self.sleeper.sleep(delay) => false,
                    };
                    if cancelled {
                        self.terminate("cancelled");
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "stream failed");
                    self.state = DriverState::Terminated;
                    return Err(e);
                }
            }
        }
    }

    fn request(&self) -> Result<StreamRequest, StreamError> {
        RequestBuilder::new(&self.config.package_reference, &self.config.output_module)
            .start_block(self.config.start_block)
            .cursor(self.cursor.clone())
            .production_mode(self.config.production_mode)
            .stop_block(self.config.stop_block)
            .build(&self.package, &self.registry)
    }

    async fn connection<H: StreamHandlers + ?Sized>(
        &mut self,
        request: &StreamRequest,
        handlers: &mut H,
        backoff: &mut Backoff,
    ) -> Result<ConnectionEnd, StreamError> {
        let cancel = self.cancel.clone();
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(ConnectionEnd::Cancelled),
            opened = self.transport.open(request) => opened?,
        };

        let mut first = true;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(ConnectionEnd::Cancelled),
                item = stream.next() => item,
            };
            let envelope = match next {
                Some(item) => item?,
                None if self.config.stop_block.is_some() => return Ok(ConnectionEnd::Completed),
                None => {
                    return Err(TransportError::Reset("stream closed by server".into()).into())
                }
            };
            if first {
                self.state = DriverState::Streaming;
                backoff.reset();
                first = false;
            }
            self.handle(handlers, envelope).await?;
        }
    }

    async fn handle<H: StreamHandlers + ?Sized>(
        &mut self,
        handlers: &mut H,
        envelope: InboundEnvelope,
    ) -> Result<(), StreamError> {
        self.metrics.envelopes += 1;
        match dispatch(handlers, &envelope, &self.registry, self.highest_delivered).await {
            Ok(()) => {}
            Err(e) if e.is_decode() && self.config.decode_failure == DecodeFailurePolicy::Skip => {
                tracing::warn!(kind = envelope.kind(), error = %e, "skipping undecodable envelope");
                self.metrics.skipped_envelopes += 1;
            }
            Err(e) => return Err(e),
        }

        match envelope {
            InboundEnvelope::ForwardData(data) => {
                self.metrics.forward_blocks += 1;
                let block = data.block_number();
                self.highest_delivered = Some(self.highest_delivered.map_or(block, |h| h.max(block)));
                self.advance(data.cursor).await;
            }
            InboundEnvelope::UndoSignal(undo) => {
                self.metrics.undo_signals += 1;
                tracing::warn!(
                    last_valid = undo.last_valid_block.number,
                    highest = ?self.highest_delivered,
                    "undo signal"
                );
                self.highest_delivered = Some(undo.last_valid_block.number);
                self.rewind(undo.last_valid_cursor).await;
            }
            InboundEnvelope::Progress(_) => self.metrics.progress_messages += 1,
        }
        Ok(())
    }

    /// Save failures are logged and counted; the session keeps going.
    async fn advance(&mut self, cursor: Cursor) {
        if let Some(mgr) = &self.cursors {
            match mgr.save(&cursor).await {
                Ok(SaveOutcome::Saved) => {}
                Ok(SaveOutcome::Stale) => {
                    tracing::debug!(block = cursor.block_number, "cursor behind stored; not saved")
                }
                Err(e) => {
                    self.metrics.cursor_save_failures += 1;
                    tracing::warn!(block = cursor.block_number, error = %e, "cursor save failed");
                }
            }
        }
        self.cursor = Some(cursor);
    }

    async fn rewind(&mut self, cursor: Cursor) {
        if let Some(mgr) = &self.cursors {
            if let Err(e) = mgr.rewind(&cursor).await {
                self.metrics.cursor_save_failures += 1;
                tracing::warn!(block = cursor.block_number, error = %e, "cursor rewind failed");
            }
        }
        self.cursor = Some(cursor);
    }

    fn terminate(&mut self, reason: &str) {
        self.state = DriverState::Terminated;
        tracing::info!(
            reason,
            blocks = self.metrics.forward_blocks,
            reconnects = self.metrics.reconnects,
            "stream terminated"
        );
    }
}

/// Fluent builder for [`StreamDriver`].
pub struct StreamDriverBuilder {
    transport: Arc<dyn StreamTransport>,
    package: Arc<Package>,
    registry: Option<Arc<TypeRegistry>>,
    config: DriverConfig,
    cursors: Option<CursorManager>,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
}

impl StreamDriverBuilder {
    pub fn new(transport: Arc<dyn StreamTransport>, package: Arc<Package>) -> Self {
        Self {
            transport,
            package,
            registry: None,
            config: DriverConfig::default(),
            cursors: None,
            sleeper: Arc::new(TokioSleeper),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the whole config.
    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn package_reference(mut self, reference: impl Into<String>) -> Self {
        self.config.package_reference = reference.into();
        self
    }

    pub fn output_module(mut self, module: impl Into<String>) -> Self {
        self.config.output_module = module.into();
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    pub fn stop_block(mut self, block: u64) -> Self {
        self.config.stop_block = Some(block);
        self
    }

    pub fn production_mode(mut self, enabled: bool) -> Self {
        self.config.production_mode = enabled;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn decode_failure(mut self, policy: DecodeFailurePolicy) -> Self {
        self.config.decode_failure = policy;
        self
    }

    /// Use a prebuilt registry instead of deriving one from the package.
    pub fn registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Persist cursors through `manager`; without one, resume state lives
    /// only for the lifetime of the driver.
    pub fn cursor_store(mut self, manager: CursorManager) -> Self {
        self.cursors = Some(manager);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Build the driver, checking the output module against the package.
    pub fn build(self) -> Result<StreamDriver, StreamError> {
        let registry = match self.registry {
            Some(r) => r,
            None => Arc::new(TypeRegistry::from_package(&self.package)?),
        };
        RequestBuilder::new(&self.config.package_reference, &self.config.output_module)
            .start_block(self.config.start_block)
            .stop_block(self.config.stop_block)
            .build(&self.package, &registry)?;

        Ok(StreamDriver {
            config: self.config,
            package: self.package,
            registry,
            transport: self.transport,
            cursors: self.cursors,
            sleeper: self.sleeper,
            cancel: self.cancel,
            state: DriverState::Idle,
            metrics: StreamMetrics::default(),
            cursor: None,
            highest_delivered: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PackageError;
    use crate::package::tests::pump_package;
    use crate::transport::EnvelopeStream;
    use async_trait::async_trait;

    struct NeverTransport;

    #[async_trait]
    impl StreamTransport for NeverTransport {
        async fn open(&self, _request: &StreamRequest) -> Result<EnvelopeStream, StreamError> {
            Ok(futures::stream::pending().boxed())
        }

        fn endpoint(&self) -> &str {
            "mem://never"
        }
    }

    fn builder() -> StreamDriverBuilder {
        StreamDriver::builder(Arc::new(NeverTransport), Arc::new(pump_package()))
            .package_reference("pump.spkg.json")
    }

    #[test]
    fn builder_defaults() {
        let driver = builder().build().unwrap();
        assert_eq!(driver.state(), DriverState::Idle);
        assert_eq!(driver.config.output_module, "map_program_data");
        assert_eq!(driver.config.decode_failure, DecodeFailurePolicy::Abort);
        assert!(!driver.config.production_mode);
        assert_eq!(driver.registry().len(), 2);
    }

    #[test]
    fn builder_rejects_unknown_module() {
        let err = builder().output_module("map_nothing").build().unwrap_err();
        assert!(matches!(
            err,
            StreamError::Package(PackageError::ModuleNotFound { .. })
        ));
    }

    #[test]
    fn state_display() {
        assert_eq!(DriverState::Backoff.to_string(), "backoff");
        assert_eq!(DriverState::Terminated.to_string(), "terminated");
    }

    struct Idle;

    #[async_trait]
    impl StreamHandlers for Idle {
        async fn on_forward_data(
            &mut self,
            _d: &crate::types::ForwardData,
            _r: &TypeRegistry,
        ) -> Result<(), StreamError> {
            Ok(())
        }
        async fn on_undo_signal(
            &mut self,
            _s: &crate::types::UndoSignal,
            _i: crate::types::BlockRange,
        ) -> Result<(), StreamError> {
            Ok(())
        }
    }

    /// Delivers one progress envelope, then stays open without sending more.
    struct ProgressThenSilent;

    #[async_trait]
    impl StreamTransport for ProgressThenSilent {
        async fn open(&self, _request: &StreamRequest) -> Result<EnvelopeStream, StreamError> {
            let first = InboundEnvelope::Progress(crate::types::ModulesProgress::default());
            Ok(futures::stream::iter(vec![Ok(first)])
                .chain(futures::stream::pending())
                .boxed())
        }

        fn endpoint(&self) -> &str {
            "mem://progress"
        }
    }

    #[tokio::test]
    async fn cancel_while_streaming_returns_ok() {
        let token = CancellationToken::new();
        let mut driver = builder().cancellation(token.clone()).build().unwrap();
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            token.cancel();
        });

        driver.run(&mut Idle).await.unwrap();
        cancel.await.unwrap();
        assert_eq!(driver.state(), DriverState::Terminated);
        assert_eq!(driver.metrics().connection_attempts, 1);
    }

    #[tokio::test]
    async fn open_connection_without_envelopes_is_still_connecting() {
        let mut driver = builder().build().unwrap();
        driver.state = DriverState::Connecting;
        let request = driver.request().unwrap();
        let mut backoff = Backoff::new(BackoffConfig::default());

        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            driver.connection(&request, &mut Idle, &mut backoff),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(driver.state(), DriverState::Connecting);
    }

    #[tokio::test]
    async fn first_envelope_moves_to_streaming() {
        let mut driver = StreamDriver::builder(Arc::new(ProgressThenSilent), Arc::new(pump_package()))
            .package_reference("pump.spkg.json")
            .build()
            .unwrap();
        let request = driver.request().unwrap();
        let mut backoff = Backoff::new(BackoffConfig::default());
        backoff.next_delay();

        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            driver.connection(&request, &mut Idle, &mut backoff),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(driver.state(), DriverState::Streaming);
        assert_eq!(driver.metrics().progress_messages, 1);
        assert_eq!(backoff.attempt(), 0);
    }
}
