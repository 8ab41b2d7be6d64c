//! chainstream-core: resumable streaming client for block-scoped module output.
//!
//! # Architecture
//!
//! ```text
//! StreamDriverBuilder → StreamDriver
//!                           ├── StreamTransport  (WebSocket / in-memory)
//!                           ├── RequestBuilder   (start block or cursor)
//!                           ├── TypeRegistry     (payload decoders from the package)
//!                           ├── dispatch         (forward / undo / progress → handlers)
//!                           ├── CursorManager    (monotonic resume point)
//!                           └── Backoff + Sleeper (unbounded reconnect)
//! ```

pub mod backoff;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod driver;
pub mod error;
pub mod handler;
pub mod package;
pub mod registry;
pub mod request;
pub mod transport;
pub mod types;

pub use backoff::{Backoff, BackoffConfig, Sleeper, TokioSleeper};
pub use config::SessionConfig;
pub use cursor::{CursorKey, CursorManager, CursorRecord, CursorStore, MemoryCursorStore, SaveOutcome};
pub use driver::{
    DecodeFailurePolicy, DriverConfig, DriverState, StreamDriver, StreamDriverBuilder,
    StreamMetrics,
};
pub use error::{ConfigError, CursorError, DecodeError, PackageError, StreamError, TransportError};
pub use handler::StreamHandlers;
pub use package::{load_package, Package, PackageLoader};
pub use registry::{DecodedMessage, TypeRegistry};
pub use request::{RequestBuilder, ResumeFrom, StreamRequest};
pub use transport::{EnvelopeStream, StreamTransport};
pub use types::{BlockRange, Cursor, ForwardData, InboundEnvelope, ModulesProgress, UndoSignal};

/// Re-exported so callers can cancel a driver without naming `tokio-util`.
pub use tokio_util::sync::CancellationToken;
