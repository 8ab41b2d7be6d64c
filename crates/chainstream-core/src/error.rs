//! Error types for the chainstream pipeline.
//!
//! [`StreamError`] is what the driver hands back to its caller. Everything
//! retryable is a [`TransportError`] for which [`TransportError::is_retryable`]
//! returns `true`; every other variant terminates the session.

use thiserror::Error;

/// Errors raised by a stream transport while connecting or reading.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish the connection (DNS, TCP, TLS, handshake).
    #[error("connect failed: {0}")]
    Connect(String),

    /// The established stream was dropped or reset by the peer.
    #[error("stream reset: {0}")]
    Reset(String),

    /// The server is temporarily unable to serve the request.
    #[error("server unavailable: {0}")]
    Unavailable(String),

    /// No data arrived within the configured window.
    #[error("timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The credential was rejected.
    #[error("authentication rejected: {0}")]
    Unauthenticated(String),

    /// The server refused the request as malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Client and server disagree on the package schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

impl TransportError {
    /// Returns `true` if the driver should back off and reconnect.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Reset(_) | Self::Unavailable(_) | Self::Timeout { .. }
        )
    }
}

/// Errors raised while decoding an inbound frame or an opaque payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no decoder registered for type '{type_url}'")]
    UnknownType { type_url: String },

    #[error("unknown message kind '{kind}'")]
    UnknownMessageKind { kind: String },

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("type mismatch in '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("trade has zero token amount (mint {mint})")]
    ZeroTokenAmount { mint: String },

    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Errors raised while fetching or parsing a package.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("failed to fetch package '{reference}': {reason}")]
    Fetch { reference: String, reason: String },

    #[error("failed to parse package '{reference}': {reason}")]
    Parse { reference: String, reason: String },

    #[error("type '{owner}' field '{field}' references unknown type '{target}'")]
    UnknownFieldType {
        owner: String,
        field: String,
        target: String,
    },

    #[error("output module '{module}' not found in package")]
    ModuleNotFound { module: String },

    #[error("output module '{module}' emits unregistered type '{type_name}'")]
    OutputTypeNotRegistered { module: String, type_name: String },
}

/// Errors raised by a cursor store.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor storage error: {0}")]
    Storage(String),

    #[error("corrupt cursor entry: {0}")]
    Corrupt(String),
}

/// Errors detected in the session configuration before any connection.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no auth token configured; set CHAINSTREAM_AUTH_TOKEN or pass --auth-token")]
    MissingCredential,

    #[error("auth token is still the placeholder '{0}'; replace it with a real API token")]
    PlaceholderCredential(String),

    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Top-level error returned by the stream driver.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("handler '{handler}' failed: {reason}")]
    Handler { handler: String, reason: String },
}

impl StreamError {
    /// Returns `true` if the error is a transient transport failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns `true` if the error came from decoding a frame or payload.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_classification() {
        assert!(TransportError::Connect("refused".into()).is_retryable());
        assert!(TransportError::Reset("eof".into()).is_retryable());
        assert!(TransportError::Unavailable("503".into()).is_retryable());
        assert!(TransportError::Timeout { ms: 30_000 }.is_retryable());

        assert!(!TransportError::Unauthenticated("bad token".into()).is_retryable());
        assert!(!TransportError::InvalidRequest("bad module".into()).is_retryable());
        assert!(!TransportError::SchemaMismatch("hash".into()).is_retryable());
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        let err: StreamError = TransportError::Reset("eof".into()).into();
        assert!(err.is_retryable());

        let err: StreamError = DecodeError::UnknownType {
            type_url: "x".into(),
        }
        .into();
        assert!(!err.is_retryable());
        assert!(err.is_decode());

        let err: StreamError = ConfigError::MissingCredential.into();
        assert!(!err.is_retryable());
    }
}
