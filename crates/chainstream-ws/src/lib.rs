//! chainstream-ws: authenticated WebSocket transport for ChainStream.
//!
//! # Features
//! - Bearer credential on the upgrade request
//! - Upgrade rejections classified by HTTP status (401/403 fatal, 5xx retryable)
//! - Idle timeout surfaced as a retryable [`TransportError::Timeout`](chainstream_core::TransportError)

pub mod client;

pub use client::{WsTransport, WsTransportConfig};
