//! WebSocket stream transport.
//!
//! One connection per [`StreamTransport::open`] call: the bearer credential
//! rides on the upgrade request, the stream request is sent as the first
//! text frame, and every inbound text frame is decoded by
//! [`chainstream_core::codec::decode_frame`]. Reconnecting is the driver's
//! job, not this transport's.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use chainstream_core::codec::decode_frame;
use chainstream_core::error::{StreamError, TransportError};
use chainstream_core::request::StreamRequest;
use chainstream_core::transport::{EnvelopeStream, StreamTransport};
use chainstream_core::types::InboundEnvelope;

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WsTransportConfig {
    /// Path appended to the endpoint URL.
    pub path: String,
    /// Upper bound on TCP + TLS + upgrade.
    pub connect_timeout: Duration,
    /// A connection silent for this long is considered dead.
    pub idle_timeout: Duration,
}

impl Default for WsTransportConfig {
    fn default() -> Self {
        Self {
            path: "/v1/stream".into(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

/// Authenticated WebSocket transport.
pub struct WsTransport {
    endpoint: String,
    url: String,
    auth_token: String,
    config: WsTransportConfig,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("url", &self.url)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WsTransport {
    pub fn new(endpoint: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self::with_config(endpoint, auth_token, WsTransportConfig::default())
    }

    pub fn with_config(
        endpoint: impl Into<String>,
        auth_token: impl Into<String>,
        config: WsTransportConfig,
    ) -> Self {
        let endpoint = endpoint.into();
        let url = stream_url(&endpoint, &config.path);
        Self {
            endpoint,
            url,
            auth_token: auth_token.into(),
            config,
        }
    }

    /// The resolved `ws(s)://` URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn open(&self, request: &StreamRequest) -> Result<EnvelopeStream, StreamError> {
        let mut upgrade = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidRequest(format!("bad endpoint {}: {e}", self.url)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.auth_token))
            .map_err(|_| TransportError::Unauthenticated("token is not a valid header value".into()))?;
        upgrade.headers_mut().insert(AUTHORIZATION, bearer);

        tracing::debug!(url = %self.url, "opening WebSocket stream");
        let connected = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(upgrade),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            ms: self.config.connect_timeout.as_millis() as u64,
        })?;
        let (mut ws, _) = connected.map_err(classify_connect_error)?;

        let wire = request
            .to_wire()
            .map_err(|e| StreamError::Request(e.to_string()))?;
        ws.send(Message::Text(wire.into()))
            .await
            .map_err(|e| TransportError::Reset(e.to_string()))?;

        let idle = self.config.idle_timeout;
        let frames = futures::stream::unfold(Some(ws), move |state| async move {
            let mut ws = state?;
            loop {
                let next = match tokio::time::timeout(idle, ws.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let err = TransportError::Timeout {
                            ms: idle.as_millis() as u64,
                        };
                        return Some((Err(err.into()), None));
                    }
                };
                let msg = match next {
                    None => return None,
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        return Some((Err(TransportError::Reset(e.to_string()).into()), None))
                    }
                };
                match incoming(msg) {
                    Incoming::Envelope(Ok(envelope)) => return Some((Ok(envelope), Some(ws))),
                    Incoming::Envelope(Err(e)) => return Some((Err(e), None)),
                    Incoming::Ignore => continue,
                    Incoming::Closed(None) => return None,
                    Incoming::Closed(Some(e)) => return Some((Err(e), None)),
                }
            }
        });
        Ok(frames.boxed())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// What one WebSocket message means for the envelope stream.
enum Incoming {
    Envelope(Result<InboundEnvelope, StreamError>),
    Ignore,
    /// Peer closed; `Some` when the close was abnormal.
    Closed(Option<StreamError>),
}

fn incoming(msg: Message) -> Incoming {
    match msg {
        Message::Text(text) => Incoming::Envelope(decode_frame(text.as_str())),
        Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
            Ok(text) => Incoming::Envelope(decode_frame(text)),
            Err(_) => Incoming::Envelope(Err(chainstream_core::error::DecodeError::Malformed(
                "binary frame is not UTF-8".into(),
            )
            .into())),
        },
        Message::Close(None) => Incoming::Closed(None),
        Message::Close(Some(frame)) if frame.code == CloseCode::Normal => Incoming::Closed(None),
        Message::Close(Some(frame)) => Incoming::Closed(Some(
            TransportError::Reset(format!(
                "closed by server ({}): {}",
                u16::from(frame.code),
                frame.reason
            ))
            .into(),
        )),
        _ => Incoming::Ignore,
    }
}

/// Map an HTTP status from a rejected upgrade to a transport error.
pub fn classify_http_status(status: u16, body: impl Into<String>) -> TransportError {
    let body = body.into();
    match status {
        401 | 403 => TransportError::Unauthenticated(format!("HTTP {status}: {body}")),
        400 | 404 | 422 => TransportError::InvalidRequest(format!("HTTP {status}: {body}")),
        _ => TransportError::Unavailable(format!("HTTP {status}: {body}")),
    }
}

fn classify_connect_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => {
            let body = response
                .body()
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            classify_http_status(response.status().as_u16(), body)
        }
        WsError::Url(e) => TransportError::InvalidRequest(e.to_string()),
        other => TransportError::Connect(other.to_string()),
    }
}

/// Turn an `http(s)://` endpoint into the `ws(s)://` stream URL.
pub fn stream_url(endpoint: &str, path: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    let base = if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.to_string()
    } else {
        format!("wss://{endpoint}")
    };
    if path.is_empty() || path == "/" {
        format!("{base}/")
    } else {
        format!("{base}/{}", path.trim_start_matches('/'))
    }
}
