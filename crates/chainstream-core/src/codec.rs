//! Wire codec for inbound frames.
//!
//! Every frame is a JSON object tagged by `"type"`:
//!
//! | `type`            | Decoded as                               |
//! |-------------------|------------------------------------------|
//! | `blockScopedData` | [`InboundEnvelope::ForwardData`]         |
//! | `blockUndoSignal` | [`InboundEnvelope::UndoSignal`]          |
//! | `progress`        | [`InboundEnvelope::Progress`]            |
//! | `error`           | [`TransportError`], classified by `code` |
//!
//! Any other tag is a fatal [`DecodeError::UnknownMessageKind`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{DecodeError, StreamError, TransportError};
use crate::types::{
    BlockRef, Clock, Cursor, ForwardData, InboundEnvelope, ModuleOutput, ModulesProgress,
    UndoSignal,
};

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireForward {
    clock: Clock,
    #[serde(default)]
    final_block_height: u64,
    cursor: String,
    output: ModuleOutput,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireUndo {
    last_valid_block: BlockRef,
    last_valid_cursor: String,
}

#[derive(Debug, Deserialize)]
struct WireError {
    code: String,
    #[serde(default)]
    message: String,
}

/// Decode one inbound text frame.
pub fn decode_frame(text: &str) -> Result<InboundEnvelope, StreamError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
        .to_string();

    match kind.as_str() {
        "blockScopedData" => {
            let wire: WireForward = from_value(value)?;
            Ok(InboundEnvelope::ForwardData(ForwardData {
                cursor: Cursor::new(wire.cursor, wire.clock.number),
                clock: wire.clock,
                final_block_height: wire.final_block_height,
                output: wire.output,
            }))
        }
        "blockUndoSignal" => {
            let wire: WireUndo = from_value(value)?;
            Ok(InboundEnvelope::UndoSignal(UndoSignal {
                last_valid_cursor: Cursor::new(wire.last_valid_cursor, wire.last_valid_block.number),
                last_valid_block: wire.last_valid_block,
            }))
        }
        "progress" => Ok(InboundEnvelope::Progress(from_value(value)?)),
        "error" => {
            let wire: WireError = from_value(value)?;
            Err(classify_status(&wire.code, wire.message).into())
        }
        _ => Err(DecodeError::UnknownMessageKind { kind }.into()),
    }
}

/// Encode an envelope as a frame (used by test servers and replay tooling).
pub fn encode_frame(envelope: &InboundEnvelope) -> String {
    let value = match envelope {
        InboundEnvelope::ForwardData(data) => json!({
            "type": "blockScopedData",
            "clock": data.clock,
            "finalBlockHeight": data.final_block_height,
            "cursor": data.cursor.token,
            "output": data.output,
        }),
        InboundEnvelope::UndoSignal(undo) => json!({
            "type": "blockUndoSignal",
            "lastValidBlock": undo.last_valid_block,
            "lastValidCursor": undo.last_valid_cursor.token,
        }),
        InboundEnvelope::Progress(progress) => json!({
            "type": "progress",
            "modules": progress.modules,
        }),
    };
    value.to_string()
}

/// Map a server status code to a transport error.
///
/// Credential and request-shape codes are fatal; everything else is treated
/// as transient server trouble.
pub fn classify_status(code: &str, message: impl Into<String>) -> TransportError {
    let message = message.into();
    match code.to_ascii_lowercase().as_str() {
        "unauthenticated" | "permission_denied" => TransportError::Unauthenticated(message),
        "invalid_argument" | "failed_precondition" | "not_found" => {
            TransportError::InvalidRequest(message)
        }
        "schema_mismatch" => TransportError::SchemaMismatch(message),
        _ => TransportError::Unavailable(format!("{code}: {message}")),
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnyPayload, ModuleStats};

    #[test]
    fn decodes_forward_data() {
        let frame = r#"{
            "type": "blockScopedData",
            "clock": { "number": 100, "id": "hash100", "timestamp": 1700000000 },
            "finalBlockHeight": 90,
            "cursor": "c100",
            "output": {
                "name": "map_program_data",
                "mapOutput": { "typeUrl": "type.googleapis.com/pump.v1.Events", "value": {} }
            }
        }"#;
        match decode_frame(frame).unwrap() {
            InboundEnvelope::ForwardData(data) => {
                assert_eq!(data.block_number(), 100);
                assert_eq!(data.block_hash(), "hash100");
                assert_eq!(data.final_block_height, 90);
                assert_eq!(data.cursor, Cursor::new("c100", 100));
                assert_eq!(data.payload().unwrap().type_name(), "pump.v1.Events");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn forward_data_without_output_payload() {
        let frame = r#"{
            "type": "blockScopedData",
            "clock": { "number": 5, "id": "h5" },
            "cursor": "c5",
            "output": { "name": "map_program_data" }
        }"#;
        let InboundEnvelope::ForwardData(data) = decode_frame(frame).unwrap() else {
            panic!("expected forward data");
        };
        assert!(data.payload().is_none());
    }

    #[test]
    fn decodes_undo_signal() {
        let frame = r#"{
            "type": "blockUndoSignal",
            "lastValidBlock": { "number": 199, "id": "h199" },
            "lastValidCursor": "c199"
        }"#;
        let InboundEnvelope::UndoSignal(undo) = decode_frame(frame).unwrap() else {
            panic!("expected undo");
        };
        assert_eq!(undo.first_invalid_block(), 200);
        assert_eq!(undo.last_valid_cursor, Cursor::new("c199", 199));
    }

    #[test]
    fn unknown_kind_is_fatal_decode_error() {
        let err = decode_frame(r#"{ "type": "sessionInit" }"#).unwrap_err();
        assert!(matches!(
            err,
            StreamError::Decode(DecodeError::UnknownMessageKind { ref kind }) if kind == "sessionInit"
        ));
        assert!(!err.is_retryable());

        let err = decode_frame(r#"{ "clock": {} }"#).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn error_frames_are_classified() {
        let auth = decode_frame(r#"{ "type": "error", "code": "unauthenticated", "message": "bad token" }"#)
            .unwrap_err();
        assert!(matches!(auth, StreamError::Transport(TransportError::Unauthenticated(_))));
        assert!(!auth.is_retryable());

        let busy = decode_frame(r#"{ "type": "error", "code": "unavailable", "message": "draining" }"#)
            .unwrap_err();
        assert!(busy.is_retryable());

        let bad = decode_frame(r#"{ "type": "error", "code": "invalid_argument" }"#).unwrap_err();
        assert!(matches!(bad, StreamError::Transport(TransportError::InvalidRequest(_))));
    }

    #[test]
    fn encoded_frames_decode_back() {
        let envelope = InboundEnvelope::ForwardData(ForwardData {
            clock: Clock {
                number: 42,
                id: "h42".into(),
                timestamp: 0,
            },
            final_block_height: 40,
            output: ModuleOutput {
                name: "map_program_data".into(),
                map_output: Some(AnyPayload::new("pump.v1.Events", json!({ "tradeEventList": [] }))),
            },
            cursor: Cursor::new("c42", 42),
        });
        assert_eq!(decode_frame(&encode_frame(&envelope)).unwrap(), envelope);

        let progress = InboundEnvelope::Progress(ModulesProgress {
            modules: vec![ModuleStats {
                name: "map_program_data".into(),
                processed_blocks: 10,
                bytes_read: 2048,
            }],
        });
        assert_eq!(decode_frame(&encode_frame(&progress)).unwrap(), progress);
    }
}
