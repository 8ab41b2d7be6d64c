//! Shared types for the streaming pipeline.

use serde::{Deserialize, Serialize};

// ─── Cursor ───────────────────────────────────────────────────────────────────

/// Opaque resumption token plus the block it was issued for.
///
/// The token itself is never interpreted; progress ordering uses the block
/// number the server attached to the envelope that carried it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Server-issued token, echoed back verbatim on resume.
    pub token: String,
    /// Block number of the envelope this cursor acknowledges.
    pub block_number: u64,
}

impl Cursor {
    pub fn new(token: impl Into<String>, block_number: u64) -> Self {
        Self {
            token: token.into(),
            block_number,
        }
    }

    /// Returns `true` if `self` represents less progress than `other`.
    pub fn is_behind(&self, other: &Cursor) -> bool {
        self.block_number < other.block_number
    }
}

// ─── Blocks ───────────────────────────────────────────────────────────────────

/// Block identity: number + hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub id: String,
}

/// Block clock attached to every forward envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    pub number: u64,
    pub id: String,
    /// Unix timestamp (seconds); `0` when the server omits it.
    #[serde(default)]
    pub timestamp: i64,
}

/// Inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub first: u64,
    pub last: u64,
}

impl BlockRange {
    pub fn new(first: u64, last: u64) -> Self {
        Self { first, last }
    }

    pub fn contains(&self, block: u64) -> bool {
        block >= self.first && block <= self.last
    }

    /// Number of blocks in the range; `0` when `last < first`.
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        self.last - self.first + 1
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }
}

// ─── Payloads ─────────────────────────────────────────────────────────────────

/// Opaque module output: a type URL and its undecoded body.
///
/// The body is only interpreted by the decode function registered for
/// `type_url` in the [`TypeRegistry`](crate::registry::TypeRegistry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyPayload {
    pub type_url: String,
    pub value: serde_json::Value,
}

impl AnyPayload {
    pub fn new(type_url: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }

    /// Fully-qualified message name: the segment after the last `/`.
    pub fn type_name(&self) -> &str {
        self.type_url
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.type_url)
    }
}

/// Output of the requested module for one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleOutput {
    pub name: String,
    /// `None` when the module produced nothing for this block.
    #[serde(default)]
    pub map_output: Option<AnyPayload>,
}

// ─── Envelopes ────────────────────────────────────────────────────────────────

/// Block-scoped module output plus the cursor acknowledging it.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardData {
    pub clock: Clock,
    pub final_block_height: u64,
    pub output: ModuleOutput,
    pub cursor: Cursor,
}

impl ForwardData {
    pub fn block_number(&self) -> u64 {
        self.clock.number
    }

    pub fn block_hash(&self) -> &str {
        &self.clock.id
    }

    pub fn payload(&self) -> Option<&AnyPayload> {
        self.output.map_output.as_ref()
    }
}

/// Chain reorganization: everything after `last_valid_block` is no longer canonical.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoSignal {
    pub last_valid_block: BlockRef,
    pub last_valid_cursor: Cursor,
}

impl UndoSignal {
    pub fn first_invalid_block(&self) -> u64 {
        self.last_valid_block.number + 1
    }
}

/// Per-module processing statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStats {
    pub name: String,
    #[serde(default)]
    pub processed_blocks: u64,
    #[serde(default)]
    pub bytes_read: u64,
}

/// Server-side progress report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModulesProgress {
    #[serde(default)]
    pub modules: Vec<ModuleStats>,
}

/// One inbound message from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEnvelope {
    ForwardData(ForwardData),
    UndoSignal(UndoSignal),
    Progress(ModulesProgress),
}

impl InboundEnvelope {
    /// Short kind label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ForwardData(_) => "forward",
            Self::UndoSignal(_) => "undo",
            Self::Progress(_) => "progress",
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_progress_ordering() {
        let a = Cursor::new("c1", 100);
        let b = Cursor::new("c2", 101);
        assert!(a.is_behind(&b));
        assert!(!b.is_behind(&a));
        assert!(!a.is_behind(&Cursor::new("other-token", 100)));
    }

    #[test]
    fn payload_type_name() {
        let p = AnyPayload::new("type.googleapis.com/pump.v1.Events", serde_json::Value::Null);
        assert_eq!(p.type_name(), "pump.v1.Events");

        let bare = AnyPayload::new("pump.v1.Events", serde_json::Value::Null);
        assert_eq!(bare.type_name(), "pump.v1.Events");
    }

    #[test]
    fn block_range_bounds() {
        let r = BlockRange::new(200, 205);
        assert!(r.contains(200));
        assert!(r.contains(205));
        assert!(!r.contains(206));
        assert_eq!(r.len(), 6);
    }

    #[test]
    fn inverted_block_range_is_empty() {
        let r = BlockRange::new(10, 9);
        assert!(r.is_empty());
        assert_eq!(r.len(), 0);
        assert!(!r.contains(9));
        assert_eq!(BlockRange::new(7, 7).len(), 1);
    }

    #[test]
    fn undo_first_invalid() {
        let undo = UndoSignal {
            last_valid_block: BlockRef {
                number: 199,
                id: "abc".into(),
            },
            last_valid_cursor: Cursor::new("c199", 199),
        };
        assert_eq!(undo.first_invalid_block(), 200);
    }
}
