//! Stream request and its builder.
//!
//! A request is rebuilt on every (re)connect from the latest known cursor.
//!
//! ```rust
//! use chainstream_core::request::{RequestBuilder, ResumeFrom};
//! use chainstream_core::types::Cursor;
//!
//! let req = RequestBuilder::new("./pump.spkg.json", "map_program_data")
//!     .start_block(300_870_776)
//!     .cursor(Some(Cursor::new("opaque", 300_870_800)))
//!     .build_unchecked();
//!
//! // A cursor always wins over the start block.
//! assert!(matches!(req.resume_from, ResumeFrom::Cursor(_)));
//! ```

use serde::Serialize;

use crate::error::{PackageError, StreamError};
use crate::package::Package;
use crate::registry::TypeRegistry;
use crate::types::Cursor;

/// Where the server should begin streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeFrom {
    Block(u64),
    Cursor(Cursor),
}

/// A fully-specified stream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub package_reference: String,
    pub output_module: String,
    pub resume_from: ResumeFrom,
    pub production_mode: bool,
    pub stop_block: Option<u64>,
}

/// Wire form of [`StreamRequest`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    package_reference: &'a str,
    output_module: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_block_num: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_cursor: Option<&'a str>,
    production_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_block_num: Option<u64>,
}

impl StreamRequest {
    /// Serialize to the JSON frame sent when opening a stream.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        let (start_block_num, start_cursor) = match &self.resume_from {
            ResumeFrom::Block(n) => (Some(*n), None),
            ResumeFrom::Cursor(c) => (None, Some(c.token.as_str())),
        };
        serde_json::to_string(&WireRequest {
            package_reference: &self.package_reference,
            output_module: &self.output_module,
            start_block_num,
            start_cursor,
            production_mode: self.production_mode,
            stop_block_num: self.stop_block,
        })
    }

    /// Block the request starts from (the cursor's block when resuming).
    pub fn start_block(&self) -> u64 {
        match &self.resume_from {
            ResumeFrom::Block(n) => *n,
            ResumeFrom::Cursor(c) => c.block_number,
        }
    }
}

/// Fluent builder for [`StreamRequest`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    package_reference: String,
    output_module: String,
    start_block: u64,
    cursor: Option<Cursor>,
    production_mode: bool,
    stop_block: Option<u64>,
}

impl RequestBuilder {
    pub fn new(package_reference: impl Into<String>, output_module: impl Into<String>) -> Self {
        Self {
            package_reference: package_reference.into(),
            output_module: output_module.into(),
            start_block: 0,
            cursor: None,
            production_mode: false,
            stop_block: None,
        }
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.start_block = block;
        self
    }

    /// Resume from `cursor` when present; takes precedence over the start block.
    pub fn cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn production_mode(mut self, enabled: bool) -> Self {
        self.production_mode = enabled;
        self
    }

    pub fn stop_block(mut self, block: Option<u64>) -> Self {
        self.stop_block = block;
        self
    }

    /// Build without checking the module against a package.
    pub fn build_unchecked(self) -> StreamRequest {
        let resume_from = match self.cursor {
            Some(c) => ResumeFrom::Cursor(c),
            None => ResumeFrom::Block(self.start_block),
        };
        StreamRequest {
            package_reference: self.package_reference,
            output_module: self.output_module,
            resume_from,
            production_mode: self.production_mode,
            stop_block: self.stop_block,
        }
    }

    /// Build, verifying the output module exists in `package`, its output
    /// type is registered, and the stop block is not before the start.
    pub fn build(
        self,
        package: &Package,
        registry: &TypeRegistry,
    ) -> Result<StreamRequest, StreamError> {
        let module = package
            .module(&self.output_module)
            .ok_or_else(|| PackageError::ModuleNotFound {
                module: self.output_module.clone(),
            })?;
        if !registry.contains(&module.output_type) {
            return Err(PackageError::OutputTypeNotRegistered {
                module: module.name.clone(),
                type_name: module.output_type.clone(),
            }
            .into());
        }

        let request = self.build_unchecked();
        if let Some(stop) = request.stop_block {
            let start = request.start_block();
            if stop < start {
                return Err(StreamError::Request(format!(
                    "stop block {stop} is before start block {start}"
                )));
            }
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::tests::pump_package;

    fn registry() -> TypeRegistry {
        TypeRegistry::from_package(&pump_package()).unwrap()
    }

    #[test]
    fn start_block_when_no_cursor() {
        let req = RequestBuilder::new("pkg", "map_program_data")
            .start_block(100)
            .build(&pump_package(), &registry())
            .unwrap();
        assert_eq!(req.resume_from, ResumeFrom::Block(100));
        assert!(!req.production_mode);
    }

    #[test]
    fn cursor_takes_precedence() {
        let req = RequestBuilder::new("pkg", "map_program_data")
            .start_block(100)
            .cursor(Some(Cursor::new("tok", 150)))
            .build(&pump_package(), &registry())
            .unwrap();
        assert_eq!(req.resume_from, ResumeFrom::Cursor(Cursor::new("tok", 150)));
        assert_eq!(req.start_block(), 150);
    }

    #[test]
    fn unknown_module_rejected() {
        let err = RequestBuilder::new("pkg", "map_nothing")
            .build(&pump_package(), &registry())
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::Package(PackageError::ModuleNotFound { .. })
        ));
    }

    #[test]
    fn unregistered_output_type_rejected() {
        let err = RequestBuilder::new("pkg", "map_program_data")
            .build(&pump_package(), &TypeRegistry::new())
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::Package(PackageError::OutputTypeNotRegistered { .. })
        ));
    }

    #[test]
    fn stop_before_start_rejected() {
        let err = RequestBuilder::new("pkg", "map_program_data")
            .start_block(100)
            .stop_block(Some(50))
            .build(&pump_package(), &registry())
            .unwrap_err();
        assert!(matches!(err, StreamError::Request(_)));
    }

    #[test]
    fn wire_form_uses_cursor_or_block() {
        let by_block = RequestBuilder::new("pkg", "m")
            .start_block(7)
            .production_mode(true)
            .build_unchecked();
        let json: serde_json::Value = serde_json::from_str(&by_block.to_wire().unwrap()).unwrap();
        assert_eq!(json["startBlockNum"], 7);
        assert_eq!(json["productionMode"], true);
        assert!(json.get("startCursor").is_none());
        assert!(json.get("stopBlockNum").is_none());

        let by_cursor = RequestBuilder::new("pkg", "m")
            .start_block(7)
            .cursor(Some(Cursor::new("abc", 9)))
            .stop_block(Some(20))
            .build_unchecked();
        let json: serde_json::Value =
            serde_json::from_str(&by_cursor.to_wire().unwrap()).unwrap();
        assert_eq!(json["startCursor"], "abc");
        assert_eq!(json["stopBlockNum"], 20);
        assert!(json.get("startBlockNum").is_none());
    }
}
