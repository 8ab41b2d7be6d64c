//! Package model and loaders.
//!
//! A package bundles the module graph a server runs and the message schemas
//! its outputs use. It is fetched once per session and shared across every
//! reconnect attempt.
//!
//! # Format
//! ```json
//! {
//!   "name": "pump-fun-substreams",
//!   "version": "v0.1.0",
//!   "network": "solana",
//!   "modules": [{ "name": "map_program_data", "outputType": "pump.v1.Events" }],
//!   "types": [{
//!     "name": "pump.v1.Events",
//!     "fields": [{ "name": "tradeEventList", "kind": "pump.v1.TradeEvent", "repeated": true }]
//!   }]
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::PackageError;

/// A module declared by the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDef {
    pub name: String,
    /// Fully-qualified message name of the module's output.
    pub output_type: String,
}

/// A single message field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// `string`, `uint64`, `int64`, `double`, `bool`, `bytes`, or a message name.
    pub kind: String,
    #[serde(default)]
    pub repeated: bool,
}

/// A message schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSchema {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

/// Immutable package bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub network: String,
    pub modules: Vec<ModuleDef>,
    #[serde(default)]
    pub types: Vec<MessageSchema>,
}

impl Package {
    /// Parse a package from its JSON document.
    pub fn from_json(reference: &str, bytes: &[u8]) -> Result<Self, PackageError> {
        serde_json::from_slice(bytes).map_err(|e| PackageError::Parse {
            reference: reference.to_string(),
            reason: e.to_string(),
        })
    }

    /// Look up a module by name.
    pub fn module(&self, name: &str) -> Option<&ModuleDef> {
        self.modules.iter().find(|m| m.name == name)
    }
}

/// Fetches a package by reference.
#[async_trait]
pub trait PackageLoader: Send + Sync {
    async fn load(&self, reference: &str) -> Result<Package, PackageError>;
}

/// Loads packages from the local filesystem.
///
/// Relative references are resolved against `root` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FilePackageLoader {
    root: Option<PathBuf>,
}

impl FilePackageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        let path = PathBuf::from(reference);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl PackageLoader for FilePackageLoader {
    async fn load(&self, reference: &str) -> Result<Package, PackageError> {
        let path = self.resolve(reference);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| PackageError::Fetch {
                reference: reference.to_string(),
                reason: format!("{}: {e}", path.display()),
            })?;
        let pkg = Package::from_json(reference, &bytes)?;
        tracing::info!(
            package = %pkg.name,
            version = %pkg.version,
            modules = pkg.modules.len(),
            types = pkg.types.len(),
            "package loaded"
        );
        Ok(pkg)
    }
}

#[cfg(feature = "remote")]
pub use remote::HttpPackageLoader;

#[cfg(feature = "remote")]
mod remote {
    use super::*;
    use std::time::Duration;

    /// Fetches packages over HTTP(S).
    pub struct HttpPackageLoader {
        client: reqwest::Client,
    }

    impl HttpPackageLoader {
        pub fn new() -> Result<Self, PackageError> {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| PackageError::Fetch {
                    reference: String::new(),
                    reason: e.to_string(),
                })?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl PackageLoader for HttpPackageLoader {
        async fn load(&self, reference: &str) -> Result<Package, PackageError> {
            let fetch_err = |reason: String| PackageError::Fetch {
                reference: reference.to_string(),
                reason,
            };
            let resp = self
                .client
                .get(reference)
                .send()
                .await
                .map_err(|e| fetch_err(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(fetch_err(format!("HTTP {}", resp.status().as_u16())));
            }
            let bytes = resp.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
            let pkg = Package::from_json(reference, &bytes)?;
            tracing::info!(package = %pkg.name, url = reference, "package fetched");
            Ok(pkg)
        }
    }
}

/// Load a package, choosing HTTP for `http(s)://` references and the
/// filesystem otherwise.
pub async fn load_package(reference: &str) -> Result<Package, PackageError> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        #[cfg(feature = "remote")]
        {
            return HttpPackageLoader::new()?.load(reference).await;
        }
        #[cfg(not(feature = "remote"))]
        {
            return Err(PackageError::Fetch {
                reference: reference.to_string(),
                reason: "HTTP package references require the `remote` feature".into(),
            });
        }
    }
    FilePackageLoader::new().load(reference).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const PUMP_PACKAGE: &str = r#"{
        "name": "pump-fun-substreams",
        "version": "v0.1.0",
        "network": "solana",
        "modules": [{ "name": "map_program_data", "outputType": "pump.v1.Events" }],
        "types": [
            {
                "name": "pump.v1.Events",
                "fields": [
                    { "name": "tradeEventList", "kind": "pump.v1.TradeEvent", "repeated": true }
                ]
            },
            {
                "name": "pump.v1.TradeEvent",
                "fields": [
                    { "name": "mint", "kind": "string" },
                    { "name": "solAmount", "kind": "uint64" },
                    { "name": "tokenAmount", "kind": "uint64" },
                    { "name": "isBuy", "kind": "bool" },
                    { "name": "user", "kind": "string" }
                ]
            }
        ]
    }"#;

    pub(crate) fn pump_package() -> Package {
        Package::from_json("test", PUMP_PACKAGE.as_bytes()).unwrap()
    }

    #[test]
    fn parse_package() {
        let pkg = pump_package();
        assert_eq!(pkg.name, "pump-fun-substreams");
        assert_eq!(pkg.module("map_program_data").unwrap().output_type, "pump.v1.Events");
        assert!(pkg.module("missing").is_none());
        assert!(pkg.types[0].fields[0].repeated);
        assert!(!pkg.types[1].fields[0].repeated);
    }

    #[test]
    fn parse_error_names_reference() {
        let err = Package::from_json("bad.json", b"{not json").unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }

    #[tokio::test]
    async fn file_loader_reads_package() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pump.spkg.json"), PUMP_PACKAGE).unwrap();

        let loader = FilePackageLoader::with_root(dir.path());
        let pkg = loader.load("pump.spkg.json").await.unwrap();
        assert_eq!(pkg.modules.len(), 1);
    }

    #[tokio::test]
    async fn file_loader_missing_is_fetch_error() {
        let err = load_package("/definitely/not/here.spkg.json").await.unwrap_err();
        assert!(matches!(err, PackageError::Fetch { .. }));
    }
}
