//! Session configuration, validated before any connection attempt.

use serde::{Deserialize, Serialize};

use crate::cursor::CursorKey;
use crate::driver::{DecodeFailurePolicy, DriverConfig};
use crate::error::ConfigError;

pub const DEFAULT_ENDPOINT: &str = "https://mainnet.sol.streamingfast.io";
pub const DEFAULT_OUTPUT_MODULE: &str = "map_program_data";
pub const DEFAULT_CHAIN: &str = "solana";

/// The credential value shipped in sample configs; never valid.
pub const PLACEHOLDER_TOKEN: &str = "<SUBSTREAMS-TOKEN>";

/// Everything a streaming session needs from its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bearer credential attached to every connection.
    pub auth_token: String,
    pub endpoint_url: String,
    pub package_reference: String,
    pub output_module: String,
    /// Mint address whose trades are tracked. Case-sensitive.
    pub monitored_asset: String,
    pub start_block: u64,
    pub stop_block: Option<u64>,
    /// Chain slug, part of the cursor key.
    pub chain: String,
    pub production_mode: bool,
    pub decode_failure: DecodeFailurePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            endpoint_url: DEFAULT_ENDPOINT.into(),
            package_reference: String::new(),
            output_module: DEFAULT_OUTPUT_MODULE.into(),
            monitored_asset: String::new(),
            start_block: 0,
            stop_block: None,
            chain: DEFAULT_CHAIN.into(),
            production_mode: false,
            decode_failure: DecodeFailurePolicy::Abort,
        }
    }
}

impl SessionConfig {
    /// Check the config is usable. Credential problems come first so they
    /// surface before anything touches the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let token = self.auth_token.trim();
        if token.is_empty() {
            return Err(ConfigError::MissingCredential);
        }
        if token == PLACEHOLDER_TOKEN {
            return Err(ConfigError::PlaceholderCredential(token.to_string()));
        }

        for (field, value) in [
            ("endpoint_url", &self.endpoint_url),
            ("package_reference", &self.package_reference),
            ("output_module", &self.output_module),
            ("monitored_asset", &self.monitored_asset),
            ("chain", &self.chain),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    reason: "must not be empty".into(),
                });
            }
        }

        if let Some(stop) = self.stop_block {
            if stop < self.start_block {
                return Err(ConfigError::InvalidValue {
                    field: "stop_block".into(),
                    reason: format!("{stop} is before start block {}", self.start_block),
                });
            }
        }
        Ok(())
    }

    pub fn cursor_key(&self) -> CursorKey {
        CursorKey::new(&self.package_reference, &self.output_module, &self.chain)
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            package_reference: self.package_reference.clone(),
            output_module: self.output_module.clone(),
            start_block: self.start_block,
            stop_block: self.stop_block,
            production_mode: self.production_mode,
            decode_failure: self.decode_failure,
            ..DriverConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> SessionConfig {
        SessionConfig {
            auth_token: "real-token".into(),
            package_reference: "./pump-fun-substreams-v0.1.0.spkg.json".into(),
            monitored_asset: "7VR8w5qGc5mYcdscznMChDMdRHBeogko5TWCeDgZpump".into(),
            start_block: 300_870_776,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn defaults_match_mainnet() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.endpoint_url, DEFAULT_ENDPOINT);
        assert_eq!(cfg.output_module, "map_program_data");
        assert_eq!(cfg.chain, "solana");
        assert!(!cfg.production_mode);
    }

    #[test]
    fn valid_config_passes() {
        valid().validate().unwrap();
    }

    #[test]
    fn missing_token_rejected() {
        let cfg = SessionConfig {
            auth_token: "  ".into(),
            ..valid()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingCredential)));
    }

    #[test]
    fn placeholder_token_rejected() {
        let cfg = SessionConfig {
            auth_token: PLACEHOLDER_TOKEN.into(),
            ..valid()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::PlaceholderCredential(_))
        ));
    }

    #[test]
    fn empty_asset_rejected() {
        let cfg = SessionConfig {
            monitored_asset: String::new(),
            ..valid()
        };
        match cfg.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "monitored_asset"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn stop_before_start_rejected() {
        let cfg = SessionConfig {
            stop_block: Some(1),
            ..valid()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: SessionConfig = serde_json::from_str(
            r#"{ "auth_token": "t", "monitored_asset": "Mint", "decode_failure": "skip" }"#,
        )
        .unwrap();
        assert_eq!(cfg.chain, "solana");
        assert_eq!(cfg.decode_failure, DecodeFailurePolicy::Skip);
    }

    #[test]
    fn driver_config_carries_session_values() {
        let d = valid().driver_config();
        assert_eq!(d.start_block, 300_870_776);
        assert_eq!(d.output_module, "map_program_data");
        assert_eq!(valid().cursor_key().chain, "solana");
    }
}
