//! Configuration of the crypto service

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, PqsealError, Result};
use crate::kem::KemScheme;

/// Where the facade gets its key pair from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum KeyMode {
    /// One key pair shared by every caller of the service. With the demo
    /// scheme this is the bundled key, which offers no confidentiality.
    Fixed,
    /// Key pairs come from the session store, starting with one session
    /// created for `owner`.
    Session { owner: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CryptoConfig {
    pub scheme: KemScheme,
    pub key_mode: KeyMode,
    /// Sessions older than this are treated as unknown. `None` keeps
    /// sessions for the life of the process.
    pub session_ttl_secs: Option<u64>,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            scheme: KemScheme::MlKem768,
            key_mode: KeyMode::Session {
                owner: "default".to_string(),
            },
            session_ttl_secs: None,
        }
    }
}

impl CryptoConfig {
    /// Settings that read and write records of early demo deployments:
    /// demo KEM under the bundled fixed key.
    pub fn legacy_demo() -> Self {
        Self {
            scheme: KemScheme::Demo,
            key_mode: KeyMode::Fixed,
            session_ttl_secs: None,
        }
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CryptoConfig = serde_json::from_str(json).map_err(|e| {
            PqsealError::with_source(
                ErrorCategory::User,
                format!("invalid configuration: {}", e),
                e,
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let KeyMode::Session { owner } = &self.key_mode {
            if owner.trim().is_empty() {
                return Err(PqsealError::new(
                    ErrorCategory::User,
                    "session owner must not be empty",
                ));
            }
        }
        if self.session_ttl_secs == Some(0) {
            return Err(PqsealError::new(
                ErrorCategory::User,
                "session TTL must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_session_ml_kem() {
        let config = CryptoConfig::default();
        assert_eq!(config.scheme, KemScheme::MlKem768);
        assert!(matches!(config.key_mode, KeyMode::Session { .. }));
        config.validate().unwrap();
    }

    #[test]
    fn test_from_json() {
        let config = CryptoConfig::from_json_str(
            r#"{"scheme": "demo", "key_mode": {"mode": "session", "owner": "clinic"}, "session_ttl_secs": 3600}"#,
        )
        .unwrap();
        assert_eq!(config.scheme, KemScheme::Demo);
        assert_eq!(
            config.key_mode,
            KeyMode::Session {
                owner: "clinic".to_string()
            }
        );
        assert_eq!(config.session_ttl_secs, Some(3600));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = CryptoConfig::from_json_str(r#"{"key_mode": {"mode": "fixed"}}"#).unwrap();
        assert_eq!(config.scheme, KemScheme::MlKem768);
        assert_eq!(config.key_mode, KeyMode::Fixed);
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        assert!(CryptoConfig::from_json_str(r#"{"scheme": "rot13"}"#).is_err());
    }

    #[test]
    fn test_rejects_empty_owner() {
        let err = CryptoConfig::from_json_str(r#"{"key_mode": {"mode": "session", "owner": " "}}"#)
            .expect_err("expected validation error");
        assert_eq!(err.category, ErrorCategory::User);
    }

    #[test]
    fn test_rejects_zero_ttl() {
        assert!(CryptoConfig::from_json_str(r#"{"session_ttl_secs": 0}"#).is_err());
    }
}
