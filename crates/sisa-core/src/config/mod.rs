//! Client configuration.
//!
//! `ClientConfig` is stored as JSON by the front-ends and can be overridden
//! per field from the environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};

/// Default per-request deadline for remote calls
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

pub const ENV_API_URL: &str = "SISA_API_URL";
pub const ENV_API_TOKEN: &str = "SISA_API_TOKEN";
pub const ENV_DB_PATH: &str = "SISA_DB_PATH";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "SISA_REQUEST_TIMEOUT_SECS";

/// Remote endpoint, credential and local store location.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("db_path", &self.db_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ClientConfig {
    /// Parse a stored configuration and normalize it.
    pub fn from_json(payload: &str) -> Result<Self, String> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| format!("invalid config JSON: {error}"))?;
        Ok(config.normalized())
    }

    /// Trim text fields, drop empties and trailing slashes on the URL.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            api_url: normalize_text_option(self.api_url)
                .map(|url| url.trim_end_matches('/').to_string()),
            api_token: normalize_text_option(self.api_token),
            db_path: self.db_path.filter(|path| !path.as_os_str().is_empty()),
            request_timeout_secs: self.request_timeout_secs.filter(|secs| *secs > 0),
        }
    }

    /// Apply environment overrides using `lookup` to read variables.
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_url = Some(url);
        }
        if let Some(token) = lookup(ENV_API_TOKEN) {
            self.api_token = Some(token);
        }
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            match secs.trim().parse() {
                Ok(secs) => self.request_timeout_secs = Some(secs),
                Err(_) => tracing::warn!("Ignoring invalid {ENV_REQUEST_TIMEOUT_SECS}={secs}"),
            }
        }
        self.normalized()
    }

    /// Reject values no remote call could succeed with.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(url) = &self.api_url {
            if !is_http_url(url) {
                return Err(format!("api_url must include http:// or https://: {url}"));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub const fn has_remote(&self) -> bool {
        self.api_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn from_json_normalizes_fields() {
        let config = ClientConfig::from_json(
            r#"{"api_url": " https://api.example.com/ ", "api_token": "  ", "request_timeout_secs": 0}"#,
        )
        .unwrap();

        assert_eq!(config.api_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.api_token, None);
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn from_json_rejects_unknown_fields() {
        assert!(ClientConfig::from_json(r#"{"supabase_url": "x"}"#).is_err());
    }

    #[test]
    fn env_overrides_win() {
        let config = ClientConfig {
            api_url: Some("https://old.example.com".to_string()),
            ..ClientConfig::default()
        }
        .with_env_overrides(|name| match name {
            ENV_API_URL => Some("https://new.example.com/".to_string()),
            ENV_REQUEST_TIMEOUT_SECS => Some("3".to_string()),
            ENV_DB_PATH => Some("/tmp/sisa.db".to_string()),
            _ => None,
        });

        assert_eq!(config.api_url.as_deref(), Some("https://new.example.com"));
        assert_eq!(config.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/sisa.db")));
    }

    #[test]
    fn invalid_timeout_override_is_ignored() {
        let config = ClientConfig::default().with_env_overrides(|name| {
            (name == ENV_REQUEST_TIMEOUT_SECS).then(|| "soon".to_string())
        });
        assert_eq!(config.request_timeout_secs, None);
    }

    #[test]
    fn validate_requires_http_scheme() {
        let config = ClientConfig {
            api_url: Some("api.example.com".to_string()),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn debug_redacts_token() {
        let config = ClientConfig {
            api_token: Some("secret".to_string()),
            ..ClientConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
