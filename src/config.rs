//! Harness configuration, loaded from TOML.
//!
//! ```toml
//! environment = "local"
//! anchor_timeout_secs = 900
//!
//! [anchor]
//! mode = "node"
//! interval_secs = 5
//! chain_id = "eip155:1337"
//!
//! [services.ceramicClient]
//! mode = "client"
//! api_url = "http://localhost:7007"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides [`HarnessConfig::environment`].
pub const ENVIRONMENT_VAR: &str = "ANCHORWATCH_ENV";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How a service is reached by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// Remote instance reached over its API.
    Client,
    /// Run in-process by the harness.
    Node,
    /// Not used by this run.
    None,
}

impl Display for ServiceMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Node => "node",
            Self::None => "none",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub mode: ServiceMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    pub mode: ServiceMode,
    /// Seconds between anchor batches; 0 disables the schedule.
    pub interval_secs: u64,
    pub chain_id: String,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            mode: ServiceMode::Node,
            interval_secs: 5,
            chain_id: "eip155:1337".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub environment: String,
    pub anchor_timeout_secs: u64,
    pub anchor: AnchorConfig,
    pub services: BTreeMap<String, ServiceConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            environment: "local".to_string(),
            anchor_timeout_secs: 60 * 15,
            anchor: AnchorConfig::default(),
            services: BTreeMap::new(),
        }
    }
}

impl HarnessConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// `Parse` for malformed TOML or unknown modes, `Invalid` when
    /// [`validate`](Self::validate) fails.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate `path`, then apply the [`ENVIRONMENT_VAR`] override.
    ///
    /// # Errors
    /// `Io` if the file cannot be read, otherwise as [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?
            .with_environment_override(std::env::var(ENVIRONMENT_VAR).ok());
        tracing::debug!(path = %path.display(), environment = %config.environment, "loaded harness config");
        Ok(config)
    }

    pub fn with_environment_override(mut self, environment: Option<String>) -> Self {
        if let Some(environment) = environment.filter(|env| !env.is_empty()) {
            self.environment = environment;
        }
        self
    }

    /// # Errors
    /// `ConfigError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.anchor_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "anchor_timeout_secs must be positive".to_string(),
            ));
        }
        if self.anchor.chain_id.is_empty() {
            return Err(ConfigError::Invalid("anchor.chain_id is empty".to_string()));
        }
        for (name, service) in &self.services {
            match service.mode {
                ServiceMode::Node if name.ends_with("Client") => {
                    return Err(ConfigError::Invalid(format!(
                        "Mode 'node' isn't supported for '{name}'"
                    )));
                }
                ServiceMode::Client if service.api_url.is_none() => {
                    return Err(ConfigError::Invalid(format!(
                        "service '{name}' in client mode needs an api_url"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn anchor_timeout(&self) -> Duration {
        Duration::from_secs(self.anchor_timeout_secs)
    }

    /// `None` when scheduled anchoring is disabled.
    pub fn anchor_interval(&self) -> Option<Duration> {
        (self.anchor.interval_secs > 0).then(|| Duration::from_secs(self.anchor.interval_secs))
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.anchor_timeout(), Duration::from_secs(900));
        assert_eq!(config.anchor_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn parses_services_and_anchor_section() {
        let config = HarnessConfig::from_toml_str(
            r#"
            environment = "dev-unstable"
            anchor_timeout_secs = 120

            [anchor]
            mode = "none"
            interval_secs = 0

            [services.ceramic]
            mode = "node"
            network = "dev-unstable"

            [services.ceramicClient]
            mode = "client"
            api_url = "http://localhost:7007"
            "#,
        )
        .unwrap();
        assert_eq!(config.environment, "dev-unstable");
        assert_eq!(config.anchor.mode, ServiceMode::None);
        assert_eq!(config.anchor.chain_id, "eip155:1337");
        assert_eq!(config.anchor_interval(), None);
        assert_eq!(config.service("ceramic").unwrap().mode, ServiceMode::Node);
        assert_eq!(
            config.service("ceramicClient").unwrap().api_url.as_deref(),
            Some("http://localhost:7007")
        );
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = HarnessConfig::from_toml_str("[services.ipfs]\nmode = \"embedded\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_node_mode_for_clients() {
        let err = HarnessConfig::from_toml_str("[services.ceramicClient]\nmode = \"node\"\n")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid config: Mode 'node' isn't supported for 'ceramicClient'"
        );
    }

    #[test]
    fn rejects_client_without_url_and_zero_timeout() {
        assert!(matches!(
            HarnessConfig::from_toml_str("[services.ceramic]\nmode = \"client\"\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HarnessConfig::from_toml_str("anchor_timeout_secs = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn environment_override_ignores_empty_values() {
        let config = HarnessConfig::default();
        assert_eq!(
            config.clone().with_environment_override(Some(String::new())).environment,
            "local"
        );
        assert_eq!(
            config.with_environment_override(Some("tnet".into())).environment,
            "tnet"
        );
    }
}
