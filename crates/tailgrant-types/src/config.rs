//! configuration types for tailgrant.

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::grant::{GrantAction, RiskLevel, UserRole};
use crate::posture::PostureAttribute;
use crate::tag::Tag;

/// main configuration for tailgrant, loaded from a yaml document at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// http server configuration.
    pub server: ServerConfig,

    /// tailscale control-plane api configuration.
    pub tailscale: TailscaleConfig,

    /// database configuration.
    pub database: DatabaseConfig,

    /// reconciler configuration.
    pub reconciler: ReconcilerConfig,

    /// declarative grant types.
    pub grants: Vec<GrantTypeConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            tailscale: TailscaleConfig::default(),
            database: DatabaseConfig::default(),
            reconciler: ReconcilerConfig::default(),
            grants: vec![],
        }
    }
}

impl Config {
    /// load configuration from a yaml file, then apply env overrides.
    ///
    /// `TS_API_KEY` overrides the tailscale api key and
    /// `TAILGRANT_DATABASE_URL` overrides the database connection string.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Config =
            serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("TS_API_KEY")
            && !key.is_empty()
        {
            self.tailscale.api_key = SecretString::from(key);
        }
        if let Ok(url) = std::env::var("TAILGRANT_DATABASE_URL")
            && !url.is_empty()
        {
            self.database.connection_string = url;
        }
    }
}

/// http server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// address to bind the http server to.
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// tailscale control-plane api configuration.
///
/// the api key is held as a [`SecretString`] and is never serialized back
/// out.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TailscaleConfig {
    /// base url of the control-plane api.
    pub api_base_url: String,

    /// the tailnet to operate on ("-" selects the key's default tailnet).
    pub tailnet: String,

    /// api key (set directly or via the `TS_API_KEY` env var).
    pub api_key: SecretString,
}

impl Default for TailscaleConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.tailscale.com".to_string(),
            tailnet: "-".to_string(),
            api_key: SecretString::from(""),
        }
    }
}

/// database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// database type: "sqlite" or "postgres".
    pub db_type: String,

    /// database connection string or file path.
    pub connection_string: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            connection_string: "/var/lib/tailgrant/db.sqlite".to_string(),
        }
    }
}

/// reconciler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcilerConfig {
    /// seconds between reconciliation sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300, // 5 minutes
        }
    }
}

/// a declarative grant type as written in the config document.
///
/// field-level validation (tag format, posture key namespace, role names,
/// risk levels, duration strings) happens during deserialization; cross-field
/// rules are enforced when the [`crate::GrantTypeStore`] is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantTypeConfig {
    /// unique identifier.
    pub name: String,

    /// human-readable description.
    #[serde(default)]
    pub description: String,

    /// the effect this grant applies. Defaults to tags.
    #[serde(default)]
    pub action: GrantAction,

    /// tags assigned while active (Tag action).
    #[serde(default)]
    pub tags: Vec<Tag>,

    /// posture attributes set while active (Tag action).
    #[serde(default)]
    pub posture_attributes: Vec<PostureAttribute>,

    /// role elevated to (UserRole action).
    #[serde(default)]
    pub role: Option<UserRole>,

    /// longest a single grant may be held (e.g., "4h").
    #[serde(with = "humantime_serde")]
    pub max_duration: Duration,

    /// risk level controlling the approval path. Defaults to low.
    #[serde(default)]
    pub risk_level: RiskLevel,

    /// identities allowed to approve (required for medium/high risk).
    #[serde(default)]
    pub approvers: Vec<String>,
}
