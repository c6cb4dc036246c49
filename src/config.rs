//! Configuration management for Airlink
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//!
//! Every field has a serde default carrying the production vendor constants,
//! so an empty or missing configuration file yields a working setup. Tests
//! point the URL fields at local mock servers.

use crate::error::{AirlinkError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for Airlink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Identity provider (OAuth2 / OIDC) settings
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Vendor REST API settings
    #[serde(default)]
    pub api: ApiConfig,
    /// MQTT control session settings
    #[serde(default)]
    pub mqtt: MqttConfig,
    /// Credential persistence settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Identity provider configuration
///
/// The client id and secret are the values shipped in the vendor's mobile
/// application. The app XOR-masks them, which provides no
/// confidentiality; they are plain configuration here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Authorization endpoint (GET, query parameters)
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,

    /// Token endpoint (POST, form encoded) used for both grant types
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// OAuth client id
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// OAuth client secret
    #[serde(default = "default_client_secret")]
    pub client_secret: String,

    /// Custom-scheme redirect URI registered for the mobile client
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Space separated scope list
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Locale hint sent as `ui_locales`
    #[serde(default = "default_ui_locales")]
    pub ui_locales: String,

    /// How long to wait for the pasted redirect URL (seconds)
    #[serde(default = "default_prompt_timeout")]
    pub prompt_timeout_seconds: u64,
}

fn default_authorize_url() -> String {
    "https://cdc.accounts.home.id/oidc/op/v1.0/4_JGZWlP8eQHpEqkvQElolbA/authorize".to_string()
}

fn default_token_url() -> String {
    "https://cdc.accounts.home.id/oidc/op/v1.0/4_JGZWlP8eQHpEqkvQElolbA/oauth/token".to_string()
}

fn default_client_id() -> String {
    "-XsK7O6iEkLml77yDGDUi0ku".to_string()
}

fn default_client_secret() -> String {
    "V34BlAhuilIdOx0Imo16rGQ2".to_string()
}

fn default_redirect_uri() -> String {
    "com.philips.air://loginredirect".to_string()
}

fn default_scope() -> String {
    [
        "openid",
        "email",
        "profile",
        "address",
        "DI.Account.read",
        "DI.AccountProfile.read",
        "DI.AccountProfile.write",
        "DI.AccountGeneralConsent.read",
        "DI.AccountGeneralConsent.write",
        "DI.GeneralConsent.read",
        "subscriptions",
        "profile_extended",
        "consents",
        "DI.AccountSubscription.read",
        "DI.AccountSubscription.write",
    ]
    .join(" ")
}

fn default_ui_locales() -> String {
    "en-US".to_string()
}

fn default_prompt_timeout() -> u64 {
    300
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            client_id: default_client_id(),
            client_secret: default_client_secret(),
            redirect_uri: default_redirect_uri(),
            scope: default_scope(),
            ui_locales: default_ui_locales(),
            prompt_timeout_seconds: default_prompt_timeout(),
        }
    }
}

impl IdentityConfig {
    /// Redirect prompt deadline as a [`Duration`]
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_seconds)
    }
}

/// Vendor REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL for the account, device and signature endpoints
    #[serde(default = "default_api_base")]
    pub base_url: String,

    /// User agent of a known mobile client; unrecognized agents may be rejected
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_api_base() -> String {
    "https://prod.eu-da.iot.versuni.com/api/da".to_string()
}

fn default_user_agent() -> String {
    "Air (com.philips.ph.homecare; build:3.16.1; locale:en_US; Android:12 Sdk:2.2.0) okhttp/4.12.0"
        .to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
            user_agent: default_user_agent(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// MQTT control session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Secure WebSocket endpoint
    #[serde(default = "default_mqtt_url")]
    pub url: String,

    /// Name of the AWS IoT custom authorizer
    #[serde(default = "default_authorizer_name")]
    pub authorizer_name: String,

    /// Fixed tenant tag sent on the upgrade request
    #[serde(default = "default_tenant")]
    pub tenant: String,

    /// Topic namespace of the direct command protocol
    #[serde(default = "default_command_namespace")]
    pub command_namespace: String,

    /// MQTT keepalive interval (seconds)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,

    /// Fixed delay between reconnect attempts (seconds)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_seconds: u64,

    /// How long startup waits for the first CONNACK (seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_mqtt_url() -> String {
    "wss://ats.prod.eu-da.iot.versuni.com/mqtt".to_string()
}

fn default_authorizer_name() -> String {
    "CustomAuthorizer".to_string()
}

fn default_tenant() -> String {
    "da".to_string()
}

fn default_command_namespace() -> String {
    "da_ctrl".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    20
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: default_mqtt_url(),
            authorizer_name: default_authorizer_name(),
            tenant: default_tenant(),
            command_namespace: default_command_namespace(),
            keep_alive_seconds: default_keep_alive(),
            reconnect_delay_seconds: default_reconnect_delay(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

/// Credential persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Explicit credential file path. Defaults to the platform data directory.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolves the credential file path.
    ///
    /// # Errors
    ///
    /// Returns [`AirlinkError::Config`] when no path is configured and the
    /// platform has no resolvable home directory.
    pub fn resolve_credentials_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.credentials_path {
            return Ok(path.clone());
        }
        let dirs = ProjectDirs::from("com", "airlink", "airlink").ok_or_else(|| {
            AirlinkError::Config("could not determine a data directory".to_string())
        })?;
        Ok(dirs.data_dir().join("credentials.json"))
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AirlinkError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| AirlinkError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(path) = std::env::var("AIRLINK_CREDENTIALS_PATH") {
            self.storage.credentials_path = Some(PathBuf::from(path));
        }

        if let Ok(base) = std::env::var("AIRLINK_API_BASE") {
            self.api.base_url = base;
        }

        if let Ok(url) = std::env::var("AIRLINK_MQTT_URL") {
            self.mqtt.url = url;
        }

        if let Ok(timeout) = std::env::var("AIRLINK_PROMPT_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.identity.prompt_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid AIRLINK_PROMPT_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(delay) = std::env::var("AIRLINK_RECONNECT_DELAY_SECONDS") {
            if let Ok(value) = delay.parse() {
                self.mqtt.reconnect_delay_seconds = value;
            } else {
                tracing::warn!("Invalid AIRLINK_RECONNECT_DELAY_SECONDS: {}", delay);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(path) = &cli.credentials {
            self.storage.credentials_path = Some(path.clone());
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`AirlinkError::Config`] if a URL is empty or malformed or a
    /// duration is zero.
    pub fn validate(&self) -> Result<()> {
        let urls = [
            ("identity.authorize_url", &self.identity.authorize_url),
            ("identity.token_url", &self.identity.token_url),
            ("api.base_url", &self.api.base_url),
            ("mqtt.url", &self.mqtt.url),
        ];
        for (name, value) in urls {
            url::Url::parse(value)
                .map_err(|e| AirlinkError::Config(format!("{name} is not a valid URL: {e}")))?;
        }

        if !self.mqtt.url.starts_with("wss://") && !self.mqtt.url.starts_with("ws://") {
            return Err(
                AirlinkError::Config("mqtt.url must be a ws:// or wss:// URL".to_string()).into(),
            );
        }

        if self.identity.client_id.is_empty() {
            return Err(
                AirlinkError::Config("identity.client_id cannot be empty".to_string()).into(),
            );
        }

        let durations = [
            (
                "identity.prompt_timeout_seconds",
                self.identity.prompt_timeout_seconds,
            ),
            ("api.request_timeout_seconds", self.api.request_timeout_seconds),
            ("mqtt.keep_alive_seconds", self.mqtt.keep_alive_seconds),
            (
                "mqtt.reconnect_delay_seconds",
                self.mqtt.reconnect_delay_seconds,
            ),
            (
                "mqtt.connect_timeout_seconds",
                self.mqtt.connect_timeout_seconds,
            ),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(AirlinkError::Config(format!("{name} must be greater than 0")).into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;

    fn cli(args: &[&str]) -> crate::cli::Cli {
        crate::cli::Cli::parse_from(args)
    }

    #[test]
    fn test_default_config_carries_vendor_constants() {
        let config = Config::default();
        assert_eq!(config.identity.redirect_uri, "com.philips.air://loginredirect");
        assert_eq!(config.mqtt.keep_alive_seconds, 30);
        assert_eq!(config.mqtt.authorizer_name, "CustomAuthorizer");
        assert_eq!(config.mqtt.tenant, "da");
        assert_eq!(config.mqtt.command_namespace, "da_ctrl");
        assert!(config.identity.scope.starts_with("openid email profile"));
    }

    #[test]
    fn test_config_validation_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_bad_url() {
        let mut config = Config::default();
        config.api.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_non_websocket_mqtt_url() {
        let mut config = Config::default();
        config.mqtt.url = "https://example.com/mqtt".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_zero_timeout() {
        let mut config = Config::default();
        config.identity.prompt_timeout_seconds = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("prompt_timeout_seconds"));
    }

    #[test]
    fn test_config_from_partial_yaml_fills_defaults() {
        let yaml = r#"
api:
  base_url: "http://127.0.0.1:9000/api/da"
mqtt:
  reconnect_delay_seconds: 2
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api.base_url, "http://127.0.0.1:9000/api/da");
        assert_eq!(config.mqtt.reconnect_delay_seconds, 2);
        assert_eq!(config.mqtt.keep_alive_seconds, 30);
        assert_eq!(config.identity.client_id, default_client_id());
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        let config = Config::load("/nonexistent/airlink.yaml", &cli(&["airlink", "status"]))
            .expect("defaults");
        assert_eq!(config.api.base_url, default_api_base());
    }

    #[test]
    #[serial]
    fn test_cli_credentials_override() {
        let config = Config::load(
            "/nonexistent/airlink.yaml",
            &cli(&["airlink", "--credentials", "/tmp/creds.json", "status"]),
        )
        .unwrap();
        assert_eq!(
            config.storage.resolve_credentials_path().unwrap(),
            PathBuf::from("/tmp/creds.json")
        );
    }

    #[test]
    #[serial]
    fn test_env_overrides_apply() {
        std::env::set_var("AIRLINK_API_BASE", "http://127.0.0.1:1/api");
        std::env::set_var("AIRLINK_RECONNECT_DELAY_SECONDS", "9");
        let config =
            Config::load("/nonexistent/airlink.yaml", &cli(&["airlink", "status"])).unwrap();
        std::env::remove_var("AIRLINK_API_BASE");
        std::env::remove_var("AIRLINK_RECONNECT_DELAY_SECONDS");

        assert_eq!(config.api.base_url, "http://127.0.0.1:1/api");
        assert_eq!(config.mqtt.reconnect_delay_seconds, 9);
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_ignored() {
        std::env::set_var("AIRLINK_PROMPT_TIMEOUT_SECONDS", "soon");
        let config =
            Config::load("/nonexistent/airlink.yaml", &cli(&["airlink", "status"])).unwrap();
        std::env::remove_var("AIRLINK_PROMPT_TIMEOUT_SECONDS");

        assert_eq!(config.identity.prompt_timeout_seconds, 300);
    }
}
