use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::connection_manager::ConnectionConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub streams: Vec<StreamSettings>,
}

/// Local status API
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Default filter directive, overridden by RUST_LOG
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub token: Option<String>,
    #[serde(default = "default_auth_header")]
    pub header: String,
    #[serde(default = "default_auth_scheme")]
    pub scheme: String,
}

/// One configured stream: its id plus the connection config
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSettings {
    pub id: String,
    #[serde(flatten)]
    pub connection: ConnectionConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9464
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

fn default_auth_scheme() -> String {
    "Bearer".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.enabled", false)?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 9464)?
            .set_default("telemetry.filter", "info")?
            .set_default("telemetry.json", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_ENABLED, SERVER_PORT, AUTH_TOKEN, TELEMETRY_JSON, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject duplicate stream ids and invalid stream configs
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for stream in &self.streams {
            if !seen.insert(stream.id.as_str()) {
                return Err(ConfigError::Message(format!(
                    "duplicate stream id '{}'",
                    stream.id
                )));
            }
            stream.connection.validate().map_err(|e| {
                ConfigError::Message(format!("stream '{}': {}", stream.id, e))
            })?;
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: None,
            header: default_auth_header(),
            scheme: default_auth_scheme(),
        }
    }
}
