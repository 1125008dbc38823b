//! Configuration for the Airthings exporter.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Airthings API credentials and devices.
    #[serde(default)]
    pub airthings: AirthingsConfig,

    /// HTTP endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Airthings cloud API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirthingsConfig {
    /// OAuth client identifier.
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret.
    #[serde(default)]
    pub client_secret: String,

    /// Devices to poll, in order.
    #[serde(default)]
    pub device_ids: Vec<String>,

    /// Token endpoint.
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Base URL of the devices API (without trailing slash).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// OAuth scope requested with the token.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Timeout for each upstream request (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_token_url() -> String {
    "https://accounts-api.airthings.com/v1/token".to_string()
}

fn default_api_base_url() -> String {
    "https://ext-api.airthings.com/v1".to_string()
}

fn default_scope() -> String {
    "read:device:current_values".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl AirthingsConfig {
    /// Parsed `api_base_url`; device paths are appended to it segment by segment.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = parse_http_url("api_base_url", &self.api_base_url)?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::Validation(format!(
                "api_base_url cannot be used as a base: {}",
                self.api_base_url
            )));
        }
        Ok(url)
    }
}

fn parse_http_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::Validation(format!("Invalid {}: {} ({})", field, raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::Validation(format!(
            "{} must use http or https, got {}",
            field, scheme
        ))),
    }
}

impl Default for AirthingsConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            device_ids: Vec::new(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            scope: default_scope(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:8000").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

impl HttpConfig {
    /// Replace the port of the listen address, keeping the host.
    pub fn set_port(&mut self, port: u16) {
        let host = match self.listen.rsplit_once(':') {
            Some((host, _)) => host.to_string(),
            None => "0.0.0.0".to_string(),
        };
        self.listen = format!("{}:{}", host, port);
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// Not validated, so CLI overrides can still fill in missing fields.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ExporterConfig = json5::from_str(&content)?;
        Ok(config)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let airthings = &self.airthings;

        if airthings.client_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "client_id must not be empty".to_string(),
            ));
        }

        if airthings.client_secret.trim().is_empty() {
            return Err(ConfigError::Validation(
                "client_secret must not be empty".to_string(),
            ));
        }

        if airthings.device_ids.is_empty() {
            return Err(ConfigError::Validation(
                "at least one device id is required".to_string(),
            ));
        }

        if airthings.device_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "device ids must not be empty".to_string(),
            ));
        }

        parse_http_url("token_url", &airthings.token_url)?;
        airthings.base_url()?;

        if airthings.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }

        // Validate listen address format
        if self.http.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.http.listen
            )));
        }

        if !self.http.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        airthings: {
            client_id: "id",
            client_secret: "secret",
            device_ids: ["2960000001"]
        }
    }"#;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse(MINIMAL).unwrap();

        assert_eq!(config.http.listen, "0.0.0.0:8000");
        assert_eq!(config.http.path, "/metrics");
        assert_eq!(
            config.airthings.token_url,
            "https://accounts-api.airthings.com/v1/token"
        );
        assert_eq!(config.airthings.api_base_url, "https://ext-api.airthings.com/v1");
        assert_eq!(config.airthings.scope, "read:device:current_values");
        assert_eq!(config.airthings.request_timeout_secs, 30);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            airthings: {
                client_id: "id",
                client_secret: "secret",
                device_ids: ["2960000001", "2930000002"],
                token_url: "http://127.0.0.1:9000/token",
                api_base_url: "http://127.0.0.1:9000/v1",
                request_timeout_secs: 5,
            },
            http: {
                listen: "127.0.0.1:9101",
                path: "/airthings/metrics",
            },
            logging: {
                level: "debug",
                format: "json",
            },
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.airthings.device_ids, vec!["2960000001", "2930000002"]);
        assert_eq!(config.airthings.token_url, "http://127.0.0.1:9000/token");
        assert_eq!(config.airthings.request_timeout_secs, 5);
        assert_eq!(config.http.listen, "127.0.0.1:9101");
        assert_eq!(config.http.path, "/airthings/metrics");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_validate_missing_credentials() {
        let result = ExporterConfig::parse("{}");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("client_id"));

        let result = ExporterConfig::parse(r#"{ airthings: { client_id: "id" } }"#);
        assert!(result.unwrap_err().to_string().contains("client_secret"));
    }

    #[test]
    fn test_validate_no_devices() {
        let json = r#"{ airthings: { client_id: "id", client_secret: "s" } }"#;
        let result = ExporterConfig::parse(json);
        assert!(result.unwrap_err().to_string().contains("device id"));
    }

    #[test]
    fn test_validate_invalid_listen() {
        let mut config = ExporterConfig::parse(MINIMAL).unwrap();
        config.http.listen = "not-an-address".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("Invalid listen address"));
    }

    #[test]
    fn test_validate_invalid_path() {
        let mut config = ExporterConfig::parse(MINIMAL).unwrap();
        config.http.path = "no-leading-slash".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("must start with /"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = ExporterConfig::parse(MINIMAL).unwrap();
        config.airthings.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_urls() {
        let mut config = ExporterConfig::parse(MINIMAL).unwrap();
        config.airthings.api_base_url = "not a url".to_string();
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("api_base_url"));

        let mut config = ExporterConfig::parse(MINIMAL).unwrap();
        config.airthings.token_url = "ftp://example.com/token".to_string();
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("http or https"));

        let config = ExporterConfig::parse(MINIMAL).unwrap();
        let base = config.airthings.base_url().unwrap();
        assert_eq!(base.as_str(), "https://ext-api.airthings.com/v1");
    }

    #[test]
    fn test_set_port() {
        let mut http = HttpConfig::default();
        http.set_port(9101);
        assert_eq!(http.listen, "0.0.0.0:9101");

        http.listen = "[::1]:8000".to_string();
        http.set_port(8001);
        assert_eq!(http.listen, "[::1]:8001");
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = ExporterConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.airthings.client_id, "id");
        assert!(config.validate().is_ok());
    }
}
