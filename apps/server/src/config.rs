//! Configuration management for the relay

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub sources: SourcesConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub terminology: TerminologyConfig,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum request body size in bytes. Default: 1 MB
    #[serde(default = "default_max_request_body_size")]
    pub max_request_body_size: usize,
}

/// Where resources are read from, in fallback order.
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    /// Primary FHIR gateway base URL (also serves `Patient/$summary`)
    #[serde(default = "default_primary_url")]
    pub primary_url: String,
    /// Secondary FHIR gateway, consulted when the primary answers 404/410
    pub secondary_url: Option<String>,
    /// Legacy record REST API, last in the chain
    pub legacy_url: Option<String>,
    pub legacy_username: Option<String>,
    pub legacy_password: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// `_count` sent with every search
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Upper bound on `next` links followed per search
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    #[serde(default = "default_destination_url")]
    pub url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminologyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_terminology_url")]
    pub url: String,
    #[serde(default = "default_terminology_timeout")]
    pub timeout_seconds: u64,
}

impl Default for TerminologyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_terminology_url(),
            timeout_seconds: default_terminology_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwardingConfig {
    /// Cap on concurrent source/destination calls within one run
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Organization substituted for unresolvable `serviceProvider` /
    /// `managingOrganization` references. Stripped instead when unset.
    #[serde(default)]
    pub default_organization: Option<DefaultOrganizationConfig>,
    /// Remove `system` from medication and vaccine codings in assembled documents
    #[serde(default)]
    pub strip_code_systems: bool,
    /// Base used to make unmapped relative references absolute in assembled documents
    #[serde(default)]
    pub external_base_url: Option<String>,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            default_organization: None,
            strip_code_systems: false,
            external_base_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DefaultOrganizationConfig {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON formatting for logs (recommended for production)
    #[serde(default)]
    pub json: bool,

    /// Enable file logging in addition to console
    #[serde(default)]
    pub file_enabled: bool,

    /// Directory for log files (default: ./logs)
    #[serde(default = "default_log_directory")]
    pub file_directory: String,

    /// Log file prefix (default: relay)
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,

    /// Log rotation: daily, hourly, minutely, never (default: daily)
    #[serde(default = "default_log_rotation")]
    pub file_rotation: String,

    /// Enable OpenTelemetry integration
    #[serde(default)]
    pub opentelemetry_enabled: bool,

    /// OpenTelemetry Collector endpoint (OTLP/gRPC)
    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: String,

    /// Trace sampling ratio (0.0 - 1.0): 1.0 = always, 0.1 = 10%
    #[serde(default = "default_trace_sample_ratio")]
    pub trace_sample_ratio: f64,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Deployment environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub deployment_environment: String,

    /// Service version (defaults to cargo package version)
    pub service_version: Option<String>,

    #[serde(default = "default_otlp_timeout")]
    pub otlp_timeout_seconds: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file_enabled: false,
            file_directory: default_log_directory(),
            file_prefix: default_log_file_prefix(),
            file_rotation: default_log_rotation(),
            opentelemetry_enabled: false,
            otlp_endpoint: default_otlp_endpoint(),
            trace_sample_ratio: default_trace_sample_ratio(),
            service_name: default_service_name(),
            deployment_environment: default_environment(),
            service_version: None,
            otlp_timeout_seconds: default_otlp_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_max_request_body_size() -> usize {
    1024 * 1024
}

fn default_primary_url() -> String {
    "http://localhost:8080/fhir".to_string()
}

fn default_destination_url() -> String {
    "http://localhost:8081/fhir".to_string()
}

fn default_terminology_url() -> String {
    "http://localhost:8082".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_terminology_timeout() -> u64 {
    5
}

fn default_page_size() -> u32 {
    100
}

fn default_max_pages() -> usize {
    50
}

fn default_max_concurrent_requests() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> String {
    "./logs".to_string()
}

fn default_log_file_prefix() -> String {
    "relay".to_string()
}

fn default_log_rotation() -> String {
    "daily".to_string()
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_trace_sample_ratio() -> f64 {
    1.0
}

fn default_service_name() -> String {
    "relay".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_otlp_timeout() -> u64 {
    10
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default(
                "server.max_request_body_size",
                default_max_request_body_size() as i64,
            )?
            .set_default("sources.primary_url", default_primary_url())?
            .set_default("sources.timeout_seconds", default_timeout_seconds())?
            .set_default("sources.page_size", default_page_size())?
            .set_default("sources.max_pages", default_max_pages() as i64)?
            .set_default("destination.url", default_destination_url())?
            .set_default("destination.timeout_seconds", default_timeout_seconds())?
            .set_default("terminology.enabled", false)?
            .set_default("terminology.url", default_terminology_url())?
            .set_default("terminology.timeout_seconds", default_terminology_timeout())?
            .set_default(
                "forwarding.max_concurrent_requests",
                default_max_concurrent_requests() as i64,
            )?
            .set_default("forwarding.strip_code_systems", false)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?
            .set_default("logging.file_enabled", false)?
            .set_default("logging.file_directory", default_log_directory())?
            .set_default("logging.file_prefix", default_log_file_prefix())?
            .set_default("logging.file_rotation", default_log_rotation())?
            .set_default("logging.opentelemetry_enabled", false)?
            .set_default("logging.otlp_endpoint", default_otlp_endpoint())?
            .set_default("logging.trace_sample_ratio", default_trace_sample_ratio())?
            .set_default("logging.service_name", default_service_name())?
            .set_default("logging.deployment_environment", default_environment())?
            .set_default("logging.otlp_timeout_seconds", default_otlp_timeout())?
            // Add config file if exists
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables
            // Example: RELAY__DESTINATION__URL -> config.destination.url
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        Ok(addr.parse()?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        validate_url("sources.primary_url", &self.sources.primary_url)?;
        if let Some(url) = &self.sources.secondary_url {
            validate_url("sources.secondary_url", url)?;
        }
        if let Some(url) = &self.sources.legacy_url {
            validate_url("sources.legacy_url", url)?;
        }
        if self.sources.legacy_username.is_some() != self.sources.legacy_password.is_some() {
            return Err(
                "sources.legacy_username and sources.legacy_password must be set together"
                    .to_string(),
            );
        }
        if self.sources.timeout_seconds == 0 {
            return Err("sources.timeout_seconds must be > 0".to_string());
        }
        if self.sources.page_size == 0 {
            return Err("sources.page_size must be > 0".to_string());
        }
        if self.sources.max_pages == 0 {
            return Err("sources.max_pages must be > 0".to_string());
        }

        validate_url("destination.url", &self.destination.url)?;
        if self.destination.timeout_seconds == 0 {
            return Err("destination.timeout_seconds must be > 0".to_string());
        }

        if self.terminology.enabled {
            validate_url("terminology.url", &self.terminology.url)?;
            if self.terminology.timeout_seconds == 0 {
                return Err("terminology.timeout_seconds must be > 0".to_string());
            }
        }

        if self.forwarding.max_concurrent_requests == 0 {
            return Err("forwarding.max_concurrent_requests must be > 0".to_string());
        }
        if let Some(org) = &self.forwarding.default_organization {
            if !relay_models::is_valid_id(&org.id) {
                return Err(format!(
                    "forwarding.default_organization.id '{}' is not a valid FHIR id",
                    org.id
                ));
            }
        }
        if let Some(url) = &self.forwarding.external_base_url {
            validate_url("forwarding.external_base_url", url)?;
        }

        if !(0.0..=1.0).contains(&self.logging.trace_sample_ratio) {
            return Err("logging.trace_sample_ratio must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }
}

impl SourcesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl DestinationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl TerminologyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn validate_url(key: &str, value: &str) -> Result<(), String> {
    let url = Url::parse(value).map_err(|e| format!("{key} is not a valid URL ({value}): {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("{key} must use http or https, got '{other}'")),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                cors_origins: Vec::new(),
                max_request_body_size: default_max_request_body_size(),
            },
            sources: SourcesConfig {
                primary_url: default_primary_url(),
                secondary_url: None,
                legacy_url: None,
                legacy_username: None,
                legacy_password: None,
                timeout_seconds: default_timeout_seconds(),
                page_size: default_page_size(),
                max_pages: default_max_pages(),
            },
            destination: DestinationConfig {
                url: default_destination_url(),
                timeout_seconds: default_timeout_seconds(),
            },
            terminology: TerminologyConfig::default(),
            forwarding: ForwardingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
