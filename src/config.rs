//! Configuration management for the `SafeOut` service
//!
//! Handles loading configuration from files and environment variables,
//! and provides validation for all configuration settings. The loaded
//! configuration is immutable for the lifetime of the process.

use crate::SafeOutError;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure for the `SafeOut` service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeOutConfig {
    /// Gridded archive and credential configuration
    pub earthdata: EarthdataConfig,
    /// Ground station provider configuration
    pub openaq: OpenAqConfig,
    /// Fire hotspot provider configuration
    pub firms: FirmsConfig,
    /// Imagery layer configuration
    pub gibs: GibsConfig,
    /// Cache configuration
    pub cache: CacheConfig,
    /// Query limits
    pub limits: LimitsConfig,
    /// Outbound HTTP behaviour
    pub http: HttpConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// OpenTelemetry export
    pub telemetry: TelemetryConfig,
    /// Web server binding
    pub server: ServerConfig,
}

/// Credential material and endpoints for the gridded archive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EarthdataConfig {
    /// Pre-issued bearer token (preferred method)
    pub token: Option<String>,
    /// Account username
    pub username: Option<String>,
    /// Account password
    pub password: Option<String>,
    /// Explicit netrc file location
    pub netrc_path: Option<String>,
    /// Identity provider base URL
    pub urs_base_url: String,
    /// Granule search base URL
    pub cmr_base_url: String,
    /// Backoff after an ordinary failed login, in seconds
    pub backoff_seconds: u64,
    /// Backoff after the identity provider reports a locked account, in seconds
    pub lockout_backoff_seconds: u64,
    /// Precipitation collection short name
    pub precipitation_collection: String,
    /// Trailing search window for precipitation granules
    pub precipitation_days: u32,
    /// Weather reanalysis collection short name
    pub weather_collection: String,
    /// Trailing search window for weather granules
    pub weather_days: u32,
    /// Maximum granules requested per search
    pub search_page_size: u32,
}

/// Ground station provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAqConfig {
    /// API key sent as `X-API-Key`
    pub api_key: Option<String>,
    /// Base URL of the v3 API
    pub base_url: String,
    /// Number of locations requested from the provider
    pub query_limit: u32,
    /// Number of nearest stations kept in the response
    pub max_stations: usize,
}

/// Fire hotspot provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmsConfig {
    /// MAP key embedded in the request path
    pub api_key: Option<String>,
    /// Base URL of the area API
    pub base_url: String,
    /// Satellite sources queried independently
    pub sources: Vec<String>,
    /// Trailing day window, clamped to [1, 10]
    pub days_back: u32,
    /// Distance under which two detections are the same event
    pub dedup_threshold_km: f64,
    /// Maximum number of events returned
    pub max_events: usize,
}

/// Imagery layer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GibsConfig {
    /// WMS endpoint
    pub wms_url: String,
    /// Spatial reference system
    pub srs: String,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

/// Cache configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory location (granules and provider responses)
    pub dir: String,
    /// Provider response TTL in hours
    pub expiry_hours: u32,
    /// Whether provider responses are cached at all
    pub enabled: bool,
}

/// Query limits enforced at the boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub min_radius_meters: u32,
    pub max_radius_meters: u32,
    pub default_radius_meters: u32,
    pub rate_limit_per_minute: u32,
}

/// Outbound HTTP behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per HTTP request timeout in seconds
    pub timeout_seconds: u64,
    /// Maximum retries for transient failures
    pub max_retries: u32,
    /// Upper bound for a single source adapter call, in seconds
    pub source_timeout_seconds: u64,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (pretty or json)
    pub format: String,
}

/// OpenTelemetry export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Export traces, logs and metrics over OTLP/HTTP
    pub otlp_enabled: bool,
    /// Collector endpoint
    pub otlp_endpoint: String,
    /// Reported service name
    pub service_name: String,
}

/// Web server binding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Whole-request timeout in seconds
    pub request_timeout_seconds: u64,
}

// Default value functions
fn default_urs_base_url() -> String {
    "https://urs.earthdata.nasa.gov".to_string()
}

fn default_cmr_base_url() -> String {
    "https://cmr.earthdata.nasa.gov".to_string()
}

fn default_openaq_base_url() -> String {
    "https://api.openaq.org/v3".to_string()
}

fn default_firms_base_url() -> String {
    "https://firms.modaps.eosdis.nasa.gov".to_string()
}

fn default_firms_sources() -> Vec<String> {
    vec!["VIIRS_SNPP_NRT".to_string(), "MODIS_NRT".to_string()]
}

fn default_gibs_wms_url() -> String {
    "https://gibs.earthdata.nasa.gov/wms/epsg4326/best/wms.cgi".to_string()
}

fn default_cache_dir() -> String {
    "./cache".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for EarthdataConfig {
    fn default() -> Self {
        Self {
            token: None,
            username: None,
            password: None,
            netrc_path: None,
            urs_base_url: default_urs_base_url(),
            cmr_base_url: default_cmr_base_url(),
            backoff_seconds: 120,
            lockout_backoff_seconds: 600,
            precipitation_collection: "GPM_3IMERGHHE".to_string(),
            precipitation_days: 7,
            weather_collection: "M2I1NXASM".to_string(),
            weather_days: 3,
            search_page_size: 10,
        }
    }
}

impl Default for OpenAqConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openaq_base_url(),
            query_limit: 10,
            max_stations: 5,
        }
    }
}

impl Default for FirmsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_firms_base_url(),
            sources: default_firms_sources(),
            days_back: 7,
            dedup_threshold_km: 1.0,
            max_events: 20,
        }
    }
}

impl Default for GibsConfig {
    fn default() -> Self {
        Self {
            wms_url: default_gibs_wms_url(),
            srs: "EPSG:4326".to_string(),
            width: 512,
            height: 512,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            expiry_hours: 6,
            enabled: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_radius_meters: 100,
            max_radius_meters: 50_000,
            default_radius_meters: 5_000,
            rate_limit_per_minute: 100,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_retries: 2,
            source_timeout_seconds: 120,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_enabled: false,
            otlp_endpoint: "http://localhost:4318".to_string(),
            service_name: "safeout".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_seconds: 180,
        }
    }
}

impl SafeOutConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path(None)
    }

    /// Load configuration from specified path
    pub fn load_from_path(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        let config_file = config_path
            .or_else(|| std::env::var_os("SAFEOUT_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| {
                Self::get_config_path().unwrap_or_else(|| PathBuf::from("config.toml"))
            });

        if config_file.exists() {
            builder = builder.add_source(
                File::from(config_file.clone())
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // Environment overrides, e.g. SAFEOUT_FIRMS__API_KEY
        builder = builder.add_source(
            Environment::with_prefix("SAFEOUT")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("firms.sources")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .with_context(|| "Failed to build configuration")?;

        let mut config: SafeOutConfig = settings
            .try_deserialize()
            .with_context(|| "Failed to deserialize configuration")?;

        config.apply_credential_env();
        config.apply_defaults();
        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("safeout").join("config.toml"))
    }

    /// Fill credentials from the conventional provider variables when the
    /// configuration does not set them.
    pub fn apply_credential_env(&mut self) {
        fn fill(slot: &mut Option<String>, var: &str) {
            if slot.as_deref().is_none_or(str::is_empty) {
                if let Ok(value) = std::env::var(var) {
                    if !value.is_empty() {
                        *slot = Some(value);
                    }
                }
            }
        }

        fill(&mut self.earthdata.token, "EARTHDATA_TOKEN");
        fill(&mut self.earthdata.username, "EARTHDATA_USERNAME");
        fill(&mut self.earthdata.password, "EARTHDATA_PASSWORD");
        fill(&mut self.earthdata.netrc_path, "NETRC");
        fill(&mut self.firms.api_key, "FIRMS_API_KEY");
        fill(&mut self.openaq.api_key, "OPENAQ_API_KEY");
    }

    /// Apply default values to missing configuration fields
    pub fn apply_defaults(&mut self) {
        if self.earthdata.urs_base_url.is_empty() {
            self.earthdata.urs_base_url = default_urs_base_url();
        }
        if self.earthdata.cmr_base_url.is_empty() {
            self.earthdata.cmr_base_url = default_cmr_base_url();
        }
        if self.openaq.base_url.is_empty() {
            self.openaq.base_url = default_openaq_base_url();
        }
        if self.firms.base_url.is_empty() {
            self.firms.base_url = default_firms_base_url();
        }
        if self.firms.sources.is_empty() {
            self.firms.sources = default_firms_sources();
        }
        if self.gibs.wms_url.is_empty() {
            self.gibs.wms_url = default_gibs_wms_url();
        }
        if self.cache.dir.is_empty() {
            self.cache.dir = default_cache_dir();
        }
        if self.logging.level.is_empty() {
            self.logging.level = default_log_level();
        }
        if self.logging.format.is_empty() {
            self.logging.format = default_log_format();
        }
        if self.http.timeout_seconds == 0 {
            self.http.timeout_seconds = HttpConfig::default().timeout_seconds;
        }
        if self.http.source_timeout_seconds == 0 {
            self.http.source_timeout_seconds = HttpConfig::default().source_timeout_seconds;
        }
        if self.openaq.max_stations == 0 {
            self.openaq.max_stations = OpenAqConfig::default().max_stations;
        }
        if self.firms.max_events == 0 {
            self.firms.max_events = FirmsConfig::default().max_events;
        }
    }

    /// Validate all configuration settings
    pub fn validate(&self) -> Result<()> {
        self.validate_numeric_ranges()?;
        self.validate_string_values()?;
        Ok(())
    }

    /// Validate numeric configuration ranges
    fn validate_numeric_ranges(&self) -> Result<()> {
        let limits = &self.limits;
        if limits.min_radius_meters == 0 || limits.min_radius_meters > limits.max_radius_meters {
            return Err(SafeOutError::config(
                "Radius limits must satisfy 0 < min_radius_meters <= max_radius_meters",
            )
            .into());
        }

        if !(limits.min_radius_meters..=limits.max_radius_meters)
            .contains(&limits.default_radius_meters)
        {
            return Err(SafeOutError::config(
                "default_radius_meters must lie within the radius limits",
            )
            .into());
        }

        if self.http.timeout_seconds > 300 {
            return Err(SafeOutError::config("HTTP timeout cannot exceed 300 seconds").into());
        }

        if self.http.max_retries > 10 {
            return Err(SafeOutError::config("HTTP max retries cannot exceed 10").into());
        }

        if self.cache.expiry_hours > 168 {
            return Err(SafeOutError::config("Cache expiry cannot exceed 168 hours (1 week)").into());
        }

        if !(1..=10).contains(&self.firms.days_back) {
            return Err(SafeOutError::config("FIRMS days_back must be between 1 and 10").into());
        }

        if self.firms.dedup_threshold_km <= 0.0 {
            return Err(SafeOutError::config("FIRMS dedup threshold must be positive").into());
        }

        Ok(())
    }

    /// Validate string configuration values
    fn validate_string_values(&self) -> Result<()> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(SafeOutError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            ))
            .into());
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(SafeOutError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_log_formats.join(", ")
            ))
            .into());
        }

        let urls = [
            ("earthdata.urs_base_url", &self.earthdata.urs_base_url),
            ("earthdata.cmr_base_url", &self.earthdata.cmr_base_url),
            ("openaq.base_url", &self.openaq.base_url),
            ("firms.base_url", &self.firms.base_url),
            ("gibs.wms_url", &self.gibs.wms_url),
        ];
        for (key, url) in urls {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(SafeOutError::config(format!(
                    "{key} must be a valid HTTP or HTTPS URL"
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Directory where downloaded granules are stored
    #[must_use]
    pub fn granule_dir(&self) -> PathBuf {
        PathBuf::from(&self.cache.dir).join("granules")
    }

    /// Directory of the persistent provider response cache
    #[must_use]
    pub fn response_cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.cache.dir).join("responses")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SafeOutConfig::default();
        assert_eq!(config.earthdata.urs_base_url, "https://urs.earthdata.nasa.gov");
        assert_eq!(config.earthdata.backoff_seconds, 120);
        assert_eq!(config.earthdata.lockout_backoff_seconds, 600);
        assert_eq!(config.limits.min_radius_meters, 100);
        assert_eq!(config.limits.max_radius_meters, 50_000);
        assert_eq!(config.firms.sources, vec!["VIIRS_SNPP_NRT", "MODIS_NRT"]);
        assert_eq!(config.openaq.max_stations, 5);
        assert!(config.earthdata.token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = SafeOutConfig::default();
        config.logging.level = "loud".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_radius_limits_ordering() {
        let mut config = SafeOutConfig::default();
        config.limits.min_radius_meters = 60_000;
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Radius limits"));
    }

    #[test]
    fn test_firms_days_back_range() {
        let mut config = SafeOutConfig::default();
        config.firms.days_back = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = SafeOutConfig::default();
        config.openaq.base_url = "ftp://example.org".to_string();
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("openaq.base_url"));
    }

    #[test]
    fn test_apply_defaults_restores_empty_values() {
        let mut config = SafeOutConfig::default();
        config.firms.sources.clear();
        config.cache.dir.clear();
        config.apply_defaults();
        assert_eq!(config.firms.sources.len(), 2);
        assert_eq!(config.cache.dir, "./cache");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[cache]\ndir = \"/tmp/safeout-test\"\n\n[firms]\ndays_back = 3\n\n[server]\nport = 9090"
        )
        .unwrap();

        let config = SafeOutConfig::load_from_path(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.cache.dir, "/tmp/safeout-test");
        assert_eq!(config.firms.days_back, 3);
        assert_eq!(config.server.port, 9090);
        // untouched sections keep their defaults
        assert_eq!(config.limits.default_radius_meters, 5_000);
        assert_eq!(
            config.granule_dir(),
            PathBuf::from("/tmp/safeout-test").join("granules")
        );
    }
}
