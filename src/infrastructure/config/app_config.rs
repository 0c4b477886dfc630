//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use super::args::CliArgs;
use crate::infrastructure::image::{
    DEFAULT_COST_LIMIT, HttpSourceConfig, ImageLoaderConfig, target_pixel_size,
};

pub(super) const APP_NAME: &str = "fitfeed";
pub(super) const APP_QUALIFIER: &str = "com";
pub(super) const APP_ORGANIZATION: &str = "fitfeed";

const BYTES_PER_MB: usize = 1024 * 1024;

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration, read from `config.toml` and overridden by CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log file path.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Memory cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Transport and reachability probe settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Feed prefetch settings.
    #[serde(default)]
    pub prefetch: PrefetchSettings,
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total decoded-byte budget of the memory cache, in MiB.
    #[serde(default = "default_cost_limit_mb")]
    pub cost_limit_mb: usize,

    /// Entries older than this are treated as missing. Unset means no expiry.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cost_limit_mb: default_cost_limit_mb(),
            max_age_secs: None,
        }
    }
}

impl CacheConfig {
    /// Cost limit in bytes.
    #[must_use]
    pub const fn cost_limit_bytes(&self) -> usize {
        self.cost_limit_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Entry lifetime, if expiry is enabled.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

/// `[network]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Responses kept for HTTP revalidation.
    #[serde(default = "default_http_cache_entries")]
    pub http_cache_entries: usize,

    /// Largest response body kept for revalidation, in KiB.
    #[serde(default = "default_http_cache_max_body_kb")]
    pub http_cache_max_body_kb: usize,

    /// User-Agent header; defaults to `fitfeed/<version>`.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// `host:port` probed to decide reachability.
    #[serde(default = "default_probe_addr")]
    pub probe_addr: String,

    /// Seconds between reachability probes.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Connect timeout of one probe, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            http_cache_entries: default_http_cache_entries(),
            http_cache_max_body_kb: default_http_cache_max_body_kb(),
            user_agent: None,
            probe_addr: default_probe_addr(),
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl NetworkConfig {
    /// Timeout for one image or feed request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Pause between reachability probes.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Connect timeout of a single reachability probe.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// `[prefetch]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefetchSettings {
    /// Posts considered per prefetch batch.
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Avatar edge length in points.
    #[serde(default = "default_avatar_points")]
    pub avatar_points: f32,

    /// Media thumbnail edge length in points.
    #[serde(default = "default_thumbnail_points")]
    pub thumbnail_points: f32,

    /// Pixels per point.
    #[serde(default = "default_display_scale")]
    pub display_scale: f32,

    /// Posts remembered for image lookups.
    #[serde(default = "default_index_capacity")]
    pub index_capacity: usize,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            avatar_points: default_avatar_points(),
            thumbnail_points: default_thumbnail_points(),
            display_scale: default_display_scale(),
            index_capacity: default_index_capacity(),
        }
    }
}

impl PrefetchSettings {
    /// Avatar bound in device pixels.
    #[must_use]
    pub fn avatar_pixel_size(&self) -> u32 {
        target_pixel_size(self.avatar_points, self.display_scale)
    }

    /// Thumbnail bound in device pixels.
    #[must_use]
    pub fn thumbnail_pixel_size(&self) -> u32 {
        target_pixel_size(self.thumbnail_points, self.display_scale)
    }
}

const fn default_cost_limit_mb() -> usize {
    DEFAULT_COST_LIMIT / BYTES_PER_MB
}

const fn default_request_timeout_secs() -> u64 {
    20
}

const fn default_http_cache_entries() -> usize {
    128
}

const fn default_http_cache_max_body_kb() -> usize {
    4096
}

fn default_probe_addr() -> String {
    "1.1.1.1:443".to_string()
}

const fn default_probe_interval_secs() -> u64 {
    10
}

const fn default_probe_timeout_ms() -> u64 {
    1500
}

const fn default_max_items() -> usize {
    12
}

const fn default_avatar_points() -> f32 {
    40.0
}

const fn default_thumbnail_points() -> f32 {
    160.0
}

const fn default_display_scale() -> f32 {
    2.0
}

const fn default_index_capacity() -> usize {
    512
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cost_limit_mb) = args.cost_limit_mb {
            self.cache.cost_limit_mb = cost_limit_mb;
        }
        if let Some(max_age_secs) = args.max_age_secs {
            self.cache.max_age_secs = Some(max_age_secs);
        }
        if let Some(display_scale) = args.display_scale {
            self.prefetch.display_scale = display_scale;
        }
        if let Some(max_items) = args.max_items {
            self.prefetch.max_items = max_items;
        }
        if let Some(probe_addr) = &args.probe_addr {
            self.network.probe_addr.clone_from(probe_addr);
        }
    }

    /// Builds the HTTP source settings.
    #[must_use]
    pub fn http_source_config(&self) -> HttpSourceConfig {
        let defaults = HttpSourceConfig::default();
        HttpSourceConfig {
            timeout: self.network.request_timeout(),
            user_agent: self.network.user_agent.clone().unwrap_or(defaults.user_agent),
            cache_entries: self.network.http_cache_entries,
            max_cached_body: self.network.http_cache_max_body_kb.saturating_mul(1024),
        }
    }

    /// Builds the loader settings.
    #[must_use]
    pub fn loader_config(&self) -> ImageLoaderConfig {
        ImageLoaderConfig {
            request_timeout: self.network.request_timeout(),
            ..ImageLoaderConfig::default()
        }
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("fitfeed.log"))
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            log_level: LogLevel::Info,
            cache: CacheConfig::default(),
            network: NetworkConfig::default(),
            prefetch: PrefetchSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
            log_level = "debug"

            [cache]
            cost_limit_mb = 8
            max_age_secs = 600

            [prefetch]
            display_scale = 3.0
        "#;

        let config: AppConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.cache.cost_limit_bytes(), 8 * 1024 * 1024);
        assert_eq!(config.cache.max_age(), Some(Duration::from_secs(600)));
        assert_eq!(config.network, NetworkConfig::default());
        assert_eq!(config.prefetch.max_items, 12);
        assert_eq!(config.prefetch.avatar_pixel_size(), 120);
        assert_eq!(config.prefetch.thumbnail_pixel_size(), 480);
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.cache.cost_limit_bytes(), DEFAULT_COST_LIMIT);
        assert_eq!(config.cache.max_age(), None);
        assert_eq!(config.prefetch.avatar_pixel_size(), 80);
        assert_eq!(config.prefetch.thumbnail_pixel_size(), 320);
        assert_eq!(config.network.request_timeout(), Duration::from_secs(20));

        let http = config.http_source_config();
        assert_eq!(http.cache_entries, 128);
        assert_eq!(http.max_cached_body, 4096 * 1024);
        assert!(http.user_agent.starts_with("fitfeed/"));
    }

    #[test]
    fn test_serialized_default_parses_back() {
        let content = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        let parsed: AppConfig = toml::from_str(&content).expect("parse");
        assert_eq!(parsed, AppConfig::default());
    }

    #[test]
    fn test_merge_with_args() {
        let args = CliArgs::parse_from([
            "fitfeed",
            "--log-level",
            "trace",
            "--cost-limit-mb",
            "16",
            "--display-scale",
            "3",
            "load",
            "https://cdn.example.com/a.png",
        ]);
        let mut config = AppConfig::default();
        config.merge_with_args(&args);

        assert_eq!(config.log_level, LogLevel::Trace);
        assert_eq!(config.cache.cost_limit_mb, 16);
        assert!((config.prefetch.display_scale - 3.0).abs() < f32::EPSILON);
        assert_eq!(config.prefetch.max_items, 12);
    }
}
