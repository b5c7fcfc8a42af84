//! Configuration Module
//!
//! Handles loading and validating server configuration from environment variables.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{EvictionPolicy, FetchMode, SegmentConfig, SIZE_LIMIT_MAX, SIZE_LIMIT_MIN};
use crate::error::{CacheError, Result};

// == Cache Role ==
/// How this process joins the shared segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheRole {
    /// Creates the segment at startup and tears it down on shutdown
    #[default]
    Owner,
    /// Attaches to a segment created by a running owner; only detaches
    Worker,
}

impl CacheRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheRole::Owner => "owner",
            CacheRole::Worker => "worker",
        }
    }
}

impl fmt::Display for CacheRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheRole {
    type Err = CacheError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(CacheRole::Owner),
            "worker" => Ok(CacheRole::Worker),
            other => Err(CacheError::InvalidConfig(format!("unknown cache role '{}'", other))),
        }
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Whether this process owns the shared segment or attaches to it
    pub role: CacheRole,
    /// Cache size limit in bytes
    pub size_limit: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Directory whose files are served and cached
    pub webroot: PathBuf,
    /// Name prefix of the shared objects
    pub segment_name: String,
    /// Directory holding the shared objects
    pub segment_dir: PathBuf,
    /// Victim order when the cache is full
    pub eviction: EvictionPolicy,
    /// Whether population I/O runs under the segment lock
    pub fetch_mode: FetchMode,
    /// Connect and read timeout for origin fetches, in seconds
    pub origin_timeout_secs: Option<u64>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_ROLE` - `owner` or `worker` (default: `owner`)
    /// - `CACHE_SIZE_LIMIT` - Size limit in bytes (default: 2097152)
    /// - `SERVER_PORT` - HTTP server port (default: 8080)
    /// - `WEBROOT_PATH` - Served directory (default: `.`)
    /// - `CACHE_SEGMENT_NAME` - Shared object prefix (default: `shm_webcache`)
    /// - `CACHE_SEGMENT_DIR` - Shared object directory (default: `/dev/shm` or temp)
    /// - `CACHE_EVICTION` - `slot-order`, `lru` or `lfu` (default: `slot-order`)
    /// - `CACHE_FETCH_MODE` - `locked` or `unlocked` (default: `locked`)
    /// - `ORIGIN_TIMEOUT_SECS` - Origin timeout in seconds (default: none)
    ///
    /// A value that is set but does not parse is an error rather than falling
    /// back to the default.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`] but reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            role: parse_var(&lookup, "CACHE_ROLE")?.unwrap_or(defaults.role),
            size_limit: parse_var(&lookup, "CACHE_SIZE_LIMIT")?.unwrap_or(defaults.size_limit),
            server_port: parse_var(&lookup, "SERVER_PORT")?.unwrap_or(defaults.server_port),
            webroot: lookup("WEBROOT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.webroot),
            segment_name: lookup("CACHE_SEGMENT_NAME").unwrap_or(defaults.segment_name),
            segment_dir: lookup("CACHE_SEGMENT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.segment_dir),
            eviction: parse_var(&lookup, "CACHE_EVICTION")?.unwrap_or(defaults.eviction),
            fetch_mode: parse_var(&lookup, "CACHE_FETCH_MODE")?.unwrap_or(defaults.fetch_mode),
            origin_timeout_secs: parse_var(&lookup, "ORIGIN_TIMEOUT_SECS")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the ranges that parsing alone cannot enforce.
    pub fn validate(&self) -> Result<()> {
        if !(SIZE_LIMIT_MIN..=SIZE_LIMIT_MAX).contains(&self.size_limit) {
            return Err(CacheError::InvalidConfig(format!(
                "CACHE_SIZE_LIMIT {} outside {}..={}",
                self.size_limit, SIZE_LIMIT_MIN, SIZE_LIMIT_MAX
            )));
        }
        if self.segment_name.is_empty() || self.segment_name.contains('/') {
            return Err(CacheError::InvalidConfig(format!(
                "CACHE_SEGMENT_NAME '{}' must be non-empty and contain no '/'",
                self.segment_name
            )));
        }
        if self.origin_timeout_secs == Some(0) {
            return Err(CacheError::InvalidConfig(
                "ORIGIN_TIMEOUT_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn segment_config(&self) -> SegmentConfig {
        SegmentConfig::new(&self.segment_name, &self.segment_dir, self.size_limit)
    }

    pub fn origin_timeout(&self) -> Option<Duration> {
        self.origin_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: CacheRole::default(),
            size_limit: SIZE_LIMIT_MAX,
            server_port: 8080,
            webroot: PathBuf::from("."),
            segment_name: "shm_webcache".to_string(),
            segment_dir: SegmentConfig::default_dir(),
            eviction: EvictionPolicy::default(),
            fetch_mode: FetchMode::default(),
            origin_timeout_secs: None,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            CacheError::InvalidConfig(format!("{}='{}': {}", name, raw, e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.role, CacheRole::Owner);
        assert_eq!(config.size_limit, 2_097_152);
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.webroot, PathBuf::from("."));
        assert_eq!(config.segment_name, "shm_webcache");
        assert_eq!(config.eviction, EvictionPolicy::SlotOrder);
        assert_eq!(config.fetch_mode, FetchMode::Locked);
        assert_eq!(config.origin_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_without_variables_uses_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_reads_every_variable() {
        let config = Config::from_lookup(lookup_from(&[
            ("CACHE_ROLE", "worker"),
            ("CACHE_SIZE_LIMIT", "8192"),
            ("SERVER_PORT", "9000"),
            ("WEBROOT_PATH", "/srv/www"),
            ("CACHE_SEGMENT_NAME", "site"),
            ("CACHE_SEGMENT_DIR", "/tmp/segments"),
            ("CACHE_EVICTION", "lru"),
            ("CACHE_FETCH_MODE", "unlocked"),
            ("ORIGIN_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.role, CacheRole::Worker);
        assert_eq!(config.size_limit, 8192);
        assert_eq!(config.server_port, 9000);
        assert_eq!(config.webroot, PathBuf::from("/srv/www"));
        assert_eq!(config.eviction, EvictionPolicy::LeastRecentlyUsed);
        assert_eq!(config.fetch_mode, FetchMode::Unlocked);
        assert_eq!(config.origin_timeout(), Some(Duration::from_secs(5)));

        let segment = config.segment_config();
        assert_eq!(segment.name, "site");
        assert_eq!(segment.dir, PathBuf::from("/tmp/segments"));
        assert_eq!(segment.size_limit, 8192);
    }

    #[test]
    fn test_config_rejects_out_of_range_size_limit() {
        for value in ["4095", "2097153"] {
            let result = Config::from_lookup(lookup_from(&[("CACHE_SIZE_LIMIT", value)]));
            assert!(matches!(result, Err(CacheError::InvalidConfig(_))), "{}", value);
        }
    }

    #[test]
    fn test_config_rejects_unparsable_values() {
        for (name, value) in [
            ("CACHE_ROLE", "leader"),
            ("CACHE_SIZE_LIMIT", "lots"),
            ("SERVER_PORT", "-1"),
            ("CACHE_EVICTION", "random"),
            ("CACHE_FETCH_MODE", "sometimes"),
            ("ORIGIN_TIMEOUT_SECS", "0"),
            ("CACHE_SEGMENT_NAME", "a/b"),
        ] {
            let result = Config::from_lookup(lookup_from(&[(name, value)]));
            assert!(matches!(result, Err(CacheError::InvalidConfig(_))), "{}={}", name, value);
        }
    }
}
