//! Origin address parsing: `host[:port]` and its extraction from a query.

use std::fmt;
use std::str::FromStr;

use crate::error::CacheError;

/// Port used when the origin names none.
pub const DEFAULT_ORIGIN_PORT: u16 = 80;

/// Query parameter that names the origin explicitly.
const ORIGIN_PARAM: &str = "origin";

// == Origin Address ==
/// A remote origin as named in a query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginAddr {
    pub host: String,
    pub port: u16,
    /// The text as given, sent verbatim in the `Host` header
    pub raw: String,
}

impl FromStr for OriginAddr {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (host, port) = match raw.split_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    CacheError::InvalidOrigin(format!("bad port in '{}'", raw))
                })?;
                (host, port)
            }
            None => (raw, DEFAULT_ORIGIN_PORT),
        };

        if host.is_empty() {
            return Err(CacheError::InvalidOrigin(format!(
                "no host in '{}'",
                raw
            )));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            raw: raw.to_string(),
        })
    }
}

impl fmt::Display for OriginAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// == Origin From Query ==
/// Extracts the origin from a raw query string.
///
/// Uses the `origin` parameter when present, otherwise the value of the
/// first `name=value` pair.
pub fn origin_from_query(query: &str) -> Result<OriginAddr, CacheError> {
    let pairs: Vec<(&str, &str)> = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .collect();

    let value = pairs
        .iter()
        .find(|(name, _)| *name == ORIGIN_PARAM)
        .or_else(|| pairs.first())
        .map(|(_, value)| *value)
        .ok_or_else(|| {
            CacheError::InvalidOrigin(format!("query '{}' names no origin", query))
        })?;

    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_only_defaults_port() {
        let addr: OriginAddr = "example.com".parse().unwrap();
        assert_eq!(addr.host, "example.com");
        assert_eq!(addr.port, 80);
        assert_eq!(addr.raw, "example.com");
    }

    #[test]
    fn test_parse_host_and_port() {
        let addr: OriginAddr = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port, 8080);
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            "".parse::<OriginAddr>(),
            Err(CacheError::InvalidOrigin(_))
        ));
        assert!(matches!(
            ":80".parse::<OriginAddr>(),
            Err(CacheError::InvalidOrigin(_))
        ));
        assert!(matches!(
            "host:http".parse::<OriginAddr>(),
            Err(CacheError::InvalidOrigin(_))
        ));
        assert!(matches!(
            "host:70000".parse::<OriginAddr>(),
            Err(CacheError::InvalidOrigin(_))
        ));
    }

    #[test]
    fn test_query_prefers_origin_param() {
        let addr = origin_from_query("lang=en&origin=files.local:9000").unwrap();
        assert_eq!(addr.host, "files.local");
        assert_eq!(addr.port, 9000);
    }

    #[test]
    fn test_query_falls_back_to_first_value() {
        let addr = origin_from_query("host=example.org&x=1").unwrap();
        assert_eq!(addr.host, "example.org");
        assert_eq!(addr.port, 80);
    }

    #[test]
    fn test_query_without_value_is_invalid() {
        assert!(matches!(
            origin_from_query("refresh"),
            Err(CacheError::InvalidOrigin(_))
        ));
        assert!(matches!(
            origin_from_query("origin="),
            Err(CacheError::InvalidOrigin(_))
        ));
    }
}
