use std::net::IpAddr;
use std::str::FromStr;

use axum::http::HeaderMap;
use serde::Deserialize;

pub mod args;
pub mod error;
pub mod events;
pub mod protocol;
pub mod shutdown;
pub mod types;

pub use error::{Error, Result};

/// One-time process setup shared by every binary.
pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}

/// Parse and validate a semver pack version string.
pub fn parse_version(v: &str) -> Result<semver::Version> {
    semver::Version::from_str(v)
        .map_err(|e| Error::Validation(format!("invalid semver '{v}': {e}")))
}

/// Highest version among `versions`, if any parse.
pub fn latest_version<'a, I>(versions: I) -> Option<semver::Version>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .filter_map(|v| semver::Version::from_str(v).ok())
        .max()
}

#[derive(Deserialize, Default, Clone, Copy, Debug)]
pub struct Pagination {
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl Pagination {
    pub const MAX_LIMIT: i64 = 1000;

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, Self::MAX_LIMIT)
    }
}

/// Source address as seen through proxies, for access logs.
pub fn get_source_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(forwarded_for) = headers.get("x-forwarded-for")
        && let Ok(forwarded_for) = forwarded_for.to_str()
        && let Some(ip_str) = forwarded_for.split(',').next()
        && let Ok(ip) = ip_str.trim().parse()
    {
        return Some(ip);
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(ip_str) = real_ip.to_str()
        && let Ok(ip) = ip_str.trim().parse()
    {
        return Some(ip);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_version_orders_by_semver() {
        let latest = latest_version(["1.0.0", "1.10.0", "1.9.9"]).unwrap();
        assert_eq!(latest.to_string(), "1.10.0");
        // junk entries are skipped, not fatal
        let latest = latest_version(["not-a-version", "2.0.1"]).unwrap();
        assert_eq!(latest.to_string(), "2.0.1");
        assert!(latest_version([]).is_none());
    }

    #[test]
    fn pagination_clamps_limit() {
        let p = Pagination {
            offset: 0,
            limit: Some(100_000),
        };
        assert_eq!(p.effective_limit(), Pagination::MAX_LIMIT);
        let d = Pagination::default();
        assert_eq!(d.effective_limit(), 100);
    }
}
