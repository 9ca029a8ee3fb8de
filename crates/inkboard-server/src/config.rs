//! Server configuration from environment variables.

use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3030;
/// Stored boards expire after a week without writes.
pub const DEFAULT_BOARD_TTL_SECS: u64 = 7 * 24 * 60 * 60;
/// Per-room broadcast buffer. Slow peers that fall further behind are told to rejoin.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub board_ttl: Duration,
    pub channel_capacity: usize,
}

impl ServerConfig {
    /// Read `INKBOARD_HOST`, `INKBOARD_PORT`, `INKBOARD_BOARD_TTL_SECS` and
    /// `INKBOARD_CHANNEL_CAPACITY`. Missing or unparsable values fall back to
    /// the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let host = lookup("INKBOARD_HOST")
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        Self {
            host,
            port: parse_or(&lookup, "INKBOARD_PORT", DEFAULT_PORT),
            board_ttl: Duration::from_secs(parse_or(
                &lookup,
                "INKBOARD_BOARD_TTL_SECS",
                DEFAULT_BOARD_TTL_SECS,
            )),
            channel_capacity: parse_or(&lookup, "INKBOARD_CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY)
                .max(1),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
