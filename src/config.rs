//! Relay configuration loaded from environment variables.
//!
//! `PORT` holds the listen endpoint, either `host:port` or a bare port.

use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: &str = "8080";
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;
pub const DEFAULT_PONG_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// `host:port` to bind
    pub listen_addr: String,

    /// Frames buffered per connection before it is closed as too slow
    pub outbound_queue: usize,

    /// Keepalive ping period. `None` disables pings and pong timeouts.
    pub ping_interval: Option<Duration>,

    pub pong_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            ping_interval: None,
            pong_timeout: Duration::from_secs(DEFAULT_PONG_TIMEOUT_SECS),
        }
    }
}

impl RelayConfig {
    /// Falls back to defaults for anything unset or unparsable
    pub fn from_env() -> Self {
        let listen_addr = std::env::var("PORT")
            .map(|endpoint| parse_endpoint(&endpoint))
            .unwrap_or_else(|_| RelayConfig::default().listen_addr);

        let ping_secs: u64 = parse_env("RELAY_PING_INTERVAL_SECS", 0);

        Self {
            listen_addr,
            outbound_queue: parse_env("RELAY_OUTBOUND_QUEUE", DEFAULT_OUTBOUND_QUEUE).max(1),
            ping_interval: (ping_secs > 0).then(|| Duration::from_secs(ping_secs)),
            pong_timeout: Duration::from_secs(parse_env(
                "RELAY_PONG_TIMEOUT_SECS",
                DEFAULT_PONG_TIMEOUT_SECS,
            )),
        }
    }
}

/// Splits on the last `:`. Everything before it is the host, defaulting to
/// `127.0.0.1` when empty.
pub fn parse_endpoint(endpoint: &str) -> String {
    let (host, port) = match endpoint.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => ("", endpoint),
    };
    let host = if host.is_empty() { DEFAULT_HOST } else { host };
    let port = if port.is_empty() { DEFAULT_PORT } else { port };
    format!("{}:{}", host, port)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_uses_loopback() {
        assert_eq!(parse_endpoint("9000"), "127.0.0.1:9000");
    }

    #[test]
    fn host_and_port() {
        assert_eq!(parse_endpoint("0.0.0.0:3000"), "0.0.0.0:3000");
        assert_eq!(parse_endpoint(":3000"), "127.0.0.1:3000");
    }

    #[test]
    fn ipv6_host_keeps_brackets() {
        assert_eq!(parse_endpoint("[::1]:8080"), "[::1]:8080");
    }

    #[test]
    fn empty_endpoint_falls_back() {
        assert_eq!(parse_endpoint(""), "127.0.0.1:8080");
    }

    #[test]
    fn defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.outbound_queue, DEFAULT_OUTBOUND_QUEUE);
        assert!(config.ping_interval.is_none());
    }
}
