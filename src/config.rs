/*!
 * # Configuration Module
 *
 * Startup configuration for the gateway: bind address, the secret path
 * prefix that guards every proxied route, the country allow-list, and the
 * outbound request timeout. Values come from command line flags or the
 * environment and are immutable once the server is running.
 */

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Gateway configuration
///
/// Populated from command line arguments (or the corresponding environment
/// variables) using the `clap` crate.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Address to bind the gateway to, in `host:port` form.
    #[arg(long, env = "BIND", default_value = "127.0.0.1:8080")]
    pub bind: String,

    /// Secret path prefix that every proxied route must carry.
    ///
    /// Acts as a capability token, not cryptographic security. Normalized
    /// to a single leading slash and no trailing slash.
    #[arg(long, env = "SECRET_PATH", default_value = "/my-super-secret-password-change-me")]
    pub secret_path: String,

    /// Comma-separated ISO country codes allowed through the gateway.
    ///
    /// `*` allows every country. The request country is read from the
    /// edge-injected `CF-IPCountry` header.
    #[arg(long, env = "ALLOW_COUNTRIES", default_value = "*")]
    pub allow_countries: String,

    /// Outbound request timeout in seconds. 0 disables the timeout.
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,
}

impl Config {
    /// Parse command line arguments into Config
    pub fn from_args() -> Self {
        Config::parse()
    }

    /// Parse the `bind` string into a `SocketAddr`.
    pub fn get_bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| GatewayError::Config(format!("invalid bind address: {}", e)))
    }

    /// The request timeout as a Duration, or `None` when disabled.
    pub fn get_request_timeout(&self) -> Option<Duration> {
        if self.request_timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(self.request_timeout))
        }
    }

    /// The secret prefix with exactly one leading slash and no trailing one.
    pub fn secret(&self) -> String {
        format!("/{}", self.secret_path.trim_matches('/'))
    }

    /// Upper-cased allow-list entries.
    pub fn allowed_countries(&self) -> Vec<String> {
        self.allow_countries
            .split(',')
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .collect()
    }

    /// Whether a request from `country` may pass the gateway.
    ///
    /// A missing country header only passes when the list contains `*`.
    pub fn is_country_allowed(&self, country: Option<&str>) -> bool {
        let allowed = self.allowed_countries();
        if allowed.iter().any(|c| c == "*") {
            return true;
        }
        match country {
            Some(code) => allowed.iter().any(|c| c == &code.to_ascii_uppercase()),
            None => false,
        }
    }
}
