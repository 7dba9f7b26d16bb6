//! Gateway process configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values (`$VAR` / `${VAR}`), the same convention a
//! facilitator binary in this ecosystem uses, plus a handful of top-level
//! environment variable overrides for deployment convenience.
//!
//! # Environment Variables
//!
//! - `CONFIG` — path to the configuration file (default: `config.toml`)
//! - `HOST` / `PORT` — override the bind address
//! - `DATABASE_URL` — Postgres connection string for the Payment Store
//! - `FACILITATOR_URL` — base URL of the external verify/settle facilitator
//! - `RUST_LOG` — tracing filter
//! - `GATEWAY_JANITOR_INTERVAL_SECS` — pending-payment expiry sweep cadence

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `8402`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Postgres connection string backing the Payment Store and Tool/Server Registry.
    pub database_url: String,

    /// Base URL of the external x402 facilitator (`verify`/`settle` endpoints).
    pub facilitator_url: String,

    /// Optional bearer/API-key header value sent to the facilitator.
    #[serde(default)]
    pub facilitator_api_key: Option<String>,

    /// How often the pending-payment janitor sweeps for expired records.
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,

    /// Maximum number of concurrent in-flight calls per upstream `server_id`.
    #[serde(default = "default_upstream_concurrency")]
    pub upstream_concurrency: usize,

    /// Idle timeout, in seconds, before an upstream MCP session is evicted.
    #[serde(default = "default_upstream_idle_secs")]
    pub upstream_idle_secs: u64,

    /// Managed-wallet signer configuration, keyed by network name.
    #[serde(default)]
    pub managed_wallets: std::collections::HashMap<String, ManagedWalletConfig>,
}

/// Per-network managed-wallet signer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedWalletConfig {
    /// Private key for the custodial signer (hex, with or without `0x` prefix).
    /// Supports `$VAR` / `${VAR}` for environment variable expansion.
    pub signer_private_key: String,

    /// Numeric EIP-155 chain ID for this network.
    pub chain_id: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

const fn default_port() -> u16 {
    8402
}

const fn default_janitor_interval_secs() -> u64 {
    60
}

const fn default_upstream_concurrency() -> usize {
    32
}

const fn default_upstream_idle_secs() -> u64 {
    300
}

impl GatewayConfig {
    /// The facilitator request timeout (§5: 15s).
    pub const FACILITATOR_TIMEOUT: Duration = Duration::from_secs(15);

    /// The wallet signing timeout (§5: 30s).
    pub const SIGNING_TIMEOUT: Duration = Duration::from_secs(30);

    /// The registry DB read timeout (§5: 5s).
    pub const REGISTRY_READ_TIMEOUT: Duration = Duration::from_secs(5);

    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a
    /// required field (`database_url`, `facilitator_url`) is still missing
    /// after environment overrides are applied.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };

        let expanded = expand_env_vars(&content);
        let mut config: Self = toml::from_str(&expanded)?;

        if let Ok(host) = std::env::var("HOST")
            && let Ok(addr) = host.parse()
        {
            config.host = addr;
        }
        if let Ok(port) = std::env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }
        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }
        if let Ok(fac_url) = std::env::var("FACILITATOR_URL") {
            config.facilitator_url = fac_url;
        }
        if let Ok(interval) = std::env::var("GATEWAY_JANITOR_INTERVAL_SECS")
            && let Ok(secs) = interval.parse()
        {
            config.janitor_interval_secs = secs;
        }

        if config.database_url.is_empty() {
            return Err("DATABASE_URL is required".into());
        }
        if config.facilitator_url.is_empty() {
            return Err("FACILITATOR_URL is required".into());
        }

        Ok(config)
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next();
            }

            let mut var_name = String::new();
            while let Some(&c) = chars.peek() {
                if braced {
                    if c == '}' {
                        chars.next();
                        break;
                    }
                } else if !c.is_ascii_alphanumeric() && c != '_' {
                    break;
                }
                var_name.push(c);
                chars.next();
            }

            if var_name.is_empty() {
                result.push('$');
                if braced {
                    result.push('{');
                }
            } else if let Ok(val) = std::env::var(&var_name) {
                result.push_str(&val);
            } else {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&var_name);
                if braced {
                    result.push('}');
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_braced_and_bare_vars() {
        // SAFETY: test-local env var, not shared with other tests' assertions.
        unsafe { std::env::set_var("GATEWAY_TEST_VAR", "base-sepolia") };
        let expanded = expand_env_vars("network = \"${GATEWAY_TEST_VAR}\", n2 = \"$GATEWAY_TEST_VAR\"");
        assert_eq!(
            expanded,
            "network = \"base-sepolia\", n2 = \"base-sepolia\""
        );
        unsafe { std::env::remove_var("GATEWAY_TEST_VAR") };
    }

    #[test]
    fn leaves_unresolved_vars_untouched() {
        let expanded = expand_env_vars("key = \"${GATEWAY_DEFINITELY_UNSET_VAR}\"");
        assert_eq!(expanded, "key = \"${GATEWAY_DEFINITELY_UNSET_VAR}\"");
    }

    #[test]
    fn load_from_missing_file_falls_back_to_env() {
        // SAFETY: test-local env vars.
        unsafe {
            std::env::set_var("DATABASE_URL", "postgres://localhost/gateway_test");
            std::env::set_var("FACILITATOR_URL", "https://x402.example/facilitator");
        }
        let config = GatewayConfig::load_from("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config.port, 8402);
        assert_eq!(config.database_url, "postgres://localhost/gateway_test");
        unsafe {
            std::env::remove_var("DATABASE_URL");
            std::env::remove_var("FACILITATOR_URL");
        }
    }
}
