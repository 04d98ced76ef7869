//! Environment-driven configuration for both services.
//!
//! | Variable                    | Default                 |
//! |-----------------------------|-------------------------|
//! | `BILLING_BIND_ADDR`         | `0.0.0.0:8080`          |
//! | `STOCK_BIND_ADDR`           | `0.0.0.0:7001`          |
//! | `STOCK_SERVICE_URL`         | `http://localhost:7001` |
//! | `STOCK_CLIENT_TIMEOUT_SECS` | `30`                    |
//! | `BILLING_DATABASE_URL`      | unset (in-memory)       |
//! | `STOCK_DATABASE_URL`        | unset (in-memory)       |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::resilience::ResilienceConfig;

/// Billing service settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingConfig {
    pub bind_addr: SocketAddr,
    pub stock_service_url: String,
    pub database_url: Option<String>,
    pub resilience: ResilienceConfig,
}

/// Stock service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
}

impl BillingConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (used by `from_env` and tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let timeout_secs: u64 = parse_or(&lookup, "STOCK_CLIENT_TIMEOUT_SECS", 30)?;
        if timeout_secs == 0 {
            anyhow::bail!("STOCK_CLIENT_TIMEOUT_SECS must be at least 1");
        }
        let resilience = ResilienceConfig {
            attempt_timeout: Duration::from_secs(timeout_secs),
            ..Default::default()
        };

        Ok(Self {
            bind_addr: parse_or(&lookup, "BILLING_BIND_ADDR", default_addr(8080))?,
            stock_service_url: non_empty(&lookup, "STOCK_SERVICE_URL")
                .unwrap_or_else(|| "http://localhost:7001".to_string()),
            database_url: non_empty(&lookup, "BILLING_DATABASE_URL"),
            resilience,
        })
    }
}

impl StockConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            bind_addr: parse_or(&lookup, "STOCK_BIND_ADDR", default_addr(7001))?,
            database_url: non_empty(&lookup, "STOCK_DATABASE_URL"),
        })
    }
}

fn default_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], port))
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty(lookup, key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
