use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use thiserror::Error;

pub mod cors;
pub mod security;

pub use cors::{create_cors_layer, parse_origins};
pub use security::create_security_headers_layer;

const DEV_QR_SECRET: &str = "entrada-dev-qr-secret";
const DEV_PAYMENT_WEBHOOK_SECRET: &str = "entrada-dev-payment-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Settings for the HTTP layers around the router.
#[derive(Debug, Clone, Default)]
pub struct HttpSettings {
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
    /// Only behind HTTPS.
    pub include_hsts: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub port: u16,
    /// Wall-clock budget for every write transaction.
    pub tx_timeout: Duration,
    pub qr_signing_secret: String,
    /// Shared with the payment collaborator to sign settlement callbacks.
    pub payment_webhook_secret: String,
    /// Offset of the venue calendar that defines "today".
    pub utc_offset: FixedOffset,
    pub is_production: bool,
    pub http: HttpSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_production = lookup("RUST_ENV")
            .map(|v| v.to_lowercase() == "production")
            .unwrap_or(false);

        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing {
            name: "DATABASE_URL",
        })?;

        let qr_signing_secret = secret(&lookup, "QR_SIGNING_SECRET", DEV_QR_SECRET, is_production)?;
        let payment_webhook_secret = secret(
            &lookup,
            "PAYMENT_WEBHOOK_SECRET",
            DEV_PAYMENT_WEBHOOK_SECRET,
            is_production,
        )?;

        let tx_timeout_secs: u64 = parse(&lookup, "ORDER_TX_TIMEOUT_SECS", 10)?;
        if tx_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "ORDER_TX_TIMEOUT_SECS",
                value: tx_timeout_secs.to_string(),
            });
        }

        let offset_minutes: i32 = parse(&lookup, "EVENT_UTC_OFFSET_MINUTES", -300)?;
        let utc_offset =
            FixedOffset::east_opt(offset_minutes * 60).ok_or(ConfigError::Invalid {
                name: "EVENT_UTC_OFFSET_MINUTES",
                value: offset_minutes.to_string(),
            })?;

        Ok(Self {
            database_url,
            database_max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            port: parse(&lookup, "PORT", 3001)?,
            tx_timeout: Duration::from_secs(tx_timeout_secs),
            qr_signing_secret,
            payment_webhook_secret,
            utc_offset,
            is_production,
            http: HttpSettings {
                allowed_origins: parse_origins(
                    lookup("CORS_ALLOWED_ORIGINS")
                        .as_deref()
                        .unwrap_or(cors::DEFAULT_ALLOWED_ORIGINS),
                ),
                include_hsts: is_production,
            },
        })
    }
}

/// Required in production; development falls back to a fixed value.
fn secret<F>(
    lookup: &F,
    name: &'static str,
    dev_default: &str,
    is_production: bool,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).filter(|s| !s.is_empty()) {
        Some(secret) => Ok(secret),
        None if is_production => Err(ConfigError::Missing { name }),
        None => {
            tracing::warn!("{name} not set, using the development secret");
            Ok(dev_default.to_string())
        }
    }
}

fn parse<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
        }),
    }
}
