use std::env;

use crate::error::AppError;

/// One week.
const MAX_LOCATION_STALE_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    /// Courier earnings for orders without a final delivery fee.
    pub default_delivery_fee: i64,
    /// Seconds after which a courier position counts as stale.
    pub location_stale_secs: i64,
    /// Notifications kept per user; older ones are dropped.
    pub inbox_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            default_delivery_fee: 5000,
            location_stale_secs: 60,
            inbox_capacity: 200,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            default_delivery_fee: parse_or_default(
                "DEFAULT_DELIVERY_FEE",
                defaults.default_delivery_fee,
            )?,
            location_stale_secs: parse_or_default(
                "LOCATION_STALE_SECS",
                defaults.location_stale_secs,
            )?,
            inbox_capacity: parse_or_default("INBOX_CAPACITY", defaults.inbox_capacity)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.event_buffer_size == 0 {
            return Err(AppError::Internal(
                "invalid EVENT_BUFFER_SIZE: must be > 0".to_string(),
            ));
        }
        if self.default_delivery_fee < 0 {
            return Err(AppError::Internal(
                "invalid DEFAULT_DELIVERY_FEE: must be >= 0".to_string(),
            ));
        }
        if self.inbox_capacity == 0 {
            return Err(AppError::Internal(
                "invalid INBOX_CAPACITY: must be > 0".to_string(),
            ));
        }
        if !(1..=MAX_LOCATION_STALE_SECS).contains(&self.location_stale_secs) {
            return Err(AppError::Internal(format!(
                "invalid LOCATION_STALE_SECS: must be between 1 and {MAX_LOCATION_STALE_SECS}"
            )));
        }

        Ok(())
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
