use std::env;

use crate::engine::simulator::SimTiming;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub timing: SimTiming,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            timing: SimTiming {
                tick_secs: parse_or_default("SIM_TICK_SECS", 10)?,
                leg_to_store_secs: parse_or_default("SIM_LEG_TO_STORE_SECS", 90)?,
                leg_to_customer_secs: parse_or_default("SIM_LEG_TO_CUSTOMER_SECS", 240)?,
                dwell_ticks: parse_or_default("SIM_DWELL_TICKS", 1)?,
            },
        })
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
