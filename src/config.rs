use std::env;

use crate::error::AppError;

/// Upper bound for OTP lifetimes and rate-limit windows: one day.
pub const MAX_OTP_WINDOW_SECONDS: i64 = 86_400;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub otp_ttl_seconds: i64,
    pub otp_max_attempts: u32,
    pub otp_issue_limit: usize,
    pub otp_issue_window_seconds: i64,
    pub otp_sweep_interval_seconds: u64,
    pub notify_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            event_buffer_size: 1024,
            otp_ttl_seconds: 600,
            otp_max_attempts: 3,
            otp_issue_limit: 5,
            otp_issue_window_seconds: 900,
            otp_sweep_interval_seconds: 60,
            notify_timeout_ms: 2000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let log_format = match env::var("LOG_FORMAT") {
            Ok(raw) if raw.eq_ignore_ascii_case("json") => LogFormat::Json,
            Ok(raw) if raw.eq_ignore_ascii_case("compact") => LogFormat::Compact,
            Ok(raw) => {
                return Err(AppError::Internal(format!(
                    "invalid LOG_FORMAT: {raw}, expected compact or json"
                )));
            }
            Err(_) => defaults.log_format,
        };

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            otp_ttl_seconds: parse_or_default("OTP_TTL_SECONDS", defaults.otp_ttl_seconds)?,
            otp_max_attempts: parse_or_default("OTP_MAX_ATTEMPTS", defaults.otp_max_attempts)?,
            otp_issue_limit: parse_or_default("OTP_ISSUE_LIMIT", defaults.otp_issue_limit)?,
            otp_issue_window_seconds: parse_or_default(
                "OTP_ISSUE_WINDOW_SECONDS",
                defaults.otp_issue_window_seconds,
            )?,
            otp_sweep_interval_seconds: parse_or_default(
                "OTP_SWEEP_INTERVAL_SECONDS",
                defaults.otp_sweep_interval_seconds,
            )?,
            notify_timeout_ms: parse_or_default("NOTIFY_TIMEOUT_MS", defaults.notify_timeout_ms)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if !(1..=MAX_OTP_WINDOW_SECONDS).contains(&self.otp_ttl_seconds) {
            return Err(AppError::Internal(format!(
                "OTP_TTL_SECONDS must be between 1 and {MAX_OTP_WINDOW_SECONDS}"
            )));
        }
        if !(1..=MAX_OTP_WINDOW_SECONDS).contains(&self.otp_issue_window_seconds) {
            return Err(AppError::Internal(format!(
                "OTP_ISSUE_WINDOW_SECONDS must be between 1 and {MAX_OTP_WINDOW_SECONDS}"
            )));
        }
        if self.otp_issue_limit == 0 {
            return Err(AppError::Internal("OTP_ISSUE_LIMIT must be > 0".to_string()));
        }
        if self.otp_max_attempts == 0 {
            return Err(AppError::Internal("OTP_MAX_ATTEMPTS must be > 0".to_string()));
        }
        if self.event_buffer_size == 0 {
            return Err(AppError::Internal("EVENT_BUFFER_SIZE must be > 0".to_string()));
        }
        if self.otp_sweep_interval_seconds == 0 {
            return Err(AppError::Internal(
                "OTP_SWEEP_INTERVAL_SECONDS must be > 0".to_string(),
            ));
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
