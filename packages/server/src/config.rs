use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::domains::sessions::LifecycleSettings;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub bridge_url: String,
    pub sessions_dir: PathBuf,
    pub health_check_interval: Duration,
    pub otp_sweep_interval: Duration,
    pub pairing_timeout: Duration,
    pub otp_ttl: Duration,
    pub default_country_code: String,
    pub otp_message_template: Option<String>,
    /// Generated codes are echoed back in API responses (development only)
    pub expose_codes: bool,
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "otp-gateway".to_string()),
            bridge_url: env::var("BRIDGE_URL")
                .unwrap_or_else(|_| "http://localhost:3100".to_string()),
            sessions_dir: env::var("SESSIONS_DIR")
                .unwrap_or_else(|_| "./sessions".to_string())
                .into(),
            health_check_interval: secs_var("HEALTH_CHECK_INTERVAL_SECS", 300)?,
            otp_sweep_interval: secs_var("OTP_SWEEP_INTERVAL_SECS", 60)?,
            pairing_timeout: secs_var("PAIRING_TIMEOUT_SECS", 30)?,
            otp_ttl: secs_var("OTP_TTL_SECS", 300)?,
            default_country_code: env::var("DEFAULT_COUNTRY_CODE")
                .unwrap_or_else(|_| "62".to_string()),
            otp_message_template: env::var("OTP_MESSAGE_TEMPLATE")
                .ok()
                .filter(|t| !t.trim().is_empty()),
            expose_codes: env::var("APP_ENV")
                .map(|v| v == "development")
                .unwrap_or(false),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
        })
    }

    /// Lifecycle tuning derived from this configuration
    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            pairing_timeout: self.pairing_timeout,
            sessions_dir: self.sessions_dir.clone(),
            ..LifecycleSettings::default()
        }
    }
}

fn secs_var(name: &str, default: u64) -> Result<Duration> {
    let secs = match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{} must be a number of seconds", name))?,
        Err(_) => default,
    };
    Ok(Duration::from_secs(secs))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_skips_blanks() {
        assert_eq!(
            parse_list("http://a.test, ,http://b.test,"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
        assert!(parse_list("").is_empty());
    }
}
