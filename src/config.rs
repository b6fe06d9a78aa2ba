// Process configuration, read once from the environment at startup.

use std::time::Duration;

use thiserror::Error;

use crate::backoff::{BackoffPolicy, MAX_DELAY_SECS};

pub const DEFAULT_PORTAL_HOST: &str = "ais.usvisa-info.com";
const DEFAULT_REFRESH_DELAY_SECS: f64 = 3.0;
const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 30.0;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("{key} {reason}, got: {value}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub country_code: String,
    pub schedule_id: String,
    pub facility_id: String,
    pub portal_host: String,
    pub refresh_delay_secs: f64,
    pub reschedule_min_improvement_days: u32,
    pub failure_backoff_multiplier: f64,
    pub failure_backoff_max_delay_secs: f64,
    pub request_timeout_secs: f64,
}

impl Config {
    /// Loads `.env` (if any) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // empty strings count as absent, but "0" is a value
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let required = [
            "EMAIL",
            "PASSWORD",
            "SCHEDULE_ID",
            "FACILITY_ID",
            "COUNTRY_CODE",
            "RESCHEDULE_MIN_IMPROVEMENT_DAYS",
            "FAILURE_BACKOFF_MULTIPLIER",
            "FAILURE_BACKOFF_MAX_DELAY",
        ];
        let missing: Vec<String> = required
            .iter()
            .filter(|key| get(**key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let required_value = |key: &str| get(key).ok_or_else(|| ConfigError::Missing(vec![key.to_string()]));

        let refresh_delay_secs = match get("REFRESH_DELAY") {
            Some(raw) => parse_seconds("REFRESH_DELAY", &raw)?,
            None => DEFAULT_REFRESH_DELAY_SECS,
        };
        let request_timeout_secs = match get("REQUEST_TIMEOUT") {
            Some(raw) => parse_seconds("REQUEST_TIMEOUT", &raw)?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        let raw_days = required_value("RESCHEDULE_MIN_IMPROVEMENT_DAYS")?;
        let reschedule_min_improvement_days =
            raw_days
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::Invalid {
                    key: "RESCHEDULE_MIN_IMPROVEMENT_DAYS",
                    value: raw_days.clone(),
                    reason: "must be a non-negative integer",
                })?;

        let failure_backoff_multiplier = parse_positive(
            "FAILURE_BACKOFF_MULTIPLIER",
            &required_value("FAILURE_BACKOFF_MULTIPLIER")?,
        )?;
        let failure_backoff_max_delay_secs = parse_seconds(
            "FAILURE_BACKOFF_MAX_DELAY",
            &required_value("FAILURE_BACKOFF_MAX_DELAY")?,
        )?;

        Ok(Self {
            credentials: Credentials {
                email: required_value("EMAIL")?,
                password: required_value("PASSWORD")?,
            },
            country_code: required_value("COUNTRY_CODE")?,
            schedule_id: required_value("SCHEDULE_ID")?,
            facility_id: required_value("FACILITY_ID")?,
            portal_host: get("PORTAL_HOST").unwrap_or_else(|| DEFAULT_PORTAL_HOST.to_string()),
            refresh_delay_secs,
            reschedule_min_improvement_days,
            failure_backoff_multiplier,
            failure_backoff_max_delay_secs,
            request_timeout_secs,
        })
    }

    // https://<host>/en-<countryCode>/niv
    pub fn portal_base_url(&self) -> String {
        format!("https://{}/en-{}/niv", self.portal_host, self.country_code)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_secs_f64(self.refresh_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs)
    }

    // the refresh delay doubles as the backoff base
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay_secs: self.refresh_delay_secs,
            multiplier: self.failure_backoff_multiplier,
            max_delay_secs: self.failure_backoff_max_delay_secs,
        }
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<f64, ConfigError> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "must be a positive number",
        }),
    }
}

// positive and small enough to become a Duration
fn parse_seconds(key: &'static str, raw: &str) -> Result<f64, ConfigError> {
    let secs = parse_positive(key, raw)?;
    if secs > MAX_DELAY_SECS || Duration::try_from_secs_f64(secs).is_err() {
        return Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "must be at most one year in seconds",
        });
    }
    Ok(secs)
}
