use std::str::FromStr;
use std::time::Duration;

use crate::external::http_client::RetryPolicy;

/// How job progress is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// Every status query applies one step (legacy observable behavior)
    PollDriven,
    /// An owned task per job steps it on a fixed tick; status is a pure read
    Background,
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "poll" | "poll_driven" => Ok(ProgressMode::PollDriven),
            "background" => Ok(ProgressMode::Background),
            other => Err(format!("Invalid PROGRESS_MODE: {}. Must be 'poll' or 'background'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceProviderKind {
    None,
    TwelveData,
}

impl FromStr for PriceProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(PriceProviderKind::None),
            "twelvedata" => Ok(PriceProviderKind::TwelveData),
            other => Err(format!("Invalid PRICE_PROVIDER: {}. Must be 'none' or 'twelvedata'", other)),
        }
    }
}

/// Knobs of the job lifecycle
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub mode: ProgressMode,
    pub step_pct: u8,
    pub tick: Duration,
    pub initial_eta_seconds: u32,
    pub default_look_back: u32,
    pub default_horizon: u32,
    pub retention: chrono::Duration,
    pub sweep_schedule: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            mode: ProgressMode::Background,
            step_pct: 20,
            tick: Duration::from_millis(500),
            initial_eta_seconds: 5,
            default_look_back: 60,
            default_horizon: 10,
            retention: chrono::Duration::hours(1),
            sweep_schedule: "0 */5 * * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub compute_backend_url: Option<String>,
    pub compute_timeout: Duration,
    pub jobs: JobConfig,
    pub price_provider: PriceProviderKind,
    pub market_data: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            compute_backend_url: None,
            compute_timeout: Duration::from_secs(30),
            jobs: JobConfig::default(),
            price_provider: PriceProviderKind::None,
            market_data: RetryPolicy::default(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, String> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} has an invalid value: {}", key, raw)),
        _ => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let defaults = AppConfig::default();
        let job_defaults = defaults.jobs;

        let config = Self {
            port: env_or("PORT", defaults.port)?,
            compute_backend_url: std::env::var("COMPUTE_BACKEND_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            compute_timeout: Duration::from_millis(env_or(
                "COMPUTE_TIMEOUT_MS",
                defaults.compute_timeout.as_millis() as u64,
            )?),
            jobs: JobConfig {
                mode: env_or("PROGRESS_MODE", job_defaults.mode)?,
                step_pct: env_or("PROGRESS_STEP_PCT", job_defaults.step_pct)?,
                tick: Duration::from_millis(env_or("PROGRESS_TICK_MS", job_defaults.tick.as_millis() as u64)?),
                initial_eta_seconds: env_or("INITIAL_ETA_SECONDS", job_defaults.initial_eta_seconds)?,
                default_look_back: env_or("DEFAULT_LOOK_BACK", job_defaults.default_look_back)?,
                default_horizon: env_or("DEFAULT_HORIZON", job_defaults.default_horizon)?,
                retention: chrono::Duration::seconds(env_or(
                    "JOB_RETENTION_SECS",
                    job_defaults.retention.num_seconds(),
                )?),
                sweep_schedule: std::env::var("JOB_SWEEP_SCHEDULE").unwrap_or(job_defaults.sweep_schedule),
            },
            price_provider: env_or("PRICE_PROVIDER", defaults.price_provider)?,
            market_data: RetryPolicy {
                timeout: Duration::from_millis(env_or(
                    "MARKET_DATA_TIMEOUT_MS",
                    defaults.market_data.timeout.as_millis() as u64,
                )?),
                retries: env_or("MARKET_DATA_RETRIES", defaults.market_data.retries)?,
                backoff: Duration::from_millis(env_or(
                    "MARKET_DATA_BACKOFF_MS",
                    defaults.market_data.backoff.as_millis() as u64,
                )?),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.jobs.step_pct == 0 || self.jobs.step_pct > 100 {
            return Err("PROGRESS_STEP_PCT must be between 1 and 100".to_string());
        }
        if self.jobs.tick.is_zero() {
            return Err("PROGRESS_TICK_MS must be positive".to_string());
        }
        if self.jobs.retention <= chrono::Duration::zero() {
            return Err("JOB_RETENTION_SECS must be positive".to_string());
        }
        if !(10..=365).contains(&self.jobs.default_look_back) {
            return Err("DEFAULT_LOOK_BACK must be between 10 and 365".to_string());
        }
        if !(1..=60).contains(&self.jobs.default_horizon) {
            return Err("DEFAULT_HORIZON must be between 1 and 60".to_string());
        }
        if let Some(url) = &self.compute_backend_url {
            url::Url::parse(url).map_err(|e| format!("COMPUTE_BACKEND_URL is not a valid URL: {}", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.jobs.default_look_back, 60);
        assert_eq!(config.jobs.default_horizon, 10);
        assert_eq!(config.jobs.step_pct, 20);
    }

    #[test]
    fn test_progress_mode_parsing() {
        assert_eq!("poll".parse::<ProgressMode>().unwrap(), ProgressMode::PollDriven);
        assert_eq!("Background".parse::<ProgressMode>().unwrap(), ProgressMode::Background);
        assert!("sometimes".parse::<ProgressMode>().is_err());
    }

    #[test]
    fn test_rejects_bad_backend_url() {
        let config = AppConfig {
            compute_backend_url: Some("not a url".into()),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_step() {
        let mut config = AppConfig::default();
        config.jobs.step_pct = 0;
        assert!(config.validate().is_err());
    }
}
