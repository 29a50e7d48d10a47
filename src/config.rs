use std::{env, str::FromStr, time::Duration};

use crate::error::{AppError, AppResult};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_REPLY_FIELD: &str = "message";

/// Runtime settings, read from the process environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub environment: String,
    pub database_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub ai_timeout: Duration,
    pub session_ttl: Duration,
    /// Field of the transport-compatible reply body that carries the text.
    pub reply_field: String,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub enabled: bool,
    /// Wall-clock offset the daily schedule is expressed in (Africa/Johannesburg is +2, no DST).
    pub utc_offset_hours: i32,
    pub reminder_hour: u32,
    pub good_luck_hour: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            environment: "development".to_string(),
            database_url: None,
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            ai_timeout: Duration::from_secs(8),
            session_ttl: Duration::from_secs(60 * 60),
            reply_field: DEFAULT_REPLY_FIELD.to_string(),
            jobs: JobsConfig::default(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            utc_offset_hours: 2,
            reminder_hour: 8,
            good_luck_hour: 6,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let reminder_hour = parse_or(&text, "REMINDER_HOUR", defaults.jobs.reminder_hour)?;
        let good_luck_hour = parse_or(&text, "GOOD_LUCK_HOUR", defaults.jobs.good_luck_hour)?;
        for (key, hour) in [("REMINDER_HOUR", reminder_hour), ("GOOD_LUCK_HOUR", good_luck_hour)] {
            if hour > 23 {
                return Err(AppError::Config(format!("{key} must be between 0 and 23")));
            }
        }
        let utc_offset_hours =
            parse_or(&text, "JOBS_UTC_OFFSET_HOURS", defaults.jobs.utc_offset_hours)?;
        if !(-12..=14).contains(&utc_offset_hours) {
            return Err(AppError::Config(
                "JOBS_UTC_OFFSET_HOURS must be between -12 and 14".to_string(),
            ));
        }

        let reply_field = text("REPLY_FIELD").unwrap_or(defaults.reply_field);

        Ok(Self {
            port: parse_or(&text, "PORT", defaults.port)?,
            environment: text("APP_ENV")
                .or_else(|| text("NODE_ENV"))
                .unwrap_or(defaults.environment),
            database_url: text("DATABASE_URL"),
            openai_api_key: text("OPENAI_API_KEY").filter(|key| key != "your_openai_api_key_here"),
            openai_model: text("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_base_url: text("OPENAI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.openai_base_url),
            ai_timeout: Duration::from_secs(
                parse_or(&text, "AI_TIMEOUT_SECS", defaults.ai_timeout.as_secs())?.max(1),
            ),
            session_ttl: Duration::from_secs(
                parse_or(&text, "SESSION_TTL_SECS", defaults.session_ttl.as_secs())?.max(1),
            ),
            reply_field,
            jobs: JobsConfig {
                enabled: parse_flag(&text, "JOBS_ENABLED", defaults.jobs.enabled)?,
                utc_offset_hours,
                reminder_hour,
                good_luck_hour,
            },
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn parse_or<T, F>(text: &F, key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match text(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}

fn parse_flag<F>(text: &F, key: &str, default: bool) -> AppResult<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match text(key).map(|raw| raw.to_ascii_lowercase()) {
        None => Ok(default),
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::Config(format!("{key} has invalid value '{raw}'"))),
        },
    }
}
