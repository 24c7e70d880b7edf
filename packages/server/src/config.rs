use anyhow::{Context, Result};
use dotenvy::dotenv;
use scan_engine::EngineConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub openai_api_key: String,
    pub openai_model: String,
    pub firecrawl_api_key: String,
    pub tavily_api_key: Option<String>,
    pub notification_webhook_url: Option<String>,
    /// Seconds between poll ticks in the long-running worker.
    pub poll_interval_secs: u64,
    pub poll_fan_out: usize,
    pub poll_batch_limit: usize,
    pub max_step_duration_secs: u64,
    pub invocation_timeout_secs: u64,
    pub crawl_max_pages: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = EngineConfig::default();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: parse_or("PORT", 8080)?,
            openai_api_key: env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?,
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            firecrawl_api_key: env::var("FIRECRAWL_API_KEY")
                .context("FIRECRAWL_API_KEY must be set")?,
            tavily_api_key: env::var("TAVILY_API_KEY").ok().filter(|k| !k.is_empty()),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .ok()
                .filter(|u| !u.is_empty()),
            poll_interval_secs: parse_or("POLL_INTERVAL_SECS", 60)?,
            poll_fan_out: parse_or("POLL_FAN_OUT", defaults.fan_out)?,
            poll_batch_limit: parse_or("POLL_BATCH_LIMIT", defaults.poll_batch_limit)?,
            max_step_duration_secs: parse_or(
                "MAX_STEP_DURATION_SECS",
                defaults.max_step_duration.as_secs(),
            )?,
            invocation_timeout_secs: parse_or(
                "INVOCATION_TIMEOUT_SECS",
                defaults.invocation_timeout.as_secs(),
            )?,
            crawl_max_pages: parse_or("CRAWL_MAX_PAGES", defaults.crawl_max_pages)?,
        })
    }

    /// Engine tunables derived from this configuration, validated.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let config = EngineConfig::default()
            .with_fan_out(self.poll_fan_out)
            .with_poll_batch_limit(self.poll_batch_limit)
            .with_max_step_duration(Duration::from_secs(self.max_step_duration_secs))
            .with_invocation_timeout(Duration::from_secs(self.invocation_timeout_secs))
            .with_crawl_max_pages(self.crawl_max_pages);
        config.validate().context("Invalid engine configuration")?;
        Ok(config)
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let defaults = EngineConfig::default();
        Config {
            database_url: "postgres://localhost/scans".to_string(),
            port: 8080,
            openai_api_key: "sk-test".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            firecrawl_api_key: "fc-test".to_string(),
            tavily_api_key: None,
            notification_webhook_url: None,
            poll_interval_secs: 60,
            poll_fan_out: defaults.fan_out,
            poll_batch_limit: defaults.poll_batch_limit,
            max_step_duration_secs: 300,
            invocation_timeout_secs: 280,
            crawl_max_pages: 50,
        }
    }

    #[test]
    fn engine_config_carries_overrides() {
        let mut config = config();
        config.poll_fan_out = 2;
        let engine = config.engine_config().unwrap();
        assert_eq!(engine.fan_out, 2);
        assert_eq!(engine.crawl_max_pages, 50);
        assert_eq!(engine.max_step_duration, Duration::from_secs(300));
    }

    #[test]
    fn timeout_at_or_above_lock_expiry_is_rejected() {
        let mut config = config();
        config.invocation_timeout_secs = 300;
        assert!(config.engine_config().is_err());
    }

    #[test]
    fn parse_or_falls_back_when_unset() {
        let value: u64 = parse_or("SCAN_SERVER_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
