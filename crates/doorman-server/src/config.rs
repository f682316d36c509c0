use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use regex::Regex;

/// Process configuration, collected from the environment. A `.env` file is
/// honored when present.
pub struct Config {
    pub db_path: PathBuf,
    pub bind_addr: String,
    pub slack_bot_token: String,
    pub slack_app_token: String,
    pub domains: Vec<String>,
    pub channel_pattern: Regex,
    pub message_limit: u32,
    pub resync_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let db_path = std::env::var("DOORMAN_DB_PATH")
            .unwrap_or_else(|_| "doorman.db".into())
            .into();
        let bind_addr =
            std::env::var("DOORMAN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
        let slack_bot_token = std::env::var("DOORMAN_SLACK_BOT_TOKEN")
            .context("DOORMAN_SLACK_BOT_TOKEN is required")?;
        let slack_app_token = std::env::var("DOORMAN_SLACK_APP_TOKEN")
            .context("DOORMAN_SLACK_APP_TOKEN is required")?;

        let domains: Vec<String> = std::env::var("DOORMAN_DOMAINS")
            .context("DOORMAN_DOMAINS is required (comma-separated)")?
            .split(',')
            .map(|domain| domain.trim().to_string())
            .filter(|domain| !domain.is_empty())
            .collect();

        let channel_pattern = Regex::new(
            &std::env::var("DOORMAN_CHANNEL_PATTERN").unwrap_or_else(|_| ".*".into()),
        )
        .context("DOORMAN_CHANNEL_PATTERN is not a valid regex")?;

        let message_limit: u32 = std::env::var("DOORMAN_MESSAGE_LIMIT")
            .unwrap_or_else(|_| "3".into())
            .parse()
            .context("DOORMAN_MESSAGE_LIMIT must be a number")?;

        let resync_secs: u64 = std::env::var("DOORMAN_RESYNC_SECS")
            .unwrap_or_else(|_| "3600".into())
            .parse()
            .context("DOORMAN_RESYNC_SECS must be a number of seconds")?;

        Ok(Self {
            db_path,
            bind_addr,
            slack_bot_token,
            slack_app_token,
            domains,
            channel_pattern,
            message_limit,
            resync_interval: Duration::from_secs(resync_secs),
        })
    }
}
