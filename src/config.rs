use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::UserId;
use crate::sync::{PollIntervals, SessionSettings};

pub const DEFAULT_CONFIG_PATH: &str = "config/inbox.json";
pub const TOKEN_ENV: &str = "INBOX_API_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub fast_secs: u64,
    pub slow_secs: u64,
}

impl PollConfig {
    fn new(fast_secs: u64, slow_secs: u64) -> Self {
        Self {
            fast_secs,
            slow_secs,
        }
    }

    pub fn intervals(&self) -> PollIntervals {
        let fast = Duration::from_secs(self.fast_secs.max(1));
        // A slow interval shorter than the fast one would invert the trade-off.
        let slow = Duration::from_secs(self.slow_secs).max(fast);
        PollIntervals { fast, slow }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(5, 30)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub user_id: u64,
    pub page_size: u32,
    pub active_poll: PollConfig,
    pub list_poll: PollConfig,
    pub badge_poll: PollConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            user_id: 0,
            page_size: 30,
            active_poll: PollConfig::new(5, 30),
            list_poll: PollConfig::new(15, 60),
            badge_poll: PollConfig::new(30, 120),
        }
    }
}

impl AppConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            user_id: UserId(self.user_id),
            page_size: self.page_size.max(1),
            active_poll: self.active_poll.intervals(),
            list_poll: self.list_poll.intervals(),
            badge_poll: self.badge_poll.intervals(),
        }
    }
}

/// Reads the config file, falling back to defaults when it is missing or
/// malformed.
pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

/// API token from the environment (after `.env` has been loaded).
pub fn api_token() -> Option<String> {
    std::env::var(TOKEN_ENV)
        .ok()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
