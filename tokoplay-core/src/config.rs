// src/config.rs
//
// Runtime configuration for the bot. Loaded from a JSON file at startup;
// every field has a default so a missing or partial file still yields a
// usable config. The regeneration interval and token lifetime are policy
// knobs here rather than constants: the remote API documents neither.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// API root, no trailing slash.
    pub base_url: String,
    pub user_agent: String,
    pub referer: String,
    pub game_id: u32,

    /// Where refreshed tokens are persisted between runs.
    pub token_file: String,
    /// File holding the raw Telegram init data used to identify the account.
    pub data_file: String,

    /// Assumed token lifetime; the token endpoint does not report one.
    pub token_ttl_secs: u64,
    /// Refresh this long before the assumed expiry.
    pub token_safety_margin_secs: u64,

    /// Bounds on how long the loop will sleep while waiting for energy.
    pub poll_interval_min_secs: u64,
    pub poll_interval_max_secs: u64,

    pub max_auth_retries: u32,
    pub max_play_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,

    /// Estimated seconds per energy unit, used until the server reports a
    /// real regeneration timestamp.
    pub regen_interval_fallback_secs: u64,

    /// Submitted score is drawn uniformly from this range.
    pub score_min: u32,
    pub score_max: u32,
    pub multiplier: String,

    /// Randomized pause between consecutive plays.
    pub pause_min_secs: u64,
    pub pause_max_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            base_url: "https://play.tokopedia.com/api".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            referer: "https://play.tokopedia.com".to_string(),
            game_id: 1,
            token_file: "tokens.json".to_string(),
            data_file: "data.txt".to_string(),
            token_ttl_secs: 3600,
            token_safety_margin_secs: 300,
            poll_interval_min_secs: 5,
            poll_interval_max_secs: 300,
            max_auth_retries: 5,
            max_play_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            regen_interval_fallback_secs: 180,
            score_min: 170,
            score_max: 200,
            multiplier: "1".to_string(),
            pause_min_secs: 5,
            pause_max_secs: 10,
        }
    }
}

impl BotConfig {
    /// Load from a JSON file. A missing file is not an error; defaults apply.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let cfg: BotConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.score_min > self.score_max {
            return Err(Error::Config("score_min exceeds score_max".into()));
        }
        if self.poll_interval_min_secs > self.poll_interval_max_secs {
            return Err(Error::Config(
                "poll_interval_min_secs exceeds poll_interval_max_secs".into(),
            ));
        }
        if self.pause_min_secs > self.pause_max_secs {
            return Err(Error::Config("pause_min_secs exceeds pause_max_secs".into()));
        }
        if self.max_auth_retries == 0 {
            return Err(Error::Config("max_auth_retries must be at least 1".into()));
        }
        Ok(())
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs as i64)
    }

    pub fn token_safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_safety_margin_secs as i64)
    }

    pub fn poll_interval_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.poll_interval_min_secs),
            Duration::from_secs(self.poll_interval_max_secs),
        )
    }

    pub fn regen_interval_fallback(&self) -> Duration {
        Duration::from_secs(self.regen_interval_fallback_secs)
    }

    pub fn auth_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.max_auth_retries,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn play_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.max_play_retries,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}
