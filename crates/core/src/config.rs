use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::error::{Result, StoryforgeError};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used for story structure, titles and the connectivity check
pub const TEXT_MODEL: &str = "gemini-2.5-flash";

pub const DEFAULT_NARRATIVE_LANGUAGE: &str = "Korean";

pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

const BASE_URL_ENV_VAR: &str = "STORYFORGE_BASE_URL";
const NARRATIVE_LANGUAGE_ENV_VAR: &str = "STORYFORGE_NARRATIVE_LANGUAGE";
const POLL_INTERVAL_ENV_VAR: &str = "STORYFORGE_POLL_INTERVAL_SECS";
const POLL_MAX_ATTEMPTS_ENV_VAR: &str = "STORYFORGE_POLL_MAX_ATTEMPTS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// `None` keeps polling until the job reaches a terminal state.
    pub max_attempts: Option<u32>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    pub base_url: String,
    pub text_model: String,
    /// Language of scene descriptions and of the localized half of each title
    pub narrative_language: String,
    pub poll: PollConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            text_model: TEXT_MODEL.to_string(),
            narrative_language: DEFAULT_NARRATIVE_LANGUAGE.to_string(),
            poll: PollConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Build the configuration from process environment overrides
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(base_url) = lookup(BASE_URL_ENV_VAR) {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(language) = lookup(NARRATIVE_LANGUAGE_ENV_VAR) {
            config.narrative_language = language;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, POLL_INTERVAL_ENV_VAR)? {
            config.poll.interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, POLL_MAX_ATTEMPTS_ENV_VAR)? {
            config.poll.max_attempts = Some(attempts);
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };

    raw.trim().parse::<T>().map(Some).map_err(|_| {
        StoryforgeError::invalid_input(format!("{key} has an unparsable value: {raw:?}"))
    })
}

/// Get the root configuration directory
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("storyforge")
}

/// Get the path of the stored API credential
pub fn get_credential_path(config_dir: &Path) -> PathBuf {
    config_dir.join("credential")
}
