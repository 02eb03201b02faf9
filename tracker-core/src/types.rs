use crate::{ConfigError, CoreError, EventShapeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One comment pulled from the provider stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentEvent {
    pub id: String,
    pub author_id: Option<String>,
    pub author_name: Option<String>,
    pub body: String,
    pub subreddit: String,
    pub timestamp: DateTime<Utc>,
}

/// Author identity and lowercased body, ready for the record store.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub author_id: String,
    pub author_name: String,
    pub subreddit: String,
    pub body: String,
}

impl CommentEvent {
    /// Resolves the fields the store needs, rejecting events without an author.
    pub fn to_candidate(&self) -> Result<MatchCandidate, EventShapeError> {
        let author_id = self
            .author_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| EventShapeError::MissingAuthor {
                event_id: self.id.clone(),
            })?;

        // A renamed or hidden display name is not fatal, the id is the key.
        let author_name = self
            .author_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(author_id);

        Ok(MatchCandidate {
            author_id: author_id.to_string(),
            author_name: author_name.to_string(),
            subreddit: self.subreddit.clone(),
            body: self.body.to_lowercase(),
        })
    }
}

pub const DEFAULT_CONFIG_FILE: &str = "tracker.toml";
pub const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";
pub const DEFAULT_TRIGGERS_FILE: &str = "triggersList.txt";
pub const DEFAULT_SUBREDDIT: &str = "all";

/// Runtime tuning read from `tracker.toml`. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Directory holding the dated store and log files
    pub data_dir: PathBuf,
    pub credentials_path: PathBuf,
    /// Pause after a stream fault before reconnecting
    pub backoff_secs: u64,
    /// Pause between two listing polls
    pub poll_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_FILE),
            backoff_secs: 60,
            poll_interval_secs: 2,
        }
    }
}

impl TrackerConfig {
    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|e| ConfigError::from_io(path, &e))?;
        let config: TrackerConfig = toml::from_str(&raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=3600).contains(&self.backoff_secs) {
            return Err(ConfigError::InvalidValue {
                field: "backoff_secs".to_string(),
                value: self.backoff_secs.to_string(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_secs".to_string(),
                value: self.poll_interval_secs.to_string(),
            });
        }
        Ok(())
    }

    pub fn backoff(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.backoff_secs)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }
}
