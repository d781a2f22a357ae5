//! Bot and account configuration.
//!
//! Bot behaviour comes from a JSON array with one record per account.
//! Secrets live apart from it in a TOML file keyed by username.

use crate::error::{ConfigError, CoreError};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

fn default_response_rate() -> f64 {
    1.0
}

/// Whether sampling runs before or after the duplicate-reply check.
///
/// Checking duplicates first makes a re-observed item classify as
/// "already replied" no matter how the dice fall. Sampling first saves the
/// reply-tree fetch for every item that would be skipped anyway, at the
/// cost of reporting some re-observations as randomly skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOrder {
    #[default]
    DedupFirst,
    SampleFirst,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BotConfig {
    pub username: String,
    pub subreddit_names: Vec<String>,
    pub trigger_words: Vec<String>,
    #[serde(default = "default_response_rate")]
    pub response_rate: f64,
    pub responses: Vec<String>,
    #[serde(default)]
    pub gate_order: GateOrder,
    /// Mark the backlog returned by the first poll as seen instead of
    /// evaluating it.
    #[serde(default)]
    pub skip_existing: bool,
}

impl BotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "username".to_string(),
            });
        }

        if self.subreddit_names.is_empty() {
            return Err(ConfigError::ValidationFailed {
                reason: format!("{} has no subreddit_names", self.username),
            });
        }

        if let Some(blank) = self.subreddit_names.iter().find(|s| s.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.subreddit_names", self.username),
                value: format!("{:?}", blank),
            });
        }

        let mut subreddits = HashSet::new();
        if let Some(dup) = self
            .subreddit_names
            .iter()
            .find(|s| !subreddits.insert(s.trim().to_ascii_lowercase()))
        {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.subreddit_names", self.username),
                value: format!("{:?} listed more than once", dup),
            });
        }

        // A blank trigger is a substring of every text.
        if let Some(blank) = self.trigger_words.iter().find(|w| w.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.trigger_words", self.username),
                value: format!("{:?}", blank),
            });
        }

        if !self.response_rate.is_finite() || !(0.0..=1.0).contains(&self.response_rate) {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.response_rate", self.username),
                value: self.response_rate.to_string(),
            });
        }

        if self.responses.is_empty() {
            return Err(ConfigError::ValidationFailed {
                reason: format!("{} has no responses to choose from", self.username),
            });
        }

        Ok(())
    }
}

/// Parse and validate the JSON bot list.
pub fn parse_bot_configs(json: &str) -> Result<Vec<BotConfig>, ConfigError> {
    let bots: Vec<BotConfig> =
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidFormat {
            details: e.to_string(),
        })?;

    if bots.is_empty() {
        return Err(ConfigError::ValidationFailed {
            reason: "no bots configured".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for bot in &bots {
        bot.validate()?;
        if !seen.insert(bot.username.to_ascii_lowercase()) {
            return Err(ConfigError::ValidationFailed {
                reason: format!("{} is configured more than once", bot.username),
            });
        }
    }

    Ok(bots)
}

pub fn load_bot_configs(path: &Path) -> Result<Vec<BotConfig>, CoreError> {
    let json = read_config_file(path)?;
    let bots = parse_bot_configs(&json)?;
    info!("Loaded {} bot configuration(s) from {}", bots.len(), path.display());
    Ok(bots)
}

/// OAuth2 script-app credentials for one account.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub password: String,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl AccountCredentials {
    pub fn user_agent_for(&self, username: &str) -> String {
        self.user_agent.clone().unwrap_or_else(|| {
            format!(
                "autoreply/{} (by u/{})",
                env!("CARGO_PKG_VERSION"),
                username
            )
        })
    }
}

/// Credentials for every account, keyed by username.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    accounts: HashMap<String, AccountCredentials>,
}

impl CredentialStore {
    pub fn parse(toml_text: &str) -> Result<Self, ConfigError> {
        let raw: HashMap<String, AccountCredentials> = toml::from_str(toml_text)?;
        let accounts = raw
            .into_iter()
            .map(|(name, creds)| (name.to_ascii_lowercase(), creds))
            .collect();
        Ok(Self { accounts })
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = read_config_file(path)?;
        let store = Self::parse(&text)?;
        debug!(
            "Loaded credentials for {} account(s) from {}",
            store.accounts.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn get(&self, username: &str) -> Result<&AccountCredentials, ConfigError> {
        self.accounts
            .get(&username.to_ascii_lowercase())
            .ok_or_else(|| ConfigError::MissingCredentials {
                username: username.to_string(),
            })
    }
}

fn read_config_file(path: &Path) -> Result<String, CoreError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(CoreError::Config(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }))
        }
        Err(e) => Err(CoreError::Io(e)),
    }
}
