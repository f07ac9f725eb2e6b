//! Configuration loader and validator for the CRM front end.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub store: Store,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Who the core works for. Without a user every read is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Store {
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` wins, then `store.database_url`, then a file under
    /// `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.store.database_url.clone())
            .unwrap_or_else(|| format!("sqlite://{}/jobhunt.db", self.app.data_dir))
    }

    pub fn user_id(&self) -> Option<String> {
        self.session.user_id.clone()
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg
        .session
        .user_id
        .as_deref()
        .is_some_and(|u| u.trim().is_empty())
    {
        return Err(ConfigError::Invalid("session.user_id must be non-empty when set"));
    }
    if let Some(url) = &cfg.store.database_url {
        if !url.starts_with("sqlite:") {
            return Err(ConfigError::Invalid("store.database_url must be a sqlite: URL"));
        }
    }
    Ok(())
}

/// Example configuration written by `jobhunt-crm init`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

session:
  user_id: "me"

store:
  # Defaults to sqlite://{data_dir}/jobhunt.db
  database_url: null
"#
}
