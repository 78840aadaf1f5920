use std::path::Path;

use super::schema::EngineConfig;

#[derive(Debug)]
pub enum LoadError {
    Io(std::io::Error),
    Parse(serde_yaml::Error),
    Validation(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Parse(e) => write!(f, "parse: {e}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_yaml::Error> for LoadError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e)
    }
}

pub fn load_from_file(path: &Path) -> Result<EngineConfig, LoadError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

pub fn load_from_str(yaml: &str) -> Result<EngineConfig, LoadError> {
    let cfg: EngineConfig = serde_yaml::from_str(yaml)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &EngineConfig) -> Result<(), LoadError> {
    if cfg.socket_dir.is_empty() {
        return Err(LoadError::Validation("socket_dir must not be empty".into()));
    }
    if cfg.rules_path.is_empty() {
        return Err(LoadError::Validation("rules_path must not be empty".into()));
    }
    if cfg.poll_interval_seconds == 0 {
        return Err(LoadError::Validation(
            "poll_interval_seconds must be > 0".into(),
        ));
    }
    if cfg.handshake_timeout_ms == 0 {
        return Err(LoadError::Validation(
            "handshake_timeout_ms must be > 0".into(),
        ));
    }
    if cfg.action_timeout_seconds == 0 {
        return Err(LoadError::Validation(
            "action_timeout_seconds must be > 0".into(),
        ));
    }
    Ok(())
}
