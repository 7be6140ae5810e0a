pub mod loader;
pub mod settings;
pub mod snapshot;

pub use loader::*;
pub use settings::*;
pub use snapshot::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Env(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
