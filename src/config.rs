use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::{Origin, Url};

pub const CONFIG_ENV_VAR: &str = "BRIDGEJS_CONFIG";
const CONFIG_FILE_NAME: &str = "runtime.yaml";
const DEFAULT_MAX_PENDING_JOBS: usize = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read runtime config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("max_pending_jobs must be greater than zero")]
    NoJobBudget,
    #[error("same_origin_only requires base_url")]
    SameOriginWithoutBase,
    #[error("allowed origin `{source_text}` needs base_url to resolve 'self'")]
    SelfOriginWithoutBase { source_text: String },
    #[error("allowed origin `{source_text}` is not an absolute URL: {source}")]
    InvalidOrigin {
        source_text: String,
        #[source]
        source: url::ParseError,
    },
}

/// Settings for a script runtime instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// URL of the page scripts run on; relative request URLs resolve against it.
    pub base_url: Option<Url>,
    /// Reject requests whose origin differs from `base_url`.
    pub same_origin_only: bool,
    /// Origins requests may target: `'self'` (the origin of `base_url`) or URLs.
    /// Absent means unrestricted.
    pub allowed_origins: Option<Vec<String>>,
    /// Upper bound on promise jobs drained after each evaluation.
    pub max_pending_jobs: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            same_origin_only: false,
            allowed_origins: None,
            max_pending_jobs: DEFAULT_MAX_PENDING_JOBS,
        }
    }
}

impl RuntimeConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `$BRIDGEJS_CONFIG`, else from the platform config directory.
    pub fn discover() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .or_else(default_config_path);
        Self::load(path)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(target: "config", path = %path.display(), "loading runtime config");
        let contents = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// The allow-list resolved to origins.
    pub fn allowed_origins(&self) -> Result<Option<Vec<Origin>>, ConfigError> {
        self.allowed_origins
            .as_ref()
            .map(|sources| {
                sources
                    .iter()
                    .map(|source| resolve_origin(source, self.base_url.as_ref()))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pending_jobs == 0 {
            return Err(ConfigError::NoJobBudget);
        }
        if self.same_origin_only && self.base_url.is_none() {
            return Err(ConfigError::SameOriginWithoutBase);
        }
        self.allowed_origins()?;
        Ok(())
    }
}

/// `'self'` is the origin of `page`; anything else must be an absolute URL.
pub(crate) fn resolve_origin(source: &str, page: Option<&Url>) -> Result<Origin, ConfigError> {
    if source == "'self'" {
        return page
            .map(Url::origin)
            .ok_or_else(|| ConfigError::SelfOriginWithoutBase {
                source_text: source.to_string(),
            });
    }
    Url::parse(source)
        .map(|url| url.origin())
        .map_err(|source_err| ConfigError::InvalidOrigin {
            source_text: source.to_string(),
            source: source_err,
        })
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "bridgejs", "bridgejs")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
