use std::env;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use thiserror::Error;

pub const DEFAULT_MAX_APP_LEVEL_REDIRECTS: u32 = 10;
pub const DEFAULT_MAX_REPLAY_ATTEMPTS: u32 = 1;
pub const DEFAULT_TRACKING_ID_PREFIX: &str = "spark-rs";
pub const DEFAULT_UPLOAD_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_USER_AGENT: &str = "spark-rs/0.1.0";

/// Tunables shared by the request pipeline and the upload orchestrator.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Number of `cisco-location` hops followed before giving up.
    pub max_app_level_redirects: u32,
    /// Number of times a 401 response is replayed after reauthenticating.
    pub max_replay_attempts: u32,
    pub tracking_id_prefix: String,
    pub tracking_id_suffix: Option<String>,
    /// Total attempts (initial try + retries) for the upload phase.
    pub upload_max_attempts: u32,
    pub upload_backoff: Duration,
    pub user_agent: String,
    /// Install the request/response logging interceptor.
    pub network_logging: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_app_level_redirects: DEFAULT_MAX_APP_LEVEL_REDIRECTS,
            max_replay_attempts: DEFAULT_MAX_REPLAY_ATTEMPTS,
            tracking_id_prefix: DEFAULT_TRACKING_ID_PREFIX.to_owned(),
            tracking_id_suffix: None,
            upload_max_attempts: DEFAULT_UPLOAD_MAX_ATTEMPTS,
            upload_backoff: Duration::from_millis(200),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            network_logging: false,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `SPARK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = non_empty_var("SPARK_MAX_REDIRECTS") {
            config.max_app_level_redirects = parse_number("SPARK_MAX_REDIRECTS", &value)?;
        }

        if let Some(value) = non_empty_var("SPARK_MAX_REPLAYS") {
            config.max_replay_attempts = parse_number("SPARK_MAX_REPLAYS", &value)?;
        }

        if let Some(prefix) = non_empty_var("SPARK_TRACKING_ID_PREFIX") {
            config.tracking_id_prefix = prefix;
        }

        if let Some(suffix) = non_empty_var("SPARK_TRACKING_ID_SUFFIX") {
            config.tracking_id_suffix = Some(suffix);
        }

        if let Some(value) = non_empty_var("SPARK_NETWORK_LOGGING") {
            config.network_logging = matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    pub fn with_max_app_level_redirects(mut self, max: u32) -> Self {
        self.max_app_level_redirects = max;
        self
    }

    pub fn with_max_replay_attempts(mut self, max: u32) -> Self {
        self.max_replay_attempts = max;
        self
    }

    pub fn with_tracking_id<S: Into<String>>(mut self, prefix: S, suffix: Option<String>) -> Self {
        self.tracking_id_prefix = prefix.into();
        self.tracking_id_suffix = suffix;
        self
    }

    pub fn with_upload_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.upload_max_attempts = attempts.max(1);
        self.upload_backoff = backoff;
        self
    }

    /// Upper bound on pipeline passes for a single `request()` call.
    pub fn max_pipeline_passes(&self) -> u32 {
        self.max_app_level_redirects
            .saturating_add(self.max_replay_attempts)
            .saturating_add(1)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_number(name: &'static str, value: &str) -> Result<u32, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_owned(),
    })
}

/// Locates the per-user configuration directory.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Attempt to discover the persistent configuration directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs =
            ProjectDirs::from("app", "spark", "spark-rs").ok_or(ConfigError::MissingProjectDirs)?;
        let config_dir = dirs.config_dir();
        fs::create_dir_all(config_dir).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(config_dir)?;
        Ok(Self {
            root: config_dir.to_path_buf(),
        })
    }

    pub fn from_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Path to the supertoken file for the given profile.
    pub fn credentials_file(&self, profile: &str) -> PathBuf {
        self.root.join(format!("supertoken-{profile}.json"))
    }
}

fn set_user_only_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o700);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Errors raised while loading configuration or locating config directories.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for spark-rs")]
    MissingProjectDirs,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: &'static str, value: String },
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}
