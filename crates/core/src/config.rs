//! Configuration loading and resolution
//!
//! Settings are layered, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. a TOML file (`--config`, `DOCKERPIPE_CONFIG`, or
//!    `/etc/dockerpipe/dockerpipe.toml` when present)
//! 3. `DOCKERPIPE_*` environment variables
//! 4. command-line overrides
//!
//! Every layer is a [`PartialConfig`]; [`ConfigLoader::resolve`] merges them
//! and validates the result into a [`DispatcherConfig`].
//!
//! ```toml
//! channel_path = "/opt/cmdpipe/dockerpipe"
//! channel_mode = "0666"
//! app_dir = "/home/pi/app"
//! log_file = "logs/system/commands.log"
//! framing = "close"
//!
//! [service]
//! user = "pi"
//! restart = "always"
//! restart_delay_secs = 10
//! ```

use crate::channel::{DEFAULT_CHANNEL_MODE, DEFAULT_CHANNEL_PATH};
use crate::command_log::DEFAULT_LOG_RELATIVE_PATH;
use crate::errors::{ConfigError, Result};
use crate::executor::DEFAULT_SHELL;
use crate::source::Framing;
use crate::supervisor::{
    RestartKind, RestartPolicy, DEFAULT_EXEC_PATH, DEFAULT_RESTART_DELAY, DEFAULT_SERVICE_USER,
};
use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Configuration file consulted when none is given explicitly
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dockerpipe/dockerpipe.toml";

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "DOCKERPIPE_CONFIG";

/// Service manager settings, partially specified
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialServiceConfig {
    pub user: Option<String>,
    pub restart: Option<RestartKind>,
    pub restart_delay_secs: Option<u64>,
    pub max_restarts: Option<u32>,
    pub exec_path: Option<PathBuf>,
}

impl PartialServiceConfig {
    fn merge(self, higher: PartialServiceConfig) -> PartialServiceConfig {
        PartialServiceConfig {
            user: higher.user.or(self.user),
            restart: higher.restart.or(self.restart),
            restart_delay_secs: higher.restart_delay_secs.or(self.restart_delay_secs),
            max_restarts: higher.max_restarts.or(self.max_restarts),
            exec_path: higher.exec_path.or(self.exec_path),
        }
    }
}

/// One configuration layer; unset fields defer to lower layers
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub channel_path: Option<PathBuf>,
    /// Octal permission string such as `"0666"`
    pub channel_mode: Option<String>,
    pub app_dir: Option<PathBuf>,
    /// Relative paths resolve against `app_dir`
    pub log_file: Option<PathBuf>,
    pub framing: Option<Framing>,
    pub shell: Option<String>,
    #[serde(default)]
    pub service: PartialServiceConfig,
}

impl PartialConfig {
    /// Overlay `higher` on top of `self`
    pub fn merge(self, higher: PartialConfig) -> PartialConfig {
        PartialConfig {
            channel_path: higher.channel_path.or(self.channel_path),
            channel_mode: higher.channel_mode.or(self.channel_mode),
            app_dir: higher.app_dir.or(self.app_dir),
            log_file: higher.log_file.or(self.log_file),
            framing: higher.framing.or(self.framing),
            shell: higher.shell.or(self.shell),
            service: self.service.merge(higher.service),
        }
    }
}

/// Resolved service manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceConfig {
    pub user: String,
    pub restart: RestartKind,
    pub restart_delay_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
    pub exec_path: PathBuf,
}

impl ServiceConfig {
    pub fn restart_policy(&self) -> RestartPolicy {
        let delay = Duration::from_secs(self.restart_delay_secs);
        match (self.restart, self.max_restarts) {
            (RestartKind::Bounded, Some(max_restarts)) => RestartPolicy::Bounded {
                max_restarts,
                delay,
            },
            _ => RestartPolicy::Always { delay },
        }
    }
}

/// Fully resolved dispatcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatcherConfig {
    pub channel_path: PathBuf,
    #[serde(serialize_with = "serialize_mode")]
    pub channel_mode: u32,
    pub app_dir: PathBuf,
    pub log_file: PathBuf,
    pub framing: Framing,
    pub shell: String,
    pub service: ServiceConfig,
}

impl DispatcherConfig {
    /// Render as TOML, in the same shape the loader accepts
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| ConfigError::Serialize(e).into())
    }
}

fn serialize_mode<S: Serializer>(mode: &u32, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{:04o}", mode))
}

/// Parse an octal permission string (`"0666"`, `"666"`, `"0o666"`)
pub fn parse_mode(raw: &str) -> Result<u32> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    let mode = u32::from_str_radix(digits, 8).map_err(|_| ConfigError::Validation {
        message: format!("channel_mode '{}' is not an octal permission value", raw),
    })?;
    if mode > 0o777 {
        return Err(ConfigError::Validation {
            message: format!("channel_mode '{}' exceeds 0777", raw),
        }
        .into());
    }
    Ok(mode)
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load one layer from a TOML file
    pub fn load_from_path(path: &Path) -> Result<PartialConfig> {
        debug!("Loading configuration from {}", path.display());

        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&content).map_err(|e| {
            ConfigError::Parsing {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Build the environment layer from the process environment
    pub fn from_env() -> Result<PartialConfig> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Build the environment layer from an arbitrary lookup
    pub fn from_env_with<F>(lookup: F) -> Result<PartialConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let framing = match non_empty("DOCKERPIPE_FRAMING") {
            Some(raw) => Some(
                raw.parse::<Framing>()
                    .map_err(|message| ConfigError::Validation { message })?,
            ),
            None => None,
        };

        Ok(PartialConfig {
            channel_path: non_empty("DOCKERPIPE_CHANNEL").map(PathBuf::from),
            app_dir: non_empty("DOCKERPIPE_APP_DIR").map(PathBuf::from),
            log_file: non_empty("DOCKERPIPE_LOG_FILE").map(PathBuf::from),
            shell: non_empty("DOCKERPIPE_SHELL"),
            framing,
            ..PartialConfig::default()
        })
    }

    /// Locate the configuration file layer.
    ///
    /// An explicit path (argument or `DOCKERPIPE_CONFIG`) must exist; the
    /// system default is optional.
    pub fn discover_file(explicit: Option<&Path>) -> Result<Option<PartialConfig>> {
        if let Some(path) = explicit {
            return Self::load_from_path(path).map(Some);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
            return Self::load_from_path(Path::new(&path)).map(Some);
        }
        let default = Path::new(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from_path(default).map(Some);
        }
        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Merge file, environment and override layers and validate.
    pub fn resolve(explicit: Option<&Path>, overrides: PartialConfig) -> Result<DispatcherConfig> {
        let file = Self::discover_file(explicit)?.unwrap_or_default();
        let env = Self::from_env()?;
        Self::finalize(file.merge(env).merge(overrides))
    }

    /// Apply defaults to a merged layer and validate it
    pub fn finalize(merged: PartialConfig) -> Result<DispatcherConfig> {
        let app_dir = match merged.app_dir {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(ConfigError::Io)?,
        };

        let log_file = merged
            .log_file
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_RELATIVE_PATH));
        let log_file = if log_file.is_absolute() {
            log_file
        } else {
            app_dir.join(log_file)
        };

        let channel_mode = match merged.channel_mode {
            Some(raw) => parse_mode(&raw)?,
            None => DEFAULT_CHANNEL_MODE,
        };

        let shell = merged.shell.unwrap_or_else(|| DEFAULT_SHELL.to_string());
        if shell.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "shell must not be empty".to_string(),
            }
            .into());
        }

        let service = merged.service;
        let restart = service.restart.unwrap_or_default();
        if restart == RestartKind::Bounded && service.max_restarts.unwrap_or(0) == 0 {
            return Err(ConfigError::Validation {
                message: "restart = \"bounded\" requires max_restarts > 0".to_string(),
            }
            .into());
        }

        Ok(DispatcherConfig {
            channel_path: merged
                .channel_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CHANNEL_PATH)),
            channel_mode,
            app_dir,
            log_file,
            framing: merged.framing.unwrap_or_default(),
            shell,
            service: ServiceConfig {
                user: service
                    .user
                    .unwrap_or_else(|| DEFAULT_SERVICE_USER.to_string()),
                restart,
                restart_delay_secs: service
                    .restart_delay_secs
                    .unwrap_or(DEFAULT_RESTART_DELAY.as_secs()),
                max_restarts: service.max_restarts,
                exec_path: service
                    .exec_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_EXEC_PATH)),
            },
        })
    }
}
