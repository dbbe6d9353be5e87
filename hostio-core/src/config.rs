use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HostioError, Result};
use crate::models::{ExecContext, ExecOptions};

pub const DEFAULT_CONFIG_FILE: &str = "hostio.toml";
pub const DEFAULT_GRACE_MS: u64 = 250;
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Settings loaded from `hostio.toml`. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub exec: ExecConfig,
    pub fs: FsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecConfig {
    /// Timeout applied when a request does not set one
    pub timeout_ms: Option<u64>,
    pub kill_signal: Option<i32>,
    /// How long a signalled child may take to exit before SIGKILL
    pub grace_ms: u64,
    /// Shell used by `shell`; `$SHELL` or `/bin/sh` when unset
    pub shell: Option<PathBuf>,
    pub replace_env: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            kill_signal: None,
            grace_ms: DEFAULT_GRACE_MS,
            shell: None,
            replace_env: false,
        }
    }
}

impl ExecConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    /// Fills the fields `options` left unset from the configured defaults.
    pub fn apply_defaults(&self, mut options: ExecOptions) -> ExecOptions {
        if options.timeout_ms.is_none() {
            options.timeout_ms = self.timeout_ms;
        }
        if options.kill_signal.is_none() {
            options.kill_signal = self.kill_signal;
        }
        options.replace_env |= self.replace_env;
        options
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FsConfig {
    /// Read chunk size used by whole-file helpers
    pub chunk_size: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Config = toml::from_str(input)
            .map_err(|e| HostioError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Loads `path` if given, otherwise `hostio.toml` when it exists, otherwise defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn context(&self) -> Result<ExecContext> {
        let ctx = ExecContext::from_env()?;
        Ok(match &self.exec.shell {
            Some(shell) => ctx.with_shell(shell),
            None => ctx,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.fs.chunk_size == 0 {
            return Err(HostioError::InvalidConfiguration(
                "fs.chunk_size must be greater than zero".to_string(),
            ));
        }
        if let Some(signal) = self.exec.kill_signal {
            if signal <= 0 {
                return Err(HostioError::InvalidConfiguration(format!(
                    "exec.kill_signal must be a positive signal number, got {}",
                    signal
                )));
            }
        }
        Ok(())
    }
}
