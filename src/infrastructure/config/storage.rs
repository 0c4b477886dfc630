//! On-disk home of `config.toml`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::app_config::{APP_NAME, APP_ORGANIZATION, APP_QUALIFIER, AppConfig};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Failure to locate, read or write the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform reported no per-user config location.
    #[error("no per-user config directory on this platform")]
    NoConfigDir,

    /// Reading an existing file failed.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Creating a directory or replacing a file failed.
    #[error("cannot write {}: {source}", path.display())]
    Write {
        /// File or directory that was being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The configuration could not be rendered as TOML.
    #[error("cannot encode config: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Locates, creates and rewrites the user's `config.toml`.
#[derive(Debug)]
pub struct StorageManager {
    config_dir: PathBuf,
}

impl StorageManager {
    /// Uses the platform config directory for this application.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoConfigDir`] when no home directory is known.
    pub fn new() -> Result<Self, ConfigError> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| Self::with_dir(dirs.config_dir().to_path_buf()))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Uses `path` as the config directory.
    #[must_use]
    pub const fn with_dir(path: PathBuf) -> Self {
        Self { config_dir: path }
    }

    /// Directory holding `config.toml`.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Creates the config directory and its parents if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Write`] if the directory cannot be created.
    pub fn ensure_config_dir(&self) -> Result<(), ConfigError> {
        create_dir(&self.config_dir)
    }

    /// Reads the configuration from `path_override` or the default file.
    ///
    /// A missing file is written out with defaults. A file that does not
    /// parse is kept as is and defaults are returned.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an existing file cannot be read or the
    /// default file cannot be written.
    pub fn load_config(&self, path_override: Option<&Path>) -> Result<AppConfig, ConfigError> {
        let path = path_override.map_or_else(|| self.config_file(), Path::to_path_buf);

        match fs::read_to_string(&path) {
            Ok(text) => Ok(parse_or_default(&path, &text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Writing default config");
                let config = AppConfig::default();
                write_config(&path, &config)?;
                Ok(config)
            }
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    /// Replaces the default config file with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be encoded or written.
    pub fn save_config(&self, config: &AppConfig) -> Result<(), ConfigError> {
        write_config(&self.config_file(), config)
    }
}

fn parse_or_default(path: &Path, text: &str) -> AppConfig {
    toml::from_str(text).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Ignoring malformed config");
        AppConfig::default()
    })
}

fn create_dir(dir: &Path) -> Result<(), ConfigError> {
    fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
        path: dir.to_path_buf(),
        source,
    })
}

/// Writes through a sibling temp file so readers never see a partial file.
fn write_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let text = toml::to_string_pretty(config)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    create_dir(dir)?;

    let write_err = |source: io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut staged = NamedTempFile::new_in(dir).map_err(write_err)?;
    staged.write_all(text.as_bytes()).map_err(write_err)?;
    staged.persist(path).map_err(|e| write_err(e.error))?;

    debug!(path = %path.display(), bytes = text.len(), "Config written");
    Ok(())
}
