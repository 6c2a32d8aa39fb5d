use crate::constants::{DEFAULT_MAX_ENTRIES, DEFAULT_TAIL_LINES};
use crate::level::Level;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_DIR: &str = "logtail";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cannot write config {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub transform: String,
    pub filter: String,
    pub highlight: String,
    /// Levels to show; empty shows all.
    pub levels: Vec<Level>,
    pub max_entries: usize,
    pub tail_lines: usize,
    pub transform_max_steps: Option<u64>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            transform: String::new(),
            filter: String::new(),
            highlight: String::new(),
            levels: Vec::new(),
            max_entries: DEFAULT_MAX_ENTRIES,
            tail_lines: DEFAULT_TAIL_LINES,
            transform_max_steps: None,
        }
    }
}

impl ViewerConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Reads a config file. A missing file is not an error and yields the
    /// defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `explicit` or the default location, falling back to defaults
    /// (with a warning) when the file cannot be used.
    pub fn load(explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Self::default(),
            },
        };
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "using default configuration");
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| write_error(e.into()))?;
        fs::write(path, content).map_err(write_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ViewerConfig::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, ViewerConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"filter":"db","levels":["error","warn"],"transform_max_steps":500}"#)
            .unwrap();
        let config = ViewerConfig::load_from(&path).unwrap();
        assert_eq!(config.filter, "db");
        assert_eq!(config.levels, vec![Level::Error, Level::Warning]);
        assert_eq!(config.transform_max_steps, Some(500));
        assert_eq!(config.max_entries, DEFAULT_MAX_ENTRIES);
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ViewerConfig::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert_eq!(ViewerConfig::load(Some(&path)), ViewerConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = ViewerConfig {
            transform: "trim".into(),
            tail_lines: 10,
            ..ViewerConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(ViewerConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_save_failure_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();

        let err = ViewerConfig::default()
            .save_to(&blocker.join("config.json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Write { .. }), "{err}");
        assert!(err.to_string().starts_with("cannot write config"));

        let err = ViewerConfig::default().save_to(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Write { .. }), "{err}");
    }
}
