//! Cache budget configuration

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default maximum number of cached entries
pub const DEFAULT_MAXIMUM_SIZE: usize = 1000;

/// Default maximum decoded bytes held by cached entries (100 MiB)
pub const DEFAULT_MAXIMUM_SIZE_BYTES: usize = 100 << 20;

/// Budgets bounding the cached table
///
/// Either budget set to `0` disables retention entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached entries
    pub maximum_size: usize,

    /// Maximum sum of the decoded sizes of cached entries
    pub maximum_size_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            maximum_size: DEFAULT_MAXIMUM_SIZE,
            maximum_size_bytes: DEFAULT_MAXIMUM_SIZE_BYTES,
        }
    }
}

impl CacheConfig {
    /// Load from a JSON file, or use the defaults when no path is given
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(fs::File::open(path)?),
            None => Ok(Self::default()),
        }
    }

    /// Parse a JSON configuration
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut config = String::new();
        reader.read_to_string(&mut config)?;
        if config.trim().is_empty() {
            return Err(Error::Config("config file empty".to_string()));
        }
        Ok(serde_json::from_str(&config)?)
    }

    /// Whether completed loads may be retained at all
    pub fn retains(&self) -> bool {
        self.maximum_size > 0 && self.maximum_size_bytes > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::get(None).unwrap();
        assert_eq!(config.maximum_size, 1000);
        assert_eq!(config.maximum_size_bytes, 100 * 1024 * 1024);
        assert!(config.retains());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = CacheConfig::from_reader(r#"{ "maximum_size": 8 }"#.as_bytes()).unwrap();
        assert_eq!(config.maximum_size, 8);
        assert_eq!(config.maximum_size_bytes, DEFAULT_MAXIMUM_SIZE_BYTES);
    }

    #[test]
    fn test_empty_config_rejected() {
        let err = CacheConfig::from_reader("  \n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_config_rejected() {
        let err = CacheConfig::from_reader(r#"{ "maximum_size": -1 }"#.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_budget_disables_retention() {
        let config = CacheConfig {
            maximum_size: 10,
            maximum_size_bytes: 0,
        };
        assert!(!config.retains());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "maximum_size": 2, "maximum_size_bytes": 1000 }}"#
        )
        .unwrap();

        let config = CacheConfig::get(Some(file.path())).unwrap();
        assert_eq!(
            config,
            CacheConfig {
                maximum_size: 2,
                maximum_size_bytes: 1000
            }
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CacheConfig::get(Some(&dir.path().join("missing.json"))).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
