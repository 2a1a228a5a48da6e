use crate::catalog::Catalog;
use crate::error::{MigrateError, Result};
use crate::migrations;
use crate::store::disk::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "docmig.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file, relative to the directory holding the config file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Documents fetched per read transaction while scanning a collection.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data.redb")
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            page_size: default_page_size(),
        }
    }
}

// ---------------------------------------------------------------------------
// RunnerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_workers() -> usize {
    1
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default = "Catalog::builtin")]
    pub namespaces: Catalog,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            store: StoreConfig::default(),
            runner: RunnerConfig::default(),
            namespaces: Catalog::builtin(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MigrateError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Database path resolved against the directory of `config_path`.
    pub fn store_path(&self, config_path: &Path) -> PathBuf {
        if self.store.path.is_absolute() {
            return self.store.path.clone();
        }
        match config_path.parent() {
            Some(dir) => dir.join(&self.store.path),
            None => self.store.path.clone(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.namespaces
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.runner.workers == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "runner.workers must be at least 1".to_string(),
            });
        }
        if self.store.page_size == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "store.page_size must be at least 1".to_string(),
            });
        }

        for (namespace, collections) in self.namespaces.namespaces() {
            if collections.is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("namespace '{namespace}' lists no collections"),
                });
            }
        }

        for (namespace, collection) in migrations::required_collections() {
            if !self.namespaces.contains(namespace, collection) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "'{namespace}.{collection}' is used by the built-in versions but missing from namespaces"
                    ),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        Config::default().save(&path).unwrap();
        let parsed = Config::load(&path).unwrap();
        assert_eq!(parsed, Config::default());
        assert_eq!(parsed.store.page_size, 500);
    }

    #[test]
    fn omitted_sections_take_defaults() {
        let cfg: Config = serde_yaml::from_str("version: 1\n").unwrap();
        assert_eq!(cfg.runner.workers, 1);
        assert_eq!(cfg.store.path, PathBuf::from("data.redb"));
        assert_eq!(cfg.namespaces, Catalog::builtin());
    }

    #[test]
    fn missing_file_is_config_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, MigrateError::ConfigNotFound(_)));
    }

    #[test]
    fn store_path_is_relative_to_config_dir() {
        let cfg = Config::default();
        assert_eq!(
            cfg.store_path(Path::new("/srv/mig/docmig.yaml")),
            PathBuf::from("/srv/mig/data.redb")
        );

        let mut absolute = Config::default();
        absolute.store.path = PathBuf::from("/var/lib/docmig.redb");
        assert_eq!(
            absolute.store_path(Path::new("/srv/mig/docmig.yaml")),
            PathBuf::from("/var/lib/docmig.redb")
        );
    }

    #[test]
    fn validate_default_config_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn validate_zero_workers_and_page_size_are_errors() {
        let mut cfg = Config::default();
        cfg.runner.workers = 0;
        cfg.store.page_size = 0;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.level == WarnLevel::Error));
    }

    #[test]
    fn validate_reports_missing_builtin_collections() {
        let yaml = "namespaces:\n  IDENTITY: [user]\n  EMPTY: []\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.message == "namespace 'EMPTY' lists no collections"));
        assert!(warnings
            .iter()
            .any(|w| w.message.starts_with("'INVENTORY.record' is used")));
        assert!(!warnings.iter().any(|w| w.message.contains("IDENTITY.user")));
        assert!(warnings.iter().all(|w| w.level == WarnLevel::Warning));
    }
}
