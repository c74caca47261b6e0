//! Configuration loading and store path resolution
//!
//! Store path priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`LESSONSTORE_DB`)
//! 3. TOML config file (`store_path`)
//! 4. Compiled default (`lessons.db` in the working directory)
//!
//! A missing config file is not an error: defaults are used and a warning is
//! logged. An explicitly named file that cannot be read or parsed is.

use crate::db::init::DEFAULT_STORE_FILE;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the store path
pub const STORE_ENV_VAR: &str = "LESSONSTORE_DB";

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "LESSONSTORE_CONFIG";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "lessonstore.toml";

/// Identifier prefixes reserved for template content
pub const DEFAULT_PLACEHOLDER_PREFIXES: [&str; 1] = ["bt000000-"];

/// System tag assigned to lessons that have no tags
pub const DEFAULT_FALLBACK_TAG: &str = "general";

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    pub store_path: Option<PathBuf>,
    pub log_level: String,
    pub prerequisites: PrerequisiteConfig,
    pub tags: TagConfig,
    pub duplicates: DuplicateConfig,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            log_level: "info".to_string(),
            prerequisites: PrerequisiteConfig::default(),
            tags: TagConfig::default(),
            duplicates: DuplicateConfig::default(),
        }
    }
}

/// `[prerequisites]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrerequisiteConfig {
    pub placeholder_prefixes: Vec<String>,
    pub check_cycles: bool,
}

impl Default for PrerequisiteConfig {
    fn default() -> Self {
        Self {
            placeholder_prefixes: DEFAULT_PLACEHOLDER_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            check_cycles: false,
        }
    }
}

/// `[tags]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    pub fallback_tag: String,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            fallback_tag: DEFAULT_FALLBACK_TAG.to_string(),
        }
    }
}

/// `[duplicates]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    /// Compare titles after trimming, collapsing whitespace and case folding
    pub normalize_titles: bool,
}

impl IntegrityConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration
    ///
    /// `explicit` (from `--config`) must exist and parse. Otherwise the
    /// environment variable, the working directory and the user config
    /// directory are searched in that order; nothing found yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }

        match locate_config_file() {
            Some(path) => Self::load_file(&path),
            None => {
                warn!("No config file found - using defaults");
                Ok(Self::default())
            }
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config: {}", path.display());
        Ok(config)
    }

    /// Resolve the store path (CLI > env > config file > default)
    pub fn resolve_store_path(&self, cli_arg: Option<&Path>) -> PathBuf {
        resolve_store_path(cli_arg, STORE_ENV_VAR, self.store_path.as_deref())
    }
}

/// Store path resolution following the documented priority order
pub fn resolve_store_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = config_value {
        return path.to_path_buf();
    }

    PathBuf::from(DEFAULT_STORE_FILE)
}

/// Find a config file: env var, then `./lessonstore.toml`, then the user config dir
fn locate_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|d| d.join("lessonstore").join("config.toml"))
        .filter(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IntegrityConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.prerequisites.placeholder_prefixes, vec!["bt000000-".to_string()]);
        assert!(!config.prerequisites.check_cycles);
        assert_eq!(config.tags.fallback_tag, "general");
        assert!(!config.duplicates.normalize_titles);
    }

    #[test]
    fn test_partial_file_keeps_section_defaults() {
        let config = IntegrityConfig::from_toml(
            r#"
            store_path = "/srv/lessons/lessons.db"

            [prerequisites]
            placeholder_prefixes = ["bt000000-", "tmpl-"]
            "#,
        )
        .unwrap();

        assert_eq!(config.store_path, Some(PathBuf::from("/srv/lessons/lessons.db")));
        assert_eq!(config.prerequisites.placeholder_prefixes.len(), 2);
        assert!(!config.prerequisites.check_cycles);
        assert_eq!(config.tags.fallback_tag, "general");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        assert!(matches!(
            IntegrityConfig::from_toml("store_path = [1, 2"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_cli_argument_wins() {
        let path = resolve_store_path(
            Some(Path::new("cli.db")),
            "LESSONSTORE_TEST_UNSET_VAR",
            Some(Path::new("config.db")),
        );
        assert_eq!(path, PathBuf::from("cli.db"));
    }

    #[test]
    fn test_config_value_beats_default() {
        let path = resolve_store_path(None, "LESSONSTORE_TEST_UNSET_VAR", Some(Path::new("config.db")));
        assert_eq!(path, PathBuf::from("config.db"));

        let path = resolve_store_path(None, "LESSONSTORE_TEST_UNSET_VAR", None);
        assert_eq!(path, PathBuf::from(DEFAULT_STORE_FILE));
    }
}
