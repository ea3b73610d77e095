//! Configuration Loader
//!
//! Finds `relabel.toml` and merges environment overrides into it.

use crate::settings::{MarkersConfig, PatchConfig, Settings, VmConfig};
use crate::{ConfigError, ConfigResult, CONFIG_FILE_NAME};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader
///
/// Precedence (later wins):
/// 1. Defaults
/// 2. Project config (relabel.toml)
/// 3. Environment variables (RELABEL_*)
pub struct ConfigLoader {
    /// Whether `RELABEL_*` variables are consulted
    use_env: bool,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Effective settings
    pub settings: Settings,

    /// Directory relabel.toml was found in
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { use_env: true }
    }

    /// Create a loader that ignores the environment
    pub fn without_env() -> Self {
        Self { use_env: false }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find relabel.toml. A missing file is
    /// not an error; defaults are used.
    pub fn load_from_directory(&self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, settings) = self.find_project_config(start_dir)?;
        let settings = self.finish(settings)?;
        Ok(Config {
            settings,
            project_root,
        })
    }

    /// Load configuration from a specific file
    pub fn load_from_file(&self, config_path: &Path) -> ConfigResult<Config> {
        let settings = Settings::load_from_file(config_path)?;
        let settings = self.finish(settings)?;
        Ok(Config {
            settings,
            project_root: config_path.parent().map(|p| p.to_path_buf()),
        })
    }

    fn finish(&self, settings: Settings) -> ConfigResult<Settings> {
        let settings = if self.use_env {
            self.apply_env_overrides(settings)?
        } else {
            settings
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Find project configuration by walking up the directory tree
    fn find_project_config(&self, start_dir: &Path) -> ConfigResult<(Option<PathBuf>, Settings)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.exists() {
                let settings = Settings::load_from_file(&config_path)?;
                return Ok((Some(current), settings));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, Settings::default())),
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Recognized: RELABEL_JUMP_MARKER, RELABEL_LABEL_MARKER,
    /// RELABEL_MAX_EXTENSION_STAGES, RELABEL_MAX_STEPS
    fn apply_env_overrides(&self, mut settings: Settings) -> ConfigResult<Settings> {
        if let Ok(jump) = env::var("RELABEL_JUMP_MARKER") {
            settings
                .markers
                .get_or_insert_with(MarkersConfig::default)
                .jump = Some(jump);
        }

        if let Ok(label) = env::var("RELABEL_LABEL_MARKER") {
            settings
                .markers
                .get_or_insert_with(MarkersConfig::default)
                .label = Some(label);
        }

        if let Ok(stages) = env::var("RELABEL_MAX_EXTENSION_STAGES") {
            let stages = stages
                .trim()
                .parse::<u8>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: "RELABEL_MAX_EXTENSION_STAGES".to_string(),
                    reason: e.to_string(),
                })?;
            settings
                .patch
                .get_or_insert_with(PatchConfig::default)
                .max_extension_stages = Some(stages);
        }

        if let Ok(steps) = env::var("RELABEL_MAX_STEPS") {
            let steps = steps
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: "RELABEL_MAX_STEPS".to_string(),
                    reason: e.to_string(),
                })?;
            settings.vm.get_or_insert_with(VmConfig::default).max_steps = Some(steps);
        }

        Ok(settings)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Whether a relabel.toml was found
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[markers]\njump = \"JMP\"\n");

        let config = ConfigLoader::without_env()
            .load_from_directory(temp_dir.path())
            .unwrap();

        assert_eq!(config.settings.jump_marker(), "JMP");
        assert_eq!(config.settings.label_marker(), "LABEL");
        assert!(config.is_project());
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[vm]\nmax_steps = 42\n");

        let sub_dir = temp_dir.path().join("nested").join("deeper");
        fs::create_dir_all(&sub_dir).unwrap();

        let config = ConfigLoader::without_env()
            .load_from_directory(&sub_dir)
            .unwrap();

        assert_eq!(config.settings.max_steps(), 42);
        assert_eq!(config.project_root(), Some(temp_dir.path()));
    }

    #[test]
    fn test_invalid_toml_reports_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_config_file(temp_dir.path(), "[markers\n");

        match ConfigLoader::without_env().load_from_file(&path) {
            Err(ConfigError::TomlParseError { file, .. }) => assert_eq!(file, path),
            other => panic!("expected TOML parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::without_env().load_from_file(Path::new("/nonexistent/relabel.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(temp_dir.path(), "[patch]\nmax_extension_stages = 3\n");

        env::set_var("RELABEL_MAX_EXTENSION_STAGES", "1");
        env::set_var("RELABEL_LABEL_MARKER", "TARGET");
        let config = ConfigLoader::new().load_from_directory(temp_dir.path());
        env::remove_var("RELABEL_MAX_EXTENSION_STAGES");
        env::remove_var("RELABEL_LABEL_MARKER");

        let config = config.unwrap();
        assert_eq!(config.settings.max_extension_stages(), 1);
        assert_eq!(config.settings.label_marker(), "TARGET");
    }

    #[test]
    #[serial]
    fn test_env_override_validated() {
        let temp_dir = TempDir::new().unwrap();

        env::set_var("RELABEL_MAX_STEPS", "lots");
        let result = ConfigLoader::new().load_from_directory(temp_dir.path());
        env::remove_var("RELABEL_MAX_STEPS");

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
