//! Project settings (`relabel.toml`)

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default jump marker global name
pub const DEFAULT_JUMP_MARKER: &str = "GOTO";
/// Default label marker global name
pub const DEFAULT_LABEL_MARKER: &str = "LABEL";
/// Largest operand-extension chain the wordcode encoding allows
pub const MAX_EXTENSION_STAGES: u8 = 3;
/// Default VM instruction budget
pub const DEFAULT_MAX_STEPS: u64 = 1_000_000;

/// Project configuration from relabel.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Marker global names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markers: Option<MarkersConfig>,

    /// Patch pipeline settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<PatchConfig>,

    /// VM settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm: Option<VmConfig>,
}

/// `[markers]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct MarkersConfig {
    /// Global name of the jump marker (default: "GOTO")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jump: Option<String>,

    /// Global name of the label marker (default: "LABEL")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// `[patch]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct PatchConfig {
    /// Maximum number of extension prefixes a jump may use (0-3, default: 3)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_extension_stages: Option<u8>,

    /// Re-decode the patched stream and check every written jump (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<bool>,
}

/// `[vm]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct VmConfig {
    /// Instruction budget before the VM aborts (default: 1000000)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u64>,
}

impl Settings {
    /// Load settings from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let settings: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate every present value
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(markers) = &self.markers {
            if let Some(jump) = &markers.jump {
                validate_marker_name("markers.jump", jump)?;
            }
            if let Some(label) = &markers.label {
                validate_marker_name("markers.label", label)?;
            }
        }

        if self.jump_marker() == self.label_marker() {
            return Err(ConfigError::InvalidValue {
                field: "markers".to_string(),
                reason: format!(
                    "jump and label markers must differ (both are '{}')",
                    self.jump_marker()
                ),
            });
        }

        if let Some(stages) = self.patch.as_ref().and_then(|p| p.max_extension_stages) {
            if stages > MAX_EXTENSION_STAGES {
                return Err(ConfigError::InvalidValue {
                    field: "patch.max_extension_stages".to_string(),
                    reason: format!(
                        "{} exceeds the encoding limit of {}",
                        stages, MAX_EXTENSION_STAGES
                    ),
                });
            }
        }

        if self.vm.as_ref().and_then(|v| v.max_steps) == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "vm.max_steps".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Effective jump marker name
    pub fn jump_marker(&self) -> &str {
        self.markers
            .as_ref()
            .and_then(|m| m.jump.as_deref())
            .unwrap_or(DEFAULT_JUMP_MARKER)
    }

    /// Effective label marker name
    pub fn label_marker(&self) -> &str {
        self.markers
            .as_ref()
            .and_then(|m| m.label.as_deref())
            .unwrap_or(DEFAULT_LABEL_MARKER)
    }

    /// Effective extension stage limit
    pub fn max_extension_stages(&self) -> u8 {
        self.patch
            .as_ref()
            .and_then(|p| p.max_extension_stages)
            .unwrap_or(MAX_EXTENSION_STAGES)
    }

    /// Whether patched streams are verified
    pub fn verify(&self) -> bool {
        self.patch.as_ref().and_then(|p| p.verify).unwrap_or(true)
    }

    /// Effective VM instruction budget
    pub fn max_steps(&self) -> u64 {
        self.vm
            .as_ref()
            .and_then(|v| v.max_steps)
            .unwrap_or(DEFAULT_MAX_STEPS)
    }
}

/// Marker names are looked up as globals, so they must be identifiers
fn validate_marker_name(field: &str, name: &str) -> ConfigResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if !valid {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}' is not a valid identifier", name),
        });
    }
    Ok(())
}
