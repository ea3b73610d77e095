pub mod disasm;
pub mod patch;
pub mod run;
pub mod scan;

use anyhow::{Context, Result};
use relabel_config::{Config, ConfigLoader};
use relabel_runtime::goto::PatchOptions;
use relabel_runtime::CodeObject;
use std::fs;
use std::path::Path;

/// Explicit config file, or the nearest relabel.toml above the working directory
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let loader = ConfigLoader::new();
    match explicit {
        Some(path) => loader
            .load_from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => {
            let cwd = std::env::current_dir().context("Failed to read working directory")?;
            loader
                .load_from_directory(&cwd)
                .context("Failed to load relabel.toml")
        }
    }
}

/// Read a code object from its JSON file
pub fn read_code(path: &Path) -> Result<CodeObject> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read code object: {}", path.display()))?;
    CodeObject::from_json(&text)
        .with_context(|| format!("Failed to parse code object: {}", path.display()))
}

pub fn patch_options(config: &Config) -> PatchOptions {
    PatchOptions::from_settings(&config.settings)
}
