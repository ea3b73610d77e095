//! Patch command - resolve markers into jumps

use super::{patch_options, read_code};
use anyhow::{Context, Result};
use relabel_config::Config;
use relabel_runtime::GotoPatcher;
use std::fs;
use std::path::Path;

pub fn run(
    config: &Config,
    input: &Path,
    output: Option<&Path>,
    verify: bool,
    print_stats: bool,
) -> Result<()> {
    let code = read_code(input)?;
    let mut options = patch_options(config);
    options.verify = options.verify && verify;

    let (patched, stats) = GotoPatcher::new(options)
        .patch_with_stats(&code)
        .with_context(|| format!("Failed to patch {}", input.display()))?;

    let json = patched
        .to_json()
        .context("Failed to serialize patched code object")?;
    match output {
        Some(path) => fs::write(path, json + "\n")
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", json),
    }

    if print_stats {
        eprintln!(
            "{} label(s), {} jump(s), {} prefix(es), {} byte(s) erased",
            stats.labels, stats.jumps_patched, stats.extension_prefixes, stats.bytes_erased
        );
    }
    Ok(())
}
