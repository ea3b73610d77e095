//! Disasm command - print a code object listing

use super::{patch_options, read_code};
use anyhow::{Context, Result};
use relabel_config::Config;
use relabel_runtime::bytecode::disassemble;
use relabel_runtime::GotoPatcher;
use std::path::Path;

pub fn run(config: &Config, input: &Path, patch: bool) -> Result<()> {
    let mut code = read_code(input)?;
    if patch {
        code = GotoPatcher::new(patch_options(config))
            .patch(&code)
            .with_context(|| format!("Failed to patch {}", input.display()))?;
    }
    print!("{}", disassemble(&code));
    Ok(())
}
