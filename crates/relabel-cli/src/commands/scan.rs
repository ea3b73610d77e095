//! Scan command - show what a patch would do without doing it

use super::{patch_options, read_code};
use anyhow::{Context, Result};
use relabel_config::Config;
use relabel_runtime::goto::{EraseTable, JumpEncoding, JumpTable};
use relabel_runtime::{GotoPatcher, Opcode};
use serde::Serialize;
use std::fmt;
use std::path::Path;

#[derive(Serialize)]
struct ScanReport {
    jumps: JumpTable,
    erase: EraseTable,
    plan: Vec<JumpEncoding>,
}

pub fn run(config: &Config, input: &Path, json: bool) -> Result<()> {
    let code = read_code(input)?;
    let patcher = GotoPatcher::new(patch_options(config));
    let context = || format!("Failed to scan {}", input.display());
    let (jumps, erase) = patcher.scan(&code).with_context(context)?;
    let plan = patcher.plan(&code).with_context(context)?;
    let report = ScanReport { jumps, erase, plan };

    if json {
        let text = serde_json::to_string_pretty(&report).context("Failed to serialize scan")?;
        println!("{}", text);
    } else {
        print!("{}", report);
    }
    Ok(())
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.jumps.is_empty() {
            return writeln!(f, "no markers");
        }

        writeln!(f, "=== Labels ===")?;
        for label in self.jumps.labels() {
            let Some(sites) = self.jumps.get(label) else {
                continue;
            };
            let origins: Vec<String> = sites
                .jumps
                .iter()
                .map(|site| format!("{:04}", site.origin))
                .collect();
            let target = sites
                .target
                .map(|target| format!("{:04}", target))
                .unwrap_or_else(|| "----".to_string());
            writeln!(f, "{}  target {}  jumps from {}", label, target, origins.join(", "))?;
        }

        writeln!(f)?;
        writeln!(f, "=== Erase ===")?;
        for range in &self.erase {
            writeln!(
                f,
                "{:<5}  {}  [{:04}, {:04})",
                range.kind.to_string(),
                range.label,
                range.begin,
                range.end
            )?;
        }

        writeln!(f)?;
        writeln!(f, "=== Jumps ===")?;
        for plan in &self.plan {
            let mnemonic = Opcode::try_from(plan.opcode)
                .map(Opcode::mnemonic)
                .unwrap_or("<jump>");
            writeln!(
                f,
                "{:04} -> {:04}  {} {}  ({} prefix(es))  {}",
                plan.origin, plan.target, mnemonic, plan.operand, plan.stages, plan.label
            )?;
        }
        Ok(())
    }
}
