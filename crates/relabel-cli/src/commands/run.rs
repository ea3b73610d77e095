//! Run command - execute a code object in the VM

use super::{patch_options, read_code};
use anyhow::{Context, Result};
use relabel_config::Config;
use relabel_runtime::{GotoPatcher, Value, VM};
use std::path::Path;
use tracing::debug;

pub fn run(
    config: &Config,
    input: &Path,
    args: &[String],
    patch: bool,
    max_steps: Option<u64>,
) -> Result<()> {
    let mut code = read_code(input)?;
    let options = patch_options(config);
    if patch {
        code = GotoPatcher::new(options.clone())
            .patch(&code)
            .with_context(|| format!("Failed to patch {}", input.display()))?;
    }

    let args: Vec<Value> = args.iter().map(|arg| parse_arg(arg)).collect();
    let mut vm = VM::new(&code)
        .with_max_steps(max_steps.unwrap_or_else(|| config.settings.max_steps()))
        .with_markers(options.markers);
    let result = vm.run(&args);
    debug!(steps = vm.steps(), "run finished");

    // Output written before a failure is still shown
    print!("{}", vm.output());
    let value = result.with_context(|| format!("Failed to run {}", input.display()))?;
    if value != Value::None {
        println!("{}", value);
    }
    Ok(())
}

fn parse_arg(arg: &str) -> Value {
    match arg.parse::<i64>() {
        Ok(n) => Value::Int(n),
        Err(_) => Value::Str(arg.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg() {
        assert_eq!(parse_arg("12"), Value::Int(12));
        assert_eq!(parse_arg("-3"), Value::Int(-3));
        assert_eq!(parse_arg("abc"), Value::Str("abc".into()));
    }
}
