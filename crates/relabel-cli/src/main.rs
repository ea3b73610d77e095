use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

/// Goto/label patcher for wordcode functions.
///
/// Reads a code object (JSON), resolves its `GOTO.<label>` / `LABEL.<label>`
/// marker statements into real jumps, and can disassemble or run the result.
///
/// EXAMPLES:
///     relabel patch func.json -o patched.json   Patch a function
///     relabel scan func.json                    Show markers and planned jumps
///     relabel disasm func.json --patch          Disassemble the patched function
///     relabel run func.json --patch             Patch, then run in the VM
///
/// ENVIRONMENT VARIABLES:
///     RUST_LOG                       Log filter (overrides --log-level)
///     RELABEL_JUMP_MARKER            Jump marker global name
///     RELABEL_LABEL_MARKER           Label marker global name
///     RELABEL_MAX_EXTENSION_STAGES   Prefix limit per jump (0-3)
///     RELABEL_MAX_STEPS              VM instruction budget
#[derive(Parser)]
#[command(name = "relabel")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, default_value_t = Level::WARN)]
    log_level: Level,

    /// Use this relabel.toml instead of searching from the working directory
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch a code object
    ///
    /// Writes the patched code object as JSON to the output file, or to
    /// stdout when no output is given.
    ///
    /// EXAMPLES:
    ///     relabel patch func.json              Print patched JSON
    ///     relabel patch func.json -o out.json  Write to a file
    ///     relabel patch func.json --stats      Also report what changed
    #[command(visible_alias = "p")]
    Patch {
        /// Path to the code object JSON
        input: PathBuf,
        /// Where to write the patched code object
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Skip re-decoding the patched stream
        #[arg(long)]
        no_verify: bool,
        /// Print patch statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// List markers, erase ranges and the jumps a patch would write
    #[command(visible_alias = "s")]
    Scan {
        /// Path to the code object JSON
        input: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Disassemble a code object
    #[command(visible_alias = "d")]
    Disasm {
        /// Path to the code object JSON
        input: PathBuf,
        /// Patch before disassembling
        #[arg(long)]
        patch: bool,
    },

    /// Run a code object in the VM and print what it prints
    #[command(visible_alias = "r")]
    Run {
        /// Path to the code object JSON
        input: PathBuf,
        /// Positional arguments (integers, or strings otherwise)
        args: Vec<String>,
        /// Patch before running
        #[arg(long)]
        patch: bool,
        /// Instruction budget (overrides config)
        #[arg(long)]
        max_steps: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Patch {
            input,
            output,
            no_verify,
            stats,
        } => commands::patch::run(&config, &input, output.as_deref(), !no_verify, stats),
        Commands::Scan { input, json } => commands::scan::run(&config, &input, json),
        Commands::Disasm { input, patch } => commands::disasm::run(&config, &input, patch),
        Commands::Run {
            input,
            args,
            patch,
            max_steps,
        } => commands::run::run(&config, &input, &args, patch, max_steps),
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing(level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
