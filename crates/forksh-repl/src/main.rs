//! forksh CLI entry point.
//!
//! Usage:
//!   forksh                      # Interactive REPL
//!   forksh -c <command>         # Run one command line and exit
//!   forksh start [OPTIONS]      # Run as a worker (what `start` launches)

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use forksh_kernel::KernelConfig;
use forksh_worker::{MemoryEngine, WorkerLink, WorkerOptions};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Options accepted before the command.
#[derive(Debug, Default)]
struct GlobalOptions {
    config: Option<PathBuf>,
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let (globals, rest) = match split_globals(&args) {
        Ok(split) => split,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Run 'forksh --help' for usage.");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(globals.log_level.as_deref());

    match run(&globals, rest) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout belongs to command output (and, for a
/// standalone worker, to its reports).
fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::from_default_env(),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn split_globals(args: &[String]) -> Result<(GlobalOptions, &[String])> {
    let mut globals = GlobalOptions::default();
    let mut i = 0;
    while let Some(arg) = args.get(i) {
        match arg.as_str() {
            "--config" => {
                let path = args.get(i + 1).context("--config requires a path")?;
                globals.config = Some(PathBuf::from(path));
                i += 2;
            }
            "--log-level" => {
                let level = args.get(i + 1).context("--log-level requires a level")?;
                globals.log_level = Some(level.clone());
                i += 2;
            }
            _ => break,
        }
    }
    Ok((globals, &args[i..]))
}

fn load_config(globals: &GlobalOptions) -> Result<KernelConfig> {
    match &globals.config {
        Some(path) => KernelConfig::load_from(path),
        None => KernelConfig::load(),
    }
}

fn run(globals: &GlobalOptions, args: &[String]) -> Result<ExitCode> {
    match args.first().map(|s| s.as_str()) {
        None => {
            forksh_repl::run(load_config(globals)?)?;
            Ok(ExitCode::SUCCESS)
        }

        Some("--help" | "-h") => {
            print_help();
            Ok(ExitCode::SUCCESS)
        }

        Some("--version" | "-V") => {
            println!(
                "forksh {} ({} {})",
                env!("CARGO_PKG_VERSION"),
                env!("FORKSH_GIT_HASH"),
                env!("FORKSH_BUILD_DATE")
            );
            Ok(ExitCode::SUCCESS)
        }

        Some("-c") => {
            let line = args.get(1).context("-c requires a command argument")?;
            let ok = forksh_repl::run_command(load_config(globals)?, line)?;
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }

        Some("start") => run_worker(&args[1..]),

        Some(unknown) => {
            eprintln!("Unknown option: {unknown}");
            eprintln!("Run 'forksh --help' for usage.");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_help() {
    println!(
        r#"forksh v{}

Usage:
  forksh [OPTIONS]                Interactive REPL
  forksh [OPTIONS] -c <command>   Run one command line and exit
  forksh start [WORKER OPTIONS]   Run as a worker

Options:
  --config <path>                 Config file (default: $XDG_CONFIG_HOME/forksh/config.toml)
  --log-level <filter>            Log filter, e.g. debug or forksh_kernel=trace (default: $RUST_LOG)
  -c <command>                    Run a command line and exit
  -h, --help                      Show this help
  -V, --version                   Show version

Examples:
  forksh -c 'echo hello'
  forksh -c 'echo hello > file greeting.txt'
"#,
        env!("CARGO_PKG_VERSION")
    );
}

const WORKER_HELP: &str = r#"forksh start — run an in-memory subject store as a worker

Usage:
  start [--@id <id>] [--env KEY=VALUE]... [--dry-run]

Options:
  --@id <id>        Worker id (default: a fresh UUID)
  --env KEY=VALUE   Environment for workers started after this one
  --dry-run         Print the resolved options and exit without starting
  -h, --help        Show this help
"#;

fn parse_worker_options(args: &[String]) -> Result<Option<WorkerOptions>> {
    let mut options = WorkerOptions::default();
    let mut args = args.iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--@id" => options.id = Some(args.next().context("--@id requires a value")?.clone()),
            "--env" => {
                let pair = args.next().context("--env requires KEY=VALUE")?;
                let (key, value) = pair
                    .split_once('=')
                    .with_context(|| format!("--env expects KEY=VALUE, got {pair}"))?;
                options.env.insert(key.to_string(), value.to_string());
            }
            "--dry-run" => options.dry_run = true,
            other => bail!("Unknown argument: {other}"),
        }
    }
    Ok(Some(options))
}

fn run_worker(args: &[String]) -> Result<ExitCode> {
    let Some(options) = parse_worker_options(args)? else {
        print!("{WORKER_HELP}");
        return Ok(ExitCode::SUCCESS);
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    runtime.block_on(WorkerLink::new(options, MemoryEngine::new()).run())?;
    Ok(ExitCode::SUCCESS)
}
