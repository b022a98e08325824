//! forksh REPL — interactive front end for the kernel.
//!
//! Each line typed is one kernel turn. Output lines and messages are printed
//! to stdout as they arrive, error lines to stderr; the prompt returns after
//! success or failure alike. `exit` (or end of input) stops every worker
//! before leaving.
//!
//! The runtime is single-threaded: workers' channels are serviced while a
//! turn runs, and sit idle at the prompt.

use std::path::PathBuf;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use tokio::runtime::{Builder, Runtime};

use forksh_kernel::{paths, Kernel, KernelConfig, ProcessError};

/// REPL state: a kernel and the runtime that drives it.
pub struct Repl {
    kernel: Kernel,
    runtime: Runtime,
}

impl Repl {
    pub fn with_config(config: KernelConfig) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create tokio runtime")?;
        Ok(Self {
            kernel: Kernel::new(config),
            runtime,
        })
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Run one line, streaming its output to the given sinks.
    pub fn process_line<O, E>(&mut self, line: &str, out: O, err: E) -> Result<(), ProcessError>
    where
        O: FnMut(&str),
        E: FnMut(&str),
    {
        self.runtime.block_on(self.kernel.execute_line(line, out, err))
    }

    /// Run one line, printing to the terminal.
    pub fn print_line(&mut self, line: &str) -> Result<(), ProcessError> {
        self.process_line(line, |l| println!("{l}"), |l| eprintln!("{l}"))
    }

    pub fn is_closed(&self) -> bool {
        self.kernel.is_closed()
    }

    /// Stop every worker.
    pub fn close(&mut self) {
        self.runtime.block_on(self.kernel.close());
    }
}

/// Save REPL history to disk.
fn save_history(rl: &mut Editor<(), DefaultHistory>, history_path: &Option<PathBuf>) {
    if let Some(path) = history_path {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("Failed to create history directory: {}", e);
            }
        }
        if let Err(e) = rl.save_history(path) {
            tracing::warn!("Failed to save history: {}", e);
        }
    }
}

/// Run the interactive REPL.
pub fn run(config: KernelConfig) -> Result<()> {
    println!("forksh v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'help' for commands, 'exit' to leave.");

    let mut rl: Editor<(), DefaultHistory> = Editor::new().context("Failed to create editor")?;

    let history_path = config.history.then(paths::history_file);
    if let Some(ref path) = history_path {
        if let Err(e) = rl.load_history(path) {
            let is_not_found =
                matches!(&e, ReadlineError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound);
            if !is_not_found {
                tracing::warn!("Failed to load history: {}", e);
            }
        }
    }

    let prompt = format!("{} ", config.prompt);
    let mut repl = Repl::with_config(config)?;

    while !repl.is_closed() {
        match rl.readline(&prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    if let Err(e) = rl.add_history_entry(line.as_str()) {
                        tracing::warn!("Failed to add history entry: {}", e);
                    }
                }
                if let Err(e) = repl.print_line(&line) {
                    eprintln!("Error: {e}");
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                break;
            }
        }
    }

    repl.close();
    save_history(&mut rl, &history_path);
    Ok(())
}

/// Run a single line and stop any workers it started.
///
/// Returns false if the line failed.
pub fn run_command(config: KernelConfig, line: &str) -> Result<bool> {
    let mut repl = Repl::with_config(config)?;
    let result = repl.print_line(line);
    repl.close();
    match result {
        Ok(()) => Ok(true),
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(false)
        }
    }
}
