//! The Kernel — one session of forksh.
//!
//! The Kernel owns the session (config, tools, worker registry) and runs one
//! turn per command line:
//!
//! ```text
//!   Idle ──▶ Parsing ──▶ Executing ──▶ Streaming ──▶ AwaitingTerminal ──▶ Idle
//!    │          │             │
//!    │     user error    user error / process error
//!    ▼
//!  Closing ──▶ close_all() ──▶ closed
//! ```
//!
//! User errors (syntax, unknown commands, usage, worker ids) are written to
//! the output sink and the turn ends normally. Process errors are the `Err`
//! of `execute_line`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::KernelConfig;
use crate::dispatch::ToolDispatcher;
use crate::error::ProcessError;
use crate::parser::parse;
use crate::process::{Outcome, Process};
use crate::scheduler;
use crate::tools::{register_builtins, Session, ToolRegistry, Turn};
use crate::workers::WorkerRegistry;

const HELP_HINT: &str = "Run 'help' for a list of commands.";

/// Where a turn is; logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Parsing,
    Executing,
    Streaming,
    AwaitingTerminal,
    Closing,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::Parsing => "parsing",
            TurnState::Executing => "executing",
            TurnState::Streaming => "streaming",
            TurnState::AwaitingTerminal => "awaiting-terminal",
            TurnState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// A forksh session.
pub struct Kernel {
    session: Arc<Session>,
    turns: AtomicU64,
    closed: AtomicBool,
}

impl Kernel {
    /// A session with every builtin and a fresh worker registry.
    pub fn new(config: KernelConfig) -> Self {
        let workers = Arc::new(WorkerRegistry::new(config.control_dir()));
        Self::with_workers(config, workers)
    }

    /// A session over an existing worker registry.
    pub fn with_workers(config: KernelConfig, workers: Arc<WorkerRegistry>) -> Self {
        let mut tools = ToolRegistry::new();
        register_builtins(&mut tools);
        let session = Session::new(Arc::new(config), Arc::new(tools), workers);
        Self {
            session: Arc::new(session),
            turns: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.session.config
    }

    pub fn workers(&self) -> &Arc<WorkerRegistry> {
        &self.session.workers
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.session.tools
    }

    /// Run one command line.
    ///
    /// Output lines and messages go to `out`, error lines to `err`. Returns
    /// once the started process reaches its terminal state; a `failed` state
    /// or a command that could not start is the `Err`.
    pub async fn execute_line<O, E>(&self, line: &str, mut out: O, mut err: E) -> Result<(), ProcessError>
    where
        O: FnMut(&str),
        E: FnMut(&str),
    {
        if self.is_closed() {
            return Err(ProcessError::Closed);
        }

        let turn = Arc::new(Turn::new((self.turns.fetch_add(1, Ordering::SeqCst) + 1).to_string()));
        let result = self.run_turn(&turn, line, &mut out, &mut err).await;
        transition(&turn, TurnState::Idle);

        if self.session.exit_requested() {
            self.close().await;
        }
        result
    }

    async fn run_turn(
        &self,
        turn: &Arc<Turn>,
        line: &str,
        out: &mut impl FnMut(&str),
        err: &mut impl FnMut(&str),
    ) -> Result<(), ProcessError> {
        transition(turn, TurnState::Parsing);
        let node = match parse(line) {
            Ok(Some(node)) => node,
            Ok(None) => return Ok(()),
            Err(e) => {
                out(&format!("Syntax error: {e}"));
                out(HELP_HINT);
                return Ok(());
            }
        };

        transition(turn, TurnState::Executing);
        let dispatcher = ToolDispatcher::new(self.session.clone(), turn.clone());
        let started = scheduler::execute(&node, &dispatcher, None).await;
        match started {
            Ok(Some(process)) => {
                flush_notices(turn, out);
                transition(turn, TurnState::Streaming);
                stream(turn, process, out, err).await
            }
            Ok(None) => {
                flush_notices(turn, out);
                Ok(())
            }
            Err(e) if e.is_user_error() => {
                out(&e.to_string());
                flush_notices(turn, out);
                Ok(())
            }
            Err(e) => {
                flush_notices(turn, out);
                Err(e.into())
            }
        }
    }

    /// Stop every worker; the session accepts no more lines.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(state = %TurnState::Closing, "turn state");
        self.session.workers.close_all().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("turns", &self.turns.load(Ordering::SeqCst))
            .field("workers", &self.session.workers)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn transition(turn: &Turn, state: TurnState) {
    tracing::debug!(turn = %turn.id(), %state, "turn state");
}

fn flush_notices(turn: &Turn, out: &mut impl FnMut(&str)) {
    for notice in turn.take_notices() {
        for line in notice.trim_end_matches('\n').lines() {
            out(line);
        }
    }
}

/// Forward a process's streams until its terminal state, then drain the
/// messages already queued. Nothing is read after that.
async fn stream(
    turn: &Turn,
    process: Process,
    out: &mut impl FnMut(&str),
    err: &mut impl FnMut(&str),
) -> Result<(), ProcessError> {
    let Process {
        stdout,
        stderr,
        mut messages,
        done,
    } = process;
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();
    let (mut stdout_open, mut stderr_open, mut messages_open) = (true, true, true);

    let outcome: Outcome = loop {
        tokio::select! {
            biased;

            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => out(&line),
                Ok(None) => stdout_open = false,
                Err(e) => {
                    tracing::debug!(turn = %turn.id(), error = %e, "output stream ended");
                    stdout_open = false;
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => err(&line),
                Ok(None) => stderr_open = false,
                Err(e) => {
                    tracing::debug!(turn = %turn.id(), error = %e, "error stream ended");
                    stderr_open = false;
                }
            },
            message = messages.next(), if messages_open => match message {
                Some(message) => out(&message.to_string()),
                None => messages_open = false,
            },
            outcome = done.wait() => break outcome,
        }
    };

    transition(turn, TurnState::AwaitingTerminal);
    while let Some(Some(message)) = messages.next().now_or_never() {
        out(&message.to_string());
    }
    if let Err(e) = &outcome {
        tracing::debug!(turn = %turn.id(), error = %e, "process failed");
    }
    outcome
}
