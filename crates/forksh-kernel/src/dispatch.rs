//! Command dispatch — the single execution path for every pipeline leaf.
//!
//! The executor calls `dispatcher.dispatch()` for each leaf and handles the
//! stream wiring around it. `ToolDispatcher` resolves the leaf against the
//! session's tools:
//!
//! ```text
//! args ──▶ lookup ──▶ --help? ──▶ ToolArgs::parse ──▶ Tool::execute ──▶ Process | none
//!            │            │              │
//!     UnknownCommand   notice        Usage + notice
//! ```
//!
//! Validation never blocks: anything slow happens inside the returned
//! process.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::process::{ByteStream, Process};
use crate::tools::{CmdContext, Session, ToolArgs, Turn};

/// Resolves and starts a single command.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Dispatch one command. `args[0]` is the command name.
    ///
    /// Returns `None` when the command produced only user output (help,
    /// listings) and started nothing.
    async fn dispatch(&self, args: &[String], stdin: Option<ByteStream>) -> Result<Option<Process>, DispatchError>;
}

/// Dispatcher over the session's tool registry, scoped to one turn.
pub struct ToolDispatcher {
    session: Arc<Session>,
    turn: Arc<Turn>,
}

impl ToolDispatcher {
    pub fn new(session: Arc<Session>, turn: Arc<Turn>) -> Self {
        Self { session, turn }
    }
}

#[async_trait]
impl CommandDispatcher for ToolDispatcher {
    async fn dispatch(&self, args: &[String], stdin: Option<ByteStream>) -> Result<Option<Process>, DispatchError> {
        let Some((name, rest)) = args.split_first() else {
            return Err(DispatchError::usage("Empty command"));
        };

        let Some(tool) = self.session.tools.get(name) else {
            self.turn.notice(self.session.tools.overview());
            return Err(DispatchError::UnknownCommand(name.clone()));
        };
        let schema = tool.schema();

        if !schema.raw_args && rest.iter().any(|a| a == "--help" || a == "-h") {
            self.turn.notice(schema.help());
            return Ok(None);
        }

        let tool_args = if schema.raw_args {
            ToolArgs::raw(rest)
        } else {
            ToolArgs::parse(rest, &schema).inspect_err(|_| self.turn.notice(schema.help()))?
        };

        tracing::debug!(turn = %self.turn.id(), command = %name, piped = stdin.is_some(), "dispatch");
        let mut ctx = CmdContext::new(self.session.clone(), self.turn.clone(), stdin);
        tool.execute(tool_args, &mut ctx).await
    }
}
