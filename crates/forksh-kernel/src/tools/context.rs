//! Execution context for tools.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use forksh_types::CorrelationId;

use crate::config::KernelConfig;
use crate::error::{DispatchError, RegistryError};
use crate::process::ByteStream;
use crate::tools::ToolRegistry;
use crate::workers::{WorkerHandle, WorkerRegistry};

/// State shared by every command of a session.
pub struct Session {
    pub config: Arc<KernelConfig>,
    pub tools: Arc<ToolRegistry>,
    pub workers: Arc<WorkerRegistry>,
    exit_requested: AtomicBool,
}

impl Session {
    pub fn new(config: Arc<KernelConfig>, tools: Arc<ToolRegistry>, workers: Arc<WorkerRegistry>) -> Self {
        Self {
            config,
            tools,
            workers,
            exit_requested: AtomicBool::new(false),
        }
    }

    pub fn request_exit(&self) {
        self.exit_requested.store(true, Ordering::SeqCst);
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::SeqCst)
    }
}

/// State shared by every command of one turn.
///
/// The turn's id is the correlation id of single exchanges; sub-exchanges
/// (one per written item) are namespaced `"<turn>-<n>"`.
pub struct Turn {
    id: CorrelationId,
    sub_ids: AtomicU64,
    notices: Mutex<Vec<String>>,
}

impl Turn {
    pub fn new(id: impl Into<CorrelationId>) -> Self {
        Self {
            id: id.into(),
            sub_ids: AtomicU64::new(1),
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// A fresh sub-exchange id.
    pub fn next_sub_id(&self) -> CorrelationId {
        format!("{}-{}", self.id, self.sub_ids.fetch_add(1, Ordering::SeqCst))
    }

    /// Queue user-facing text (help, listings) for the output sink.
    pub fn notice(&self, text: impl Into<String>) {
        self.notices.lock().unwrap_or_else(|e| e.into_inner()).push(text.into());
    }

    /// Take the queued notices.
    pub fn take_notices(&self) -> Vec<String> {
        std::mem::take(&mut *self.notices.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Execution context passed to tools.
pub struct CmdContext {
    pub session: Arc<Session>,
    pub turn: Arc<Turn>,
    /// Upstream output, when the command is not first in its pipeline.
    pub stdin: Option<ByteStream>,
}

impl CmdContext {
    pub fn new(session: Arc<Session>, turn: Arc<Turn>, stdin: Option<ByteStream>) -> Self {
        Self { session, turn, stdin }
    }

    /// Correlation id for this command's exchange.
    pub fn cmd_id(&self) -> &str {
        self.turn.id()
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

    pub fn take_stdin(&mut self) -> Option<ByteStream> {
        self.stdin.take()
    }

    pub fn notice(&self, text: impl Into<String>) {
        self.turn.notice(text);
    }

    /// Resolve the worker a command addresses from its `--@id` option.
    pub fn worker(&self, id: Option<&str>, verb: &str) -> Result<Arc<WorkerHandle>, DispatchError> {
        let workers = self.workers();
        let id = workers.resolve_default_id(id, verb)?;
        workers.get(&id).map_err(|err: RegistryError| err.into())
    }
}
