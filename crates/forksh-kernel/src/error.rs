//! Error types for the kernel.
//!
//! Errors fall into two families. *User errors* (bad syntax, unknown
//! commands, usage mistakes, unknown or ambiguous worker ids) are reported on
//! the output sink and end the turn quietly. *Process errors* (a command that
//! fails to start, a `failed` terminal state, a broken control channel) are
//! surfaced as the `Err` of `Kernel::execute_line`.

use std::io;

use thiserror::Error;

/// A command line could not be turned into a pipeline tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unterminated quote")]
    UnterminatedQuote,

    #[error("unexpected input: {0}")]
    UnexpectedInput(String),

    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("unexpected ')'")]
    UnexpectedClose,

    #[error("missing ')'")]
    UnclosedGroup,

    #[error("empty pipeline stage")]
    EmptyStage,

    #[error("a group must begin a pipeline stage")]
    MisplacedGroup,

    #[error("unexpected word after group: {0}")]
    WordAfterGroup(String),
}

/// A worker could not be found, addressed or reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Process {0} not found")]
    NotFound(String),

    /// No `--@id` was given and the default could not be decided.
    #[error("Missing required argument: @id ({0})")]
    Demand(String),

    #[error("correlation id {0} is already in flight")]
    DuplicateCorrelation(String),

    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("worker disconnected: {0}")]
    Disconnected(String),
}

impl RegistryError {
    /// NotFound and Demand come from argument resolution and are the user's to fix.
    pub fn is_user_error(&self) -> bool {
        matches!(self, RegistryError::NotFound(_) | RegistryError::Demand(_))
    }
}

/// Terminal failure of a process.
///
/// Clone so a single outcome can be observed by every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    /// A worker replied with an `error` frame.
    #[error("{0}")]
    Remote(String),

    #[error("process exited with {0}")]
    Exit(String),

    #[error("{0}")]
    Io(String),

    #[error("invalid input: {0}")]
    Input(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The process was dropped without reaching a terminal state.
    #[error("process abandoned before completion")]
    Abandoned,

    #[error("session is closed")]
    Closed,
}

impl ProcessError {
    /// Recover the failure behind an io error.
    ///
    /// Pipes carry the original `ProcessError` through the io layer; anything
    /// else becomes `Io`.
    pub fn from_io(err: &io::Error) -> Self {
        match err.get_ref().and_then(|e| e.downcast_ref::<ProcessError>()) {
            Some(inner) => inner.clone(),
            None => ProcessError::Io(err.to_string()),
        }
    }
}

impl From<io::Error> for ProcessError {
    fn from(err: io::Error) -> Self {
        ProcessError::from_io(&err)
    }
}

impl From<ProcessError> for io::Error {
    fn from(err: ProcessError) -> Self {
        io::Error::other(err)
    }
}

/// A command could not be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Bad arguments; the string is the complaint shown to the user.
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The command was valid but its process failed to start.
    #[error(transparent)]
    Start(#[from] ProcessError),
}

impl DispatchError {
    pub fn usage(msg: impl Into<String>) -> Self {
        DispatchError::Usage(msg.into())
    }

    pub fn is_user_error(&self) -> bool {
        match self {
            DispatchError::UnknownCommand(_) | DispatchError::Usage(_) => true,
            DispatchError::Registry(err) => err.is_user_error(),
            DispatchError::Start(_) => false,
        }
    }
}

impl From<DispatchError> for ProcessError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Start(err) => err,
            DispatchError::Registry(err) => ProcessError::Registry(err),
            other => ProcessError::Input(other.to_string()),
        }
    }
}
