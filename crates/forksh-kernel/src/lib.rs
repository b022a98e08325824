//! forksh-kernel: the core of forksh.
//!
//! This crate provides:
//!
//! - **Lexer**: Tokenizes command lines using logos
//! - **Parser**: Builds the pipeline tree (`>` pipes, `( )` groups)
//! - **Process**: Output/error streams, messages and a single terminal state
//! - **Scheduler**: Pipeline execution and stream composition
//! - **Tools**: Tool trait, registry, and builtin commands
//! - **Workers**: Spawned workers, their control channels and the registry
//! - **Kernel**: One session; runs a command line as a turn
//! - **Paths**: XDG-compliant path helpers

pub mod ast;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod kernel;
pub mod lexer;
pub mod parser;
pub mod paths;
pub mod process;
pub mod scheduler;
pub mod tools;
pub mod workers;

pub use config::KernelConfig;
pub use dispatch::{CommandDispatcher, ToolDispatcher};
pub use error::{DispatchError, ParseError, ProcessError, RegistryError};
pub use kernel::{Kernel, TurnState};
pub use process::{ByteStream, Completion, Outcome, Process, ProcessControl};
pub use workers::{WorkerHandle, WorkerRegistry};

// XDG path primitives
pub use paths::{home_dir, xdg_config_home, xdg_data_home, xdg_runtime_dir};
