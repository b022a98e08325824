//! Tool system for forksh.
//!
//! Every command is a tool: it declares its parameters in a `ToolSchema`,
//! and `execute` validates them and starts a `Process` (or reports user
//! output and starts nothing).
//!
//! ```text
//! ToolRegistry
//! ├── streams   echo, file, fake
//! ├── workers   fork, start, stop, workers
//! ├── exchanges status, read, write
//! └── session   help, exit
//! ```

mod builtin;
mod context;
mod registry;
mod traits;

pub use builtin::register_builtins;
pub use context::{CmdContext, Session, Turn};
pub use registry::ToolRegistry;
pub use traits::{Example, ParamSchema, Tool, ToolArgs, ToolSchema};
