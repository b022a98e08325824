//! Scheduler — pipeline execution and stream plumbing.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 execute(node, dispatcher, stdin)             │
//! │                                                              │
//! │   Leaf ──▶ dispatcher.dispatch(args, stdin) ──▶ Process      │
//! │                                                              │
//! │   Pipe ──▶ left = execute(left, stdin)                       │
//! │            right = execute(right, left.stdout)               │
//! │            compose(left, right):                             │
//! │              stdout   = right.stdout                         │
//! │              stderr   = merge(left.stderr, right.stderr)     │
//! │              messages = merge(left.messages, right.messages) │
//! │              done     = both complete │ first failure        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod pipe_stream;
mod pipeline;

pub use pipe_stream::{pipe_stream, pipe_stream_default, PipeReader, PipeWriter, PIPE_BUFFER_SIZE};
pub use pipeline::{compose, execute};
