//! Workers — spawned processes that speak the control-channel protocol.
//!
//! - `channel`: framed JSON transport with per-correlation-id routing
//! - `exchange`: single-reply and streaming request helpers
//! - `handle`: what the host keeps per worker (channel, output taps, exit)
//! - `spawn`: launching a program and following it to `started` or exit
//! - `registry`: id → handle map, default-id resolution, stop and close

mod channel;
mod exchange;
mod handle;
mod registry;
mod spawn;

pub use channel::{ChannelEnd, ControlChannel, Route};
pub use exchange::{await_terminal, round_trip, stream_read};
pub use handle::{wait_exit, ExitWatch, OutputTap, WorkerExit, WorkerHandle, WorkerIo};
pub use registry::{RegistryEvent, WorkerInfo, WorkerRegistry};
