//! Pure data types for forksh — the control-channel envelope.
//!
//! This crate is a leaf dependency with no async runtime and no I/O. Both the
//! host shell (`forksh-kernel`) and worker processes (`forksh-worker`) speak
//! the envelope defined here, so neither needs the other's dependency tree.

pub mod envelope;

pub use envelope::*;
