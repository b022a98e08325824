//! Worker handles.
//!
//! A handle bundles everything the host keeps about a registered worker: its
//! control channel, taps on its output streams, and a watch on its exit.

use std::fmt;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;

use futures::stream;
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::bytes::Bytes;
use tokio_util::io::{ReaderStream, StreamReader};

use super::channel::ControlChannel;
use crate::process::ByteStream;
use crate::scheduler::pipe_stream_default;

/// Output chunks buffered per tap subscriber.
const TAP_CAPACITY: usize = 256;

/// How a worker process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub success: bool,
    pub description: String,
}

impl WorkerExit {
    pub fn from_status(status: ExitStatus) -> Self {
        Self {
            success: status.success(),
            description: status.to_string(),
        }
    }

    pub fn wait_failed(err: &io::Error) -> Self {
        Self {
            success: false,
            description: format!("wait failed: {err}"),
        }
    }

    /// The exit watch was dropped without a report.
    pub fn lost() -> Self {
        Self {
            success: false,
            description: "exit status lost".to_string(),
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Receiver side of a worker's exit report.
pub type ExitWatch = watch::Receiver<Option<WorkerExit>>;

/// Wait until the worker has exited.
pub async fn wait_exit(exit: &mut ExitWatch) -> WorkerExit {
    let exited = match exit.wait_for(Option::is_some).await {
        Ok(exited) => (*exited).clone(),
        Err(_) => None,
    };
    exited.unwrap_or_else(WorkerExit::lost)
}

/// Fan-out of one child output stream.
///
/// ```text
///   child ─▶ pump ─┬─▶ pipe_stream ─▶ first reader   (backpressured, lossless)
///                  └─▶ broadcast ───▶ later readers  (lossy taps)
/// ```
///
/// The first reader belongs to the process that spawned the worker: the pump
/// waits for it, so nothing is lost however slowly it is consumed. Once it is
/// dropped the pump stops waiting and output only feeds the taps. A tap that
/// falls behind skips chunks. When the child closes the stream every reader
/// reaches end-of-data.
pub struct OutputTap {
    template: broadcast::Receiver<Bytes>,
}

impl OutputTap {
    /// Start pumping `source`. Returns the tap, the first reader, and the
    /// pump task.
    pub fn start<R>(source: Option<R>) -> (Self, ByteStream, JoinHandle<()>)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (tx, template) = broadcast::channel(TAP_CAPACITY);
        let (writer, first) = pipe_stream_default();
        let pump = tokio::spawn(async move {
            let Some(source) = source else { return };
            let mut primary = Some(writer);
            let mut chunks = ReaderStream::new(source);
            while let Some(chunk) = futures::StreamExt::next(&mut chunks).await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        tracing::debug!(%err, "worker output stream failed");
                        break;
                    }
                };
                if let Some(pipe) = &primary {
                    if pipe.write_all_bytes(&chunk).await.is_err() {
                        tracing::trace!("first reader gone; output feeds taps only");
                        primary = None;
                    }
                }
                // No subscriber is fine; output nobody reads is dropped.
                let _ = tx.send(chunk);
            }
        });
        (Self { template }, Box::new(first), pump)
    }

    /// A tap with no source; readers see end-of-data immediately.
    pub fn closed() -> Self {
        let (_, template) = broadcast::channel(1);
        Self { template }
    }

    /// A lossy reader of output pumped from now on.
    pub fn reader(&self) -> ByteStream {
        broadcast_reader(self.template.resubscribe())
    }
}

fn broadcast_reader(rx: broadcast::Receiver<Bytes>) -> ByteStream {
    let chunks = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(chunk) => return Some((Ok::<_, io::Error>(chunk), rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "tap lagged behind worker output; chunks skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Box::new(StreamReader::new(Box::pin(chunks)))
}

/// The pieces of a running worker.
pub struct WorkerIo {
    pub pid: Option<u32>,
    pub program: String,
    pub channel: Arc<ControlChannel>,
    pub stdout: OutputTap,
    pub stderr: OutputTap,
    pub exit: ExitWatch,
}

/// A registered worker.
pub struct WorkerHandle {
    id: String,
    serial: u64,
    io: WorkerIo,
}

impl WorkerHandle {
    pub fn new(id: impl Into<String>, serial: u64, io: WorkerIo) -> Self {
        Self {
            id: id.into(),
            serial,
            io,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spawn-order number; distinguishes a worker from a later one reusing its id.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn pid(&self) -> Option<u32> {
        self.io.pid
    }

    pub fn program(&self) -> &str {
        &self.io.program
    }

    pub fn channel(&self) -> &Arc<ControlChannel> {
        &self.io.channel
    }

    /// Worker stdout from now on. Lossy if not read promptly.
    pub fn stdout(&self) -> ByteStream {
        self.io.stdout.reader()
    }

    /// Worker stderr from now on. Lossy if not read promptly.
    pub fn stderr(&self) -> ByteStream {
        self.io.stderr.reader()
    }

    pub fn exit_watch(&self) -> ExitWatch {
        self.io.exit.clone()
    }

    pub fn exit_status(&self) -> Option<WorkerExit> {
        self.io.exit.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.io.exit.borrow().is_some()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("serial", &self.serial)
            .field("pid", &self.io.pid)
            .field("program", &self.io.program)
            .finish()
    }
}
