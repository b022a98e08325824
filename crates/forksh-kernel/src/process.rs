//! Processes — the unit every command produces.
//!
//! A `Process` is anything with an output byte stream, an error byte stream,
//! an out-of-band message stream and exactly one terminal transition. It may
//! be an in-process stream (`echo`), a sink feeding a file or a worker
//! (`file`, `write`), a spawned OS process, or a logical exchange (`status`).
//!
//! ```text
//!   ProcessControl ──complete()/fail()──▶ watch<Option<Outcome>> ──▶ Completion
//!        │                                   first write wins            ├── wait().await
//!        └──emit(msg)──▶ unbounded channel ──▶ Process::messages          └── on_done(cb)
//! ```
//!
//! "Done" means control can be returned to the user or the next stage. The
//! work behind a process may continue afterwards: a spawned worker is done
//! once it reports `started`, and keeps running.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::watch;

use crate::error::ProcessError;

/// A forward-only byte stream.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Structured notifications delivered alongside the byte streams.
pub type MessageStream = BoxStream<'static, Value>;

/// Outcome of a process.
pub type Outcome = Result<(), ProcessError>;

/// An empty byte stream.
pub fn empty_stream() -> ByteStream {
    Box::new(tokio::io::empty())
}

/// Awaitable view of a process's single terminal transition.
#[derive(Clone)]
pub struct Completion {
    rx: watch::Receiver<Option<Outcome>>,
}

impl Completion {
    /// Wait for the terminal state.
    ///
    /// If every `ProcessControl` is dropped without finalizing, the process
    /// is reported as `Abandoned` rather than left hanging.
    pub async fn wait(&self) -> Outcome {
        let mut rx = self.rx.clone();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        result.unwrap_or(Err(ProcessError::Abandoned))
    }

    /// Terminal state, if already reached.
    pub fn peek(&self) -> Option<Outcome> {
        self.rx.borrow().clone()
    }

    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Invoke `f` once with the outcome. Must be called inside a runtime.
    pub fn on_done<F>(&self, f: F)
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let completion = self.clone();
        tokio::spawn(async move {
            f(completion.wait().await);
        });
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").field("outcome", &self.peek()).finish()
    }
}

/// The driving side of a process: finalizes it and emits messages.
///
/// Cloneable; every clone drives the same process. Only the first
/// `complete`/`fail` has an effect.
#[derive(Clone)]
pub struct ProcessControl {
    state: Arc<watch::Sender<Option<Outcome>>>,
    messages: mpsc::UnboundedSender<Value>,
}

impl ProcessControl {
    /// Create a control with its completion view and message stream.
    pub fn new() -> (Self, Completion, MessageStream) {
        let (state, rx) = watch::channel(None);
        let (messages, message_rx) = mpsc::unbounded();
        let control = Self {
            state: Arc::new(state),
            messages,
        };
        (control, Completion { rx }, message_rx.boxed())
    }

    /// Transition to `completed`. Returns false if already finalized.
    pub fn complete(&self) -> bool {
        self.finish(Ok(()))
    }

    /// Transition to `failed`. Returns false if already finalized.
    pub fn fail(&self, err: impl Into<ProcessError>) -> bool {
        self.finish(Err(err.into()))
    }

    /// Finalize with an outcome.
    pub fn finish(&self, outcome: Outcome) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_some() {
                false
            } else {
                *state = Some(outcome);
                true
            }
        })
    }

    /// Emit a message. Ignored once the process is finalized.
    pub fn emit(&self, message: Value) {
        if self.is_done() {
            tracing::debug!("dropping message emitted after completion");
            return;
        }
        // Receiver gone means nobody is listening; nothing to do.
        let _ = self.messages.unbounded_send(message);
    }

    pub fn is_done(&self) -> bool {
        self.state.borrow().is_some()
    }

    pub fn completion(&self) -> Completion {
        Completion {
            rx: self.state.subscribe(),
        }
    }
}

/// A running process.
pub struct Process {
    pub stdout: ByteStream,
    pub stderr: ByteStream,
    pub messages: MessageStream,
    pub done: Completion,
}

impl Process {
    /// A process with the given streams, driven by the returned control.
    pub fn new(stdout: Option<ByteStream>, stderr: Option<ByteStream>) -> (Self, ProcessControl) {
        let (control, done, messages) = ProcessControl::new();
        let process = Self {
            stdout: stdout.unwrap_or_else(empty_stream),
            stderr: stderr.unwrap_or_else(empty_stream),
            messages,
            done,
        };
        (process, control)
    }

    /// Sync completion: the lifecycle follows the output stream.
    ///
    /// Completes at end of data or when the consumer drops the stream; fails
    /// on a read error.
    pub fn sync(stdout: ByteStream) -> Self {
        let (mut process, control) = Self::new(None, None);
        process.stdout = Box::new(Finalizing {
            inner: stdout,
            control,
        });
        process
    }

    /// Sink completion: completes when `work` resolves Ok, fails on Err.
    ///
    /// `work` typically drains upstream stdin into an external sink and
    /// resolves once the sink has acknowledged everything.
    pub fn sink<F>(work: F) -> Self
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let (process, control) = Self::new(None, None);
        tokio::spawn(async move {
            control.finish(work.await);
        });
        process
    }

    /// A process that is already complete and produces nothing.
    pub fn completed() -> Self {
        let (process, control) = Self::new(None, None);
        control.complete();
        process
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process").field("done", &self.done).finish_non_exhaustive()
    }
}

/// Wraps an output stream and finalizes its process from the stream's lifecycle.
struct Finalizing {
    inner: ByteStream,
    control: ProcessControl,
}

impl AsyncRead for Finalizing {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if buf.filled().len() == before && buf.remaining() > 0 {
                    this.control.complete();
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => {
                this.control.fail(ProcessError::from_io(&err));
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Finalizing {
    fn drop(&mut self) {
        self.control.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_first_finalization_wins() {
        let (process, control) = Process::new(None, None);
        assert!(control.fail(ProcessError::Remote("boom".into())));
        assert!(!control.complete());
        assert!(!control.fail(ProcessError::Remote("again".into())));

        assert_eq!(process.done.wait().await, Err(ProcessError::Remote("boom".into())));
        // Observed twice, same answer.
        assert_eq!(process.done.wait().await, Err(ProcessError::Remote("boom".into())));
    }

    #[tokio::test]
    async fn test_sync_completes_at_end_of_data() {
        let mut process = Process::sync(Box::new(&b"hello\n"[..]));
        assert!(!process.done.is_done());

        let mut out = String::new();
        process.stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello\n");
        assert_eq!(process.done.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_sync_completes_when_consumer_drops() {
        let process = Process::sync(Box::new(&b"never read"[..]));
        let Process { stdout, done, .. } = process;
        drop(stdout);
        assert_eq!(done.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_sync_fails_on_stream_error() {
        let (writer, reader) = crate::scheduler::pipe_stream(64);
        writer.fail(ProcessError::Remote("bad subject".into()).into());

        let mut process = Process::sync(Box::new(reader));
        let mut out = Vec::new();
        assert!(process.stdout.read_to_end(&mut out).await.is_err());
        assert_eq!(process.done.wait().await, Err(ProcessError::Remote("bad subject".into())));
    }

    #[tokio::test]
    async fn test_sink_follows_work_outcome() {
        let ok = Process::sink(async { Ok(()) });
        assert_eq!(ok.done.wait().await, Ok(()));

        let failed = Process::sink(async { Err(ProcessError::Io("disk full".into())) });
        assert_eq!(failed.done.wait().await, Err(ProcessError::Io("disk full".into())));
    }

    #[tokio::test]
    async fn test_messages_refused_after_completion() {
        let (mut process, control) = Process::new(None, None);
        control.emit(json!({"@type": "started"}));
        control.complete();
        control.emit(json!({"@type": "late"}));
        drop(control);

        let messages: Vec<Value> = process.messages.by_ref().collect().await;
        assert_eq!(messages, vec![json!({"@type": "started"})]);
    }

    #[tokio::test]
    async fn test_dropped_control_is_abandoned() {
        let (process, control) = Process::new(None, None);
        drop(control);
        assert_eq!(process.done.wait().await, Err(ProcessError::Abandoned));
    }

    #[tokio::test]
    async fn test_on_done_callback() {
        let (process, control) = Process::new(None, None);
        let (tx, rx) = tokio::sync::oneshot::channel();
        process.done.on_done(move |outcome| {
            let _ = tx.send(outcome);
        });
        control.complete();
        assert_eq!(rx.await.unwrap(), Ok(()));
    }
}
