//! forksh-worker: the worker side of the control channel.
//!
//! A worker spawned by forksh finds the host's control socket in
//! `FORKSH_CONTROL_SOCKET`, reports `started` with its id, then serves host
//! requests until told to stop:
//!
//! ```text
//!   host                                   worker
//!    │ ◀──── {"cmdId":"start","@type":"started","@id":"w1"}
//!    │ ──── {"id":"3","@type":"read","jrql":{...}} ────▶ Engine::read
//!    │ ◀──── {"cmdId":"3","@type":"next","subject":{...}}   (per subject)
//!    │ ◀──── {"cmdId":"3","@type":"complete"}
//!    │ ──── {"id":"stop","@type":"stop"} ────▶
//!    │ ◀──── {"cmdId":"stop","@type":"stopped","@id":"w1"}  then exit
//! ```
//!
//! Without a control socket the worker runs standalone: reports go to
//! stdout and requests are read from stdin.

pub mod engine;

use std::collections::HashMap;

use anyhow::{Context, Result};
use forksh_types::{Reply, ReplyKind, Request, RequestKind, CONTROL_SOCKET_ENV, START_CMD_ID};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

pub use engine::{Engine, EngineError, MemoryEngine};

/// Startup options for a worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    /// Self-assigned id; a fresh UUID when absent.
    pub id: Option<String>,
    /// Environment the host should pass to workers it starts later.
    pub env: HashMap<String, String>,
    /// Report the resolved options as `config` and exit without starting.
    pub dry_run: bool,
}

/// One worker's end of the control channel.
pub struct WorkerLink<E> {
    id: String,
    env: HashMap<String, String>,
    dry_run: bool,
    engine: E,
}

impl<E: Engine> WorkerLink<E> {
    pub fn new(options: WorkerOptions, engine: E) -> Self {
        let id = options.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self {
            id,
            env: options.env,
            dry_run: options.dry_run,
            engine,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connect to the host named in the environment, or run standalone.
    pub async fn run(self) -> Result<()> {
        match std::env::var_os(CONTROL_SOCKET_ENV) {
            Some(path) => {
                let stream = UnixStream::connect(&path)
                    .await
                    .with_context(|| format!("Failed to connect to control socket {}", path.to_string_lossy()))?;
                tracing::debug!(socket = %path.to_string_lossy(), "connected to host");
                let (read, write) = stream.into_split();
                self.serve(read, write).await
            }
            None => {
                tracing::debug!("no control socket; running standalone");
                self.serve(tokio::io::stdin(), tokio::io::stdout()).await
            }
        }
    }

    /// Report `started`, then answer requests until `stop` or end of input.
    ///
    /// A dry run reports `config` instead and serves nothing, so the host
    /// never registers it.
    pub async fn serve<R, W>(self, read: R, write: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut requests = FramedRead::new(read, LinesCodec::new());
        let mut replies = FramedWrite::new(write, LinesCodec::new());

        if self.dry_run {
            let config = Reply::new(START_CMD_ID, ReplyKind::Config)
                .with("@id", json!(self.id))
                .with("env", json!(self.env))
                .with("dryRun", json!(true));
            send(&mut replies, &config).await?;
            self.engine.close().await;
            return Ok(());
        }

        let mut started = Reply::started(START_CMD_ID, self.id.as_str());
        if !self.env.is_empty() {
            started = started.with("env", json!(self.env));
        }
        send(&mut replies, &started).await?;
        tracing::info!(worker = %self.id, "started");

        while let Some(line) = requests.next().await {
            let line = line.context("Failed to read from control channel")?;
            if line.trim().is_empty() {
                continue;
            }
            let request: Request = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring malformed request");
                    continue;
                }
            };
            tracing::debug!(cmd_id = %request.id, kind = %request.kind, "request");

            let stop = request.kind == RequestKind::Stop;
            for reply in self.handle(request).await {
                send(&mut replies, &reply).await?;
            }
            if stop {
                break;
            }
        }

        self.engine.close().await;
        tracing::info!(worker = %self.id, "stopped");
        Ok(())
    }

    async fn handle(&self, request: Request) -> Vec<Reply> {
        let Request { id, kind, jrql } = request;
        match kind {
            RequestKind::Status => vec![Reply::new(id, ReplyKind::Status).with_fields(self.engine.status().await)],
            RequestKind::Read => match self.engine.read(jrql.unwrap_or(Value::Null)).await {
                Ok(subjects) => {
                    let mut replies: Vec<_> = subjects
                        .into_iter()
                        .map(|subject| Reply::next(id.clone(), subject))
                        .collect();
                    replies.push(Reply::new(id, ReplyKind::Complete));
                    replies
                }
                Err(e) => vec![Reply::error(id, e)],
            },
            RequestKind::Write => match self.engine.write(jrql.unwrap_or(Value::Null)).await {
                Ok(()) => vec![Reply::new(id, ReplyKind::Complete)],
                Err(e) => vec![Reply::error(id, e)],
            },
            RequestKind::Stop => vec![Reply::new(id, ReplyKind::Stopped).with("@id", json!(self.id))],
            RequestKind::Other(kind) => vec![Reply::error(id, format!("No handler for {kind}"))],
        }
    }
}

async fn send<W>(replies: &mut FramedWrite<W, LinesCodec>, reply: &Reply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = serde_json::to_string(reply).context("Failed to encode reply")?;
    replies
        .send(frame)
        .await
        .context("Failed to write to control channel")
}
