//! Control channel — newline-delimited JSON frames over a byte stream.
//!
//! ```text
//!                 ┌───────────── writer task ─────────────┐
//!   send(Request) ─▶ mpsc ─▶ serde_json ─▶ FramedWrite<LinesCodec> ─▶ worker
//!
//!   worker ─▶ FramedRead<LinesCodec> ─▶ Reply ─┬─▶ route table[cmdId] ─▶ Route
//!                 └───── reader task ──────────┘   (none) ─▶ lifecycle broadcast
//! ```
//!
//! A route is registered for one correlation id before its request is sent,
//! and removed when the `Route` is dropped. Frames without a live route
//! (`started`, startup errors, chatter) go to the lifecycle broadcast. When
//! the stream ends every route is dropped, so pending exchanges observe the
//! disconnection instead of waiting forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use forksh_types::{CorrelationId, Reply, Request};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::error::RegistryError;

/// Unrouted frames buffered per lifecycle subscriber.
const LIFECYCLE_CAPACITY: usize = 64;

/// How the inbound side of a channel ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEnd {
    /// The worker closed its end cleanly.
    Eof,
    /// Reading failed.
    Error(String),
}

struct RouteTable {
    routes: HashMap<CorrelationId, mpsc::UnboundedSender<Reply>>,
    open: bool,
}

type SharedRoutes = Arc<Mutex<RouteTable>>;

fn lock(routes: &SharedRoutes) -> MutexGuard<'_, RouteTable> {
    routes.lock().unwrap_or_else(|e| e.into_inner())
}

/// One end of a host ↔ worker control channel.
pub struct ControlChannel {
    label: String,
    outbound: mpsc::UnboundedSender<Request>,
    routes: SharedRoutes,
    lifecycle: broadcast::Sender<Reply>,
    ended: watch::Receiver<Option<ChannelEnd>>,
}

impl ControlChannel {
    /// Start the reader and writer tasks over `io`.
    ///
    /// Returns the channel and a lifecycle receiver subscribed before the
    /// first frame is read, so no early frame is missed.
    pub fn attach<T>(io: T, label: impl Into<String>) -> (Arc<Self>, broadcast::Receiver<Reply>)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let label = label.into();
        let (read_half, write_half) = tokio::io::split(io);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (lifecycle, lifecycle_rx) = broadcast::channel(LIFECYCLE_CAPACITY);
        let (ended_tx, ended) = watch::channel(None);
        let routes: SharedRoutes = Arc::new(Mutex::new(RouteTable {
            routes: HashMap::new(),
            open: true,
        }));

        tokio::spawn(write_frames(write_half, outbound_rx, label.clone()));
        tokio::spawn(read_frames(
            read_half,
            routes.clone(),
            lifecycle.clone(),
            ended_tx,
            label.clone(),
        ));

        let channel = Arc::new(Self {
            label,
            outbound,
            routes,
            lifecycle,
            ended,
        });
        (channel, lifecycle_rx)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Register a route for `id`.
    pub fn route(&self, id: impl Into<CorrelationId>) -> Result<Route, RegistryError> {
        let id = id.into();
        let mut table = lock(&self.routes);
        if !table.open {
            return Err(RegistryError::Disconnected(self.label.clone()));
        }
        if table.routes.contains_key(&id) {
            return Err(RegistryError::DuplicateCorrelation(id));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        table.routes.insert(id.clone(), tx);
        Ok(Route {
            id,
            rx,
            routes: self.routes.clone(),
        })
    }

    /// Send a request frame.
    pub fn send(&self, request: Request) -> Result<(), RegistryError> {
        self.outbound
            .send(request)
            .map_err(|_| RegistryError::Disconnected(self.label.clone()))
    }

    /// Route, then send: the usual way to open an exchange.
    pub fn request(&self, request: Request) -> Result<Route, RegistryError> {
        let route = self.route(request.id.clone())?;
        self.send(request)?;
        Ok(route)
    }

    /// Receive frames that match no live route.
    pub fn subscribe(&self) -> broadcast::Receiver<Reply> {
        self.lifecycle.subscribe()
    }

    /// How the channel ended, if it has.
    pub fn end(&self) -> Option<ChannelEnd> {
        self.ended.borrow().clone()
    }

    /// Wait for the inbound side to end.
    pub async fn ended(&self) -> ChannelEnd {
        let mut ended = self.ended.clone();
        let end = match ended.wait_for(Option::is_some).await {
            Ok(end) => (*end).clone(),
            Err(_) => None,
        };
        end.unwrap_or(ChannelEnd::Eof)
    }

    /// Number of live routes.
    pub fn in_flight(&self) -> usize {
        lock(&self.routes).routes.len()
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("label", &self.label)
            .field("end", &self.end())
            .finish()
    }
}

/// Replies for one correlation id. Deregisters on drop.
pub struct Route {
    id: CorrelationId,
    rx: mpsc::UnboundedReceiver<Reply>,
    routes: SharedRoutes,
}

impl Route {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next reply; `None` once the channel has ended.
    pub async fn recv(&mut self) -> Option<Reply> {
        self.rx.recv().await
    }

    /// A reply that has already arrived.
    pub fn try_recv(&mut self) -> Option<Reply> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Route {
    fn drop(&mut self) {
        lock(&self.routes).routes.remove(&self.id);
    }
}

async fn write_frames<W>(write_half: W, mut outbound: mpsc::UnboundedReceiver<Request>, label: String)
where
    W: AsyncWrite + Send + Unpin,
{
    let mut sink = FramedWrite::new(write_half, LinesCodec::new());
    while let Some(request) = outbound.recv().await {
        let line = match serde_json::to_string(&request) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(worker = %label, %err, "unserializable request dropped");
                continue;
            }
        };
        tracing::debug!(worker = %label, id = %request.id, kind = %request.kind, "request");
        if let Err(err) = sink.send(line).await {
            tracing::error!(worker = %label, %err, "control channel write failed");
            break;
        }
    }
}

async fn read_frames<R>(
    read_half: R,
    routes: SharedRoutes,
    lifecycle: broadcast::Sender<Reply>,
    ended: watch::Sender<Option<ChannelEnd>>,
    label: String,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut frames = FramedRead::new(read_half, LinesCodec::new());
    let end = loop {
        match frames.next().await {
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Reply>(&line) {
                    Ok(reply) => dispatch_reply(&routes, &lifecycle, reply, &label),
                    Err(err) => tracing::warn!(worker = %label, %err, "malformed frame ignored"),
                }
            }
            Some(Err(err)) => {
                tracing::error!(worker = %label, %err, "control channel read failed");
                break ChannelEnd::Error(err.to_string());
            }
            None => break ChannelEnd::Eof,
        }
    };

    {
        let mut table = lock(&routes);
        table.open = false;
        table.routes.clear();
    }
    tracing::debug!(worker = %label, ?end, "control channel ended");
    let _ = ended.send(Some(end));
}

fn dispatch_reply(routes: &SharedRoutes, lifecycle: &broadcast::Sender<Reply>, reply: Reply, label: &str) {
    tracing::debug!(worker = %label, cmd_id = %reply.cmd_id, kind = %reply.kind, "reply");
    let unrouted = {
        let table = lock(routes);
        match table.routes.get(&reply.cmd_id) {
            Some(route) => route.send(reply).err().map(|e| e.0),
            None => Some(reply),
        }
    };
    if let Some(reply) = unrouted {
        if lifecycle.send(reply).is_err() {
            tracing::debug!(worker = %label, "unrouted frame with no listener");
        }
    }
}
