//! Worker registry.
//!
//! Tracks live workers by the id they report in `started`. The map is only
//! mutated through [`WorkerRegistry::apply`], driven by three events:
//!
//! ```text
//!   ChildStarted(handle)          → insert id → handle
//!   ChildExited { serial }        → remove, if still the same worker
//!   StopAcknowledged { serial }   → remove, if still the same worker
//! ```
//!
//! Removal is keyed by spawn serial so a late exit of an old worker never
//! evicts a newer worker that reused its id. Removals are idempotent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use forksh_types::{ReplyKind, Request, RequestKind, STOP_CMD_ID};
use futures::future::join_all;

use super::channel::Route;
use super::handle::{wait_exit, WorkerHandle};
use super::spawn::spawn_worker;
use crate::error::{ProcessError, RegistryError};
use crate::process::{ByteStream, Process, ProcessControl};

/// Something that changes the registry.
#[derive(Debug)]
pub enum RegistryEvent {
    ChildStarted(Arc<WorkerHandle>),
    ChildExited { serial: u64 },
    StopAcknowledged { serial: u64 },
}

/// Summary of a registered worker, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: String,
    pub pid: Option<u32>,
    pub program: String,
}

/// Live workers of one session.
pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, Arc<WorkerHandle>>>,
    env: Mutex<HashMap<String, String>>,
    control_dir: PathBuf,
    serials: AtomicU64,
}

impl WorkerRegistry {
    /// Create a registry whose control sockets live in `control_dir`.
    pub fn new(control_dir: impl Into<PathBuf>) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            env: Mutex::new(HashMap::new()),
            control_dir: control_dir.into(),
            serials: AtomicU64::new(1),
        }
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<String, Arc<WorkerHandle>>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn env(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.env.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn control_dir(&self) -> &Path {
        &self.control_dir
    }

    /// A fresh serial for a handle about to be registered.
    pub fn next_serial(&self) -> u64 {
        self.serials.fetch_add(1, Ordering::SeqCst)
    }

    /// Apply a registry event.
    pub fn apply(&self, event: RegistryEvent) {
        match event {
            RegistryEvent::ChildStarted(handle) => {
                let id = handle.id().to_string();
                tracing::info!(worker = %id, pid = ?handle.pid(), serial = handle.serial(), "worker registered");
                if let Some(previous) = self.workers().insert(id.clone(), handle) {
                    tracing::warn!(worker = %id, serial = previous.serial(), "replaced worker with the same id");
                }
            }
            RegistryEvent::ChildExited { serial } | RegistryEvent::StopAcknowledged { serial } => {
                let mut workers = self.workers();
                let before = workers.len();
                workers.retain(|_, handle| handle.serial() != serial);
                if workers.len() != before {
                    tracing::info!(serial, "worker removed");
                }
            }
        }
    }

    /// Look up a registered worker.
    pub fn get(&self, id: &str) -> Result<Arc<WorkerHandle>, RegistryError> {
        self.workers()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Decide which worker a command addresses.
    ///
    /// An explicit candidate must be registered. Without one, the only
    /// registered worker is the default; with none or several, the caller
    /// must name one.
    pub fn resolve_default_id(&self, candidate: Option<&str>, verb: &str) -> Result<String, RegistryError> {
        let workers = self.workers();
        if let Some(id) = candidate {
            return if workers.contains_key(id) {
                Ok(id.to_string())
            } else {
                Err(RegistryError::NotFound(id.to_string()))
            };
        }
        let mut ids = workers.keys();
        match (ids.next(), ids.next()) {
            (Some(id), None) => Ok(id.clone()),
            (None, _) => Err(RegistryError::Demand(format!("no worker is running to {verb}"))),
            (Some(_), Some(_)) => Err(RegistryError::Demand(format!(
                "{} workers are running; choose one to {verb}",
                workers.len()
            ))),
        }
    }

    /// Registered workers, ordered by id.
    pub fn list(&self) -> Vec<WorkerInfo> {
        let mut infos: Vec<_> = self
            .workers()
            .values()
            .map(|handle| WorkerInfo {
                id: handle.id().to_string(),
                pid: handle.pid(),
                program: handle.program().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn len(&self) -> usize {
        self.workers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers().is_empty()
    }

    /// Session environment passed to every spawned worker.
    pub fn env_snapshot(&self) -> HashMap<String, String> {
        self.env().clone()
    }

    /// Merge entries reported by a worker into the session environment.
    pub fn merge_env(&self, entries: HashMap<String, String>) {
        if entries.is_empty() {
            return;
        }
        tracing::debug!(keys = ?entries.keys().collect::<Vec<_>>(), "session environment updated");
        self.env().extend(entries);
    }

    /// Start a worker program. See [`spawn_worker`].
    pub async fn spawn(
        self: &Arc<Self>,
        program: &str,
        args: &[String],
        stdin: Option<ByteStream>,
    ) -> Result<Process, RegistryError> {
        spawn_worker(self, program, args, stdin).await
    }

    /// Stop a registered worker.
    ///
    /// The process carries the worker's remaining output, emits the
    /// `stopped` reply as a message and completes once the worker has
    /// exited. The worker is unregistered whether it acknowledges or just
    /// exits.
    pub fn stop(self: &Arc<Self>, id: &str) -> Result<Process, RegistryError> {
        let handle = self.get(id)?;
        Ok(self.stop_handle(handle))
    }

    fn stop_handle(self: &Arc<Self>, handle: Arc<WorkerHandle>) -> Process {
        let (process, control) = Process::new(Some(handle.stdout()), Some(handle.stderr()));
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let route = match handle
                .channel()
                .request(Request::new(STOP_CMD_ID, RequestKind::Stop))
            {
                Ok(route) => Some(route),
                // Already stopping or already gone; either way, wait for exit.
                Err(err) => {
                    tracing::debug!(worker = %handle.id(), %err, "stop request not sent");
                    None
                }
            };
            let outcome = drive_stop(&handle, route, &control, |event| {
                if let Some(registry) = registry.upgrade() {
                    registry.apply(event);
                }
            })
            .await;
            control.finish(outcome);
        });
        process
    }

    /// Stop every registered worker concurrently and wait for them to exit.
    pub async fn close_all(self: &Arc<Self>) {
        let handles: Vec<_> = self.workers().values().cloned().collect();
        if handles.is_empty() {
            return;
        }
        tracing::info!(count = handles.len(), "stopping all workers");
        let stops = handles.into_iter().map(|handle| {
            let id = handle.id().to_string();
            let process = self.stop_handle(handle);
            async move {
                if let Err(err) = process.done.wait().await {
                    tracing::warn!(worker = %id, %err, "worker did not stop cleanly");
                }
            }
        });
        join_all(stops).await;
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.list())
            .field("control_dir", &self.control_dir)
            .finish()
    }
}

async fn drive_stop<F>(
    handle: &WorkerHandle,
    route: Option<Route>,
    control: &ProcessControl,
    apply: F,
) -> Result<(), ProcessError>
where
    F: Fn(RegistryEvent),
{
    let serial = handle.serial();
    let mut exit = handle.exit_watch();

    // Replies keep arriving until the worker closes its end, which it does
    // on exit; the exit itself is awaited afterwards.
    if let Some(mut route) = route {
        while let Some(reply) = route.recv().await {
            match reply.kind {
                ReplyKind::Stopped => {
                    control.emit(reply.to_value());
                    apply(RegistryEvent::StopAcknowledged { serial });
                }
                ReplyKind::Error => {
                    let err = reply.err().unwrap_or_else(|| "stop refused".to_string());
                    return Err(ProcessError::Remote(err));
                }
                _ => control.emit(reply.to_value()),
            }
        }
    }

    let exited = wait_exit(&mut exit).await;
    tracing::debug!(worker = %handle.id(), %exited, "worker exited after stop");
    apply(RegistryEvent::ChildExited { serial });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::channel::ControlChannel;
    use crate::workers::handle::{OutputTap, WorkerExit, WorkerIo};
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::watch;

    /// Register an in-memory worker. It answers `stop` with `stopped` and
    /// then exits.
    fn fake_worker(registry: &WorkerRegistry, id: &str) -> watch::Sender<Option<WorkerExit>> {
        let (host, worker) = tokio::io::duplex(4096);
        let (channel, _lifecycle) = ControlChannel::attach(host, id);
        let (exit_tx, exit) = watch::channel(None);

        let worker_id = id.to_string();
        let exit_on_stop = exit_tx.clone();
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(worker);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Request = serde_json::from_str(&line).unwrap();
                if request.kind == RequestKind::Stop {
                    let frame = json!({"cmdId": request.id, "@type": "stopped", "@id": worker_id});
                    write.write_all(format!("{frame}\n").as_bytes()).await.unwrap();
                    exit_on_stop.send_replace(Some(WorkerExit {
                        success: true,
                        description: "exit status: 0".into(),
                    }));
                    return;
                }
            }
        });

        let serial = registry.next_serial();
        let io = WorkerIo {
            pid: None,
            program: "fake".into(),
            channel,
            stdout: OutputTap::closed(),
            stderr: OutputTap::closed(),
            exit,
        };
        registry.apply(RegistryEvent::ChildStarted(Arc::new(WorkerHandle::new(id, serial, io))));
        exit_tx
    }

    fn registry() -> Arc<WorkerRegistry> {
        Arc::new(WorkerRegistry::new(std::env::temp_dir()))
    }

    #[tokio::test]
    async fn test_default_id_resolution() {
        let registry = registry();
        assert_eq!(
            registry.resolve_default_id(None, "read"),
            Err(RegistryError::Demand("no worker is running to read".into()))
        );

        let _x = fake_worker(&registry, "X");
        assert_eq!(registry.resolve_default_id(None, "read"), Ok("X".into()));
        assert_eq!(registry.resolve_default_id(Some("X"), "read"), Ok("X".into()));
        assert_eq!(
            registry.resolve_default_id(Some("Y"), "read"),
            Err(RegistryError::NotFound("Y".into()))
        );

        let _y = fake_worker(&registry, "Y");
        assert!(matches!(
            registry.resolve_default_id(None, "read"),
            Err(RegistryError::Demand(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_unregisters_and_emits_stopped() {
        let registry = registry();
        let _exit = fake_worker(&registry, "w1");

        let mut process = registry.stop("w1").unwrap();
        assert_eq!(process.done.wait().await, Ok(()));
        assert_eq!(registry.get("w1").err(), Some(RegistryError::NotFound("w1".into())));

        let stopped = futures::StreamExt::next(&mut process.messages).await.unwrap();
        assert_eq!(stopped["@type"], json!("stopped"));
        assert_eq!(stopped["@id"], json!("w1"));
    }

    #[tokio::test]
    async fn test_stop_racing_exit_still_unregisters() {
        let registry = registry();
        let exit = fake_worker(&registry, "w1");
        // The worker dies on its own before the stop request is answered.
        exit.send_replace(Some(WorkerExit {
            success: false,
            description: "signal: 9 (SIGKILL)".into(),
        }));

        let process = registry.stop("w1").unwrap();
        assert_eq!(process.done.wait().await, Ok(()));
        assert!(registry.get("w1").is_err());
    }

    #[tokio::test]
    async fn test_removal_is_idempotent_and_serial_scoped() {
        let registry = registry();
        let _old = fake_worker(&registry, "w1");
        let old_serial = registry.get("w1").unwrap().serial();
        let _new = fake_worker(&registry, "w1");

        registry.apply(RegistryEvent::ChildExited { serial: old_serial });
        registry.apply(RegistryEvent::ChildExited { serial: old_serial });
        assert!(registry.get("w1").is_ok(), "newer worker with the same id survives");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_stops_everything() {
        let registry = registry();
        let _a = fake_worker(&registry, "a");
        let _b = fake_worker(&registry, "b");
        assert_eq!(registry.list().iter().map(|w| w.id.as_str()).collect::<Vec<_>>(), ["a", "b"]);

        registry.close_all().await;
        assert!(registry.is_empty());
    }

    #[test]
    fn test_env_merge() {
        let registry = WorkerRegistry::new(std::env::temp_dir());
        registry.merge_env(HashMap::from([("CLI_IO__URI".to_string(), "x".to_string())]));
        registry.merge_env(HashMap::from([("CLI_IO__URI".to_string(), "y".to_string())]));
        assert_eq!(registry.env_snapshot().get("CLI_IO__URI").map(String::as_str), Some("y"));
    }
}
