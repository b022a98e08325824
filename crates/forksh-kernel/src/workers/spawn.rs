//! Launching worker processes.
//!
//! ```text
//!   bind control socket ─▶ spawn child (FORKSH_CONTROL_SOCKET=path)
//!        │                    ├─ stdout/stderr ─▶ OutputTap pumps
//!        │                    └─ wait() ─▶ exit watch ─▶ ChildExited
//!        ▼
//!   startup task: accept │ exit
//!        │
//!        ▼  lifecycle frames
//!   started ─▶ register, merge env, completed
//!   error   ─▶ failed
//!   other   ─▶ message
//!   exit    ─▶ completed on success, failed otherwise
//! ```
//!
//! A program that never connects (plain `fork echo hi`) is supported: its
//! process simply ends with the child's exit.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Weak};

use forksh_types::{ReplyKind, CONTROL_SOCKET_ENV};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::channel::{ChannelEnd, ControlChannel};
use super::handle::{wait_exit, ExitWatch, OutputTap, WorkerExit, WorkerHandle, WorkerIo};
use super::registry::{RegistryEvent, WorkerRegistry};
use crate::error::{ProcessError, RegistryError};
use crate::process::{ByteStream, Process, ProcessControl};

/// Everything known about a child before it reports `started`.
struct PendingWorker {
    serial: u64,
    pid: Option<u32>,
    program: String,
    stdout: OutputTap,
    stderr: OutputTap,
    pumps: Vec<JoinHandle<()>>,
    exit: ExitWatch,
}

impl PendingWorker {
    fn register(self, id: &str, channel: Arc<ControlChannel>) -> WorkerHandle {
        let io = WorkerIo {
            pid: self.pid,
            program: self.program,
            channel,
            stdout: self.stdout,
            stderr: self.stderr,
            exit: self.exit,
        };
        WorkerHandle::new(id, self.serial, io)
    }
}

/// Spawn `program args...` as a worker.
///
/// The returned process streams the child's output until it is done: when
/// the worker reports `started`, fails to start, or exits.
pub(crate) async fn spawn_worker(
    registry: &Arc<WorkerRegistry>,
    program: &str,
    args: &[String],
    stdin: Option<ByteStream>,
) -> Result<Process, RegistryError> {
    let spawn_error = |reason: String| RegistryError::Spawn {
        program: program.to_string(),
        reason,
    };

    let serial = registry.next_serial();
    let control_dir = registry.control_dir();
    tokio::fs::create_dir_all(control_dir)
        .await
        .map_err(|e| spawn_error(format!("{}: {e}", control_dir.display())))?;
    let socket_path = control_dir.join(format!("{}-{serial}.sock", std::process::id()));
    // A stale socket from an earlier session with the same pid.
    let _ = tokio::fs::remove_file(&socket_path).await;
    let listener = UnixListener::bind(&socket_path)
        .map_err(|e| spawn_error(format!("{}: {e}", socket_path.display())))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(registry.env_snapshot())
        .env(CONTROL_SOCKET_ENV, &socket_path)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            let _ = tokio::fs::remove_file(&socket_path).await;
            return Err(spawn_error(err.to_string()));
        }
    };
    let pid = child.id();
    tracing::info!(program, ?args, ?pid, serial, "spawned worker");

    if let (Some(mut upstream), Some(mut child_stdin)) = (stdin, child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(err) = tokio::io::copy(&mut upstream, &mut child_stdin).await {
                tracing::debug!(%err, "worker stdin copy ended");
            }
        });
    }

    let (stdout, stdout_reader, stdout_pump) = OutputTap::start(child.stdout.take());
    let (stderr, stderr_reader, stderr_pump) = OutputTap::start(child.stderr.take());
    let exit = watch_exit(child, serial, Arc::downgrade(registry));

    let pending = PendingWorker {
        serial,
        pid,
        program: program.to_string(),
        stdout,
        stderr,
        pumps: vec![stdout_pump, stderr_pump],
        exit,
    };

    let (process, control) = Process::new(Some(stdout_reader), Some(stderr_reader));
    tokio::spawn(startup(
        Arc::downgrade(registry),
        listener,
        socket_path,
        pending,
        control,
    ));
    Ok(process)
}

/// Wait on the child and publish its exit.
fn watch_exit(mut child: Child, serial: u64, registry: Weak<WorkerRegistry>) -> ExitWatch {
    let (exit_tx, exit) = watch::channel(None);
    tokio::spawn(async move {
        let exited = match child.wait().await {
            Ok(status) => WorkerExit::from_status(status),
            Err(err) => WorkerExit::wait_failed(&err),
        };
        tracing::info!(serial, %exited, "worker exited");
        exit_tx.send_replace(Some(exited));
        if let Some(registry) = registry.upgrade() {
            registry.apply(RegistryEvent::ChildExited { serial });
        }
    });
    exit
}

async fn startup(
    registry: Weak<WorkerRegistry>,
    listener: UnixListener,
    socket_path: PathBuf,
    pending: PendingWorker,
    control: ProcessControl,
) {
    let mut exit = pending.exit.clone();
    let accepted = tokio::select! {
        accepted = listener.accept() => accepted.map(|(stream, _)| stream),
        exited = wait_exit(&mut exit) => {
            remove_socket(listener, &socket_path).await;
            // Never connected: the child's output is all there is.
            for pump in pending.pumps {
                let _ = pump.await;
            }
            finish_on_exit(&control, exited);
            return;
        }
    };
    remove_socket(listener, &socket_path).await;

    let stream = match accepted {
        Ok(stream) => stream,
        Err(err) => {
            control.fail(RegistryError::Spawn {
                program: pending.program.clone(),
                reason: format!("control socket accept failed: {err}"),
            });
            return;
        }
    };
    connected(registry, stream, pending, control).await;
}

async fn connected(
    registry: Weak<WorkerRegistry>,
    stream: UnixStream,
    pending: PendingWorker,
    control: ProcessControl,
) {
    let label = format!("{}#{}", pending.program, pending.serial);
    let (channel, mut lifecycle) = ControlChannel::attach(stream, label);
    let mut exit = pending.exit.clone();

    loop {
        tokio::select! {
            biased;
            frame = lifecycle.recv() => match frame {
                Ok(reply) => match reply.kind {
                    ReplyKind::Started => {
                        control.emit(reply.to_value());
                        let Some(registry) = registry.upgrade() else {
                            control.fail(ProcessError::Closed);
                            return;
                        };
                        match reply.worker_id() {
                            Some(id) => {
                                let handle = Arc::new(pending.register(id, channel));
                                let serial = handle.serial();
                                registry.apply(RegistryEvent::ChildStarted(handle.clone()));
                                // The exit watcher may have run before registration.
                                if handle.has_exited() {
                                    registry.apply(RegistryEvent::ChildExited { serial });
                                }
                            }
                            None => tracing::warn!("worker reported started without an @id; not registered"),
                        }
                        if let Some(env) = reply.env() {
                            registry.merge_env(env);
                        }
                        control.complete();
                        return;
                    }
                    ReplyKind::Error => {
                        let err = reply.err().unwrap_or_else(|| "worker failed to start".to_string());
                        control.fail(ProcessError::Remote(err));
                        return;
                    }
                    _ => control.emit(reply.to_value()),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "lifecycle frames lost");
                }
                // The channel owns a sender; closed means it is gone.
                Err(broadcast::error::RecvError::Closed) => break,
            },
            end = channel.ended() => match end {
                ChannelEnd::Error(reason) => {
                    control.fail(RegistryError::Disconnected(reason));
                    return;
                }
                ChannelEnd::Eof => break,
            },
            exited = wait_exit(&mut exit) => {
                // Frames sent just before exit are still in flight.
                while let Ok(reply) = lifecycle.try_recv() {
                    control.emit(reply.to_value());
                }
                finish_on_exit(&control, exited);
                return;
            }
        }
    }

    // Hung up without reporting; the exit decides.
    for pump in pending.pumps {
        let _ = pump.await;
    }
    let exited = wait_exit(&mut exit).await;
    finish_on_exit(&control, exited);
}

fn finish_on_exit(control: &ProcessControl, exited: WorkerExit) {
    if exited.success {
        control.complete();
    } else {
        control.fail(ProcessError::Exit(exited.description));
    }
}

async fn remove_socket(listener: UnixListener, path: &Path) {
    drop(listener);
    if let Err(err) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), %err, "control socket already gone");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn registry(dir: &tempfile::TempDir) -> Arc<WorkerRegistry> {
        Arc::new(WorkerRegistry::new(dir.path()))
    }

    #[tokio::test]
    async fn test_program_that_never_connects_ends_with_its_exit() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);

        let mut process = registry
            .spawn("sh", &["-c".into(), "echo hi".into()], None)
            .await
            .unwrap();
        let mut out = String::new();
        process.stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hi\n");
        assert_eq!(process.done.wait().await, Ok(()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_output_read_late_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);

        let mut process = registry
            .spawn("sh", &["-c".into(), "seq 1 200000".into()], None)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let mut out = String::new();
        process.stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out.lines().count(), 200_000);
        assert_eq!(out.lines().last(), Some("200000"));
        assert_eq!(process.done.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_failed_exit_fails_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);

        let process = registry
            .spawn("sh", &["-c".into(), "exit 3".into()], None)
            .await
            .unwrap();
        assert!(matches!(process.done.wait().await, Err(ProcessError::Exit(_))));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);

        let err = registry
            .spawn("/nonexistent/forksh-worker", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_stdin_is_fed_to_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir);

        let stdin: ByteStream = Box::new(&b"piped\n"[..]);
        let mut process = registry.spawn("cat", &[], Some(stdin)).await.unwrap();
        let mut out = String::new();
        process.stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "piped\n");
        assert_eq!(process.done.wait().await, Ok(()));
    }
}
