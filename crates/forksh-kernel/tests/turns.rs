//! Whole turns against in-memory workers.
//!
//! Each worker is a scripted task on the far end of a duplex stream,
//! registered the same way a spawned worker is once it reports `started`.

use std::sync::{Arc, Mutex};

use forksh_kernel::workers::{ControlChannel, OutputTap, RegistryEvent, WorkerExit, WorkerHandle, WorkerIo};
use forksh_kernel::{Kernel, KernelConfig, ProcessError, WorkerRegistry};
use forksh_types::{Reply, ReplyKind, Request, RequestKind};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;

/// Requests a scripted worker has received.
type Journal = Arc<Mutex<Vec<Request>>>;

/// Register a worker that knows two subjects, acknowledges writes, fails
/// reads of `{"fail": ...}` and exits when stopped.
fn scripted_worker(registry: &WorkerRegistry, id: &str) -> Journal {
    let (host, worker) = tokio::io::duplex(64 * 1024);
    let (channel, _lifecycle) = ControlChannel::attach(host, id);
    let (exit_tx, exit) = watch::channel(None);
    let journal = Journal::default();

    let worker_id = id.to_string();
    let seen = journal.clone();
    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(worker);
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Request = serde_json::from_str(&line).unwrap();
            seen.lock().unwrap().push(request.clone());
            let id = request.id.clone();
            let replies = match request.kind {
                RequestKind::Status => vec![Reply::new(id, ReplyKind::Status).with("online", json!(true))],
                RequestKind::Read if request.jrql.as_ref().and_then(|q| q.get("fail")).is_some() => {
                    vec![Reply::error(id, "bad query")]
                }
                RequestKind::Read => vec![
                    Reply::next(id.clone(), json!({"@id": "fred", "name": "Fred"})),
                    Reply::next(id.clone(), json!({"@id": "wilma", "name": "Wilma"})),
                    Reply::new(id, ReplyKind::Complete),
                ],
                RequestKind::Write => vec![Reply::new(id, ReplyKind::Complete)],
                RequestKind::Stop => vec![Reply::new(id, ReplyKind::Stopped).with("@id", json!(worker_id))],
                RequestKind::Other(ref kind) => vec![Reply::error(id, format!("No handler for {kind}"))],
            };
            for reply in replies {
                let frame = serde_json::to_string(&reply).unwrap();
                write.write_all(format!("{frame}\n").as_bytes()).await.unwrap();
            }
            if request.kind == RequestKind::Stop {
                exit_tx.send_replace(Some(WorkerExit {
                    success: true,
                    description: "exit status: 0".into(),
                }));
                return;
            }
        }
    });

    let io = WorkerIo {
        pid: None,
        program: "scripted".into(),
        channel,
        stdout: OutputTap::closed(),
        stderr: OutputTap::closed(),
        exit,
    };
    let handle = WorkerHandle::new(id, registry.next_serial(), io);
    registry.apply(RegistryEvent::ChildStarted(Arc::new(handle)));
    journal
}

fn kernel() -> Kernel {
    let config = KernelConfig {
        control_dir: Some(std::env::temp_dir().join("forksh-test")),
        ..KernelConfig::default()
    };
    Kernel::new(config)
}

async fn run(kernel: &Kernel, line: &str) -> (Vec<String>, Vec<String>, Result<(), ProcessError>) {
    let (mut out, mut err) = (Vec::new(), Vec::new());
    let result = kernel
        .execute_line(line, |l| out.push(l.to_string()), |l| err.push(l.to_string()))
        .await;
    (out, err, result)
}

fn parse_lines(lines: &[String]) -> Vec<Value> {
    lines.iter().map(|l| serde_json::from_str(l).unwrap()).collect()
}

#[tokio::test]
async fn status_reply_is_a_message() {
    let kernel = kernel();
    let journal = scripted_worker(kernel.workers(), "w1");

    let (out, _, result) = run(&kernel, "status").await;
    assert_eq!(result, Ok(()));
    assert_eq!(
        parse_lines(&out),
        vec![json!({"cmdId": "1", "@type": "status", "online": true})]
    );
    assert_eq!(journal.lock().unwrap()[0], Request::new("1", RequestKind::Status));
}

#[tokio::test]
async fn read_streams_subjects_in_order() {
    let kernel = kernel();
    let journal = scripted_worker(kernel.workers(), "w1");

    let (out, err, result) = run(&kernel, r#"read '{"@describe": "?s"}'"#).await;
    assert_eq!(result, Ok(()));
    assert!(err.is_empty());
    assert_eq!(
        parse_lines(&out),
        vec![json!({"@id": "fred", "name": "Fred"}), json!({"@id": "wilma", "name": "Wilma"})]
    );
    assert_eq!(
        journal.lock().unwrap()[0],
        Request::new("1", RequestKind::Read).with_jrql(json!({"@describe": "?s"}))
    );
}

#[tokio::test]
async fn read_query_from_stdin() {
    let kernel = kernel();
    let journal = scripted_worker(kernel.workers(), "w1");

    let (out, _, result) = run(&kernel, r#"echo '{"@describe": "fred"}' > read --@id w1"#).await;
    assert_eq!(result, Ok(()));
    assert_eq!(out.len(), 2);
    assert_eq!(journal.lock().unwrap()[0].jrql, Some(json!({"@describe": "fred"})));
}

#[tokio::test]
async fn read_error_fails_the_turn() {
    let kernel = kernel();
    scripted_worker(kernel.workers(), "w1");

    let (out, _, result) = run(&kernel, r#"read '{"fail": true}'"#).await;
    assert!(out.is_empty());
    assert_eq!(result, Err(ProcessError::Remote("bad query".into())));
}

#[tokio::test]
async fn write_completes_after_acknowledgement() {
    let kernel = kernel();
    let journal = scripted_worker(kernel.workers(), "w1");

    let (_, _, result) = run(&kernel, r#"echo '{"@id":1}' > write"#).await;
    assert_eq!(result, Ok(()));
    let requests = journal.lock().unwrap().clone();
    assert_eq!(requests, vec![Request::new("1-1", RequestKind::Write).with_jrql(json!({"@id": 1}))]);
}

#[tokio::test]
async fn read_piped_into_write_on_another_worker() {
    let kernel = kernel();
    scripted_worker(kernel.workers(), "source");
    let sink = scripted_worker(kernel.workers(), "sink");

    let (_, _, result) = run(&kernel, "read '\"?s\"' --@id source > write --@id sink").await;
    assert_eq!(result, Ok(()));
    let ids: Vec<_> = sink.lock().unwrap().iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec!["1-1", "1-2"]);
}

#[tokio::test]
async fn generated_subjects_are_written_one_by_one() {
    let kernel = kernel();
    let journal = scripted_worker(kernel.workers(), "w1");

    let (_, _, result) = run(&kernel, r#"fake '{"@id": "s{{index}}"}' --count 3 > write"#).await;
    assert_eq!(result, Ok(()));
    let writes: Vec<_> = journal.lock().unwrap().iter().map(|r| r.jrql.clone().unwrap()).collect();
    assert_eq!(writes, vec![json!({"@id": "s0"}), json!({"@id": "s1"}), json!({"@id": "s2"})]);
}

#[tokio::test]
async fn two_workers_need_an_id() {
    let kernel = kernel();
    scripted_worker(kernel.workers(), "a");
    scripted_worker(kernel.workers(), "b");

    let (out, _, result) = run(&kernel, "status").await;
    assert_eq!(result, Ok(()));
    assert_eq!(out, vec!["Missing required argument: @id (2 workers are running; choose one to query)"]);

    let (out, _, result) = run(&kernel, "status --@id c").await;
    assert_eq!(result, Ok(()));
    assert_eq!(out, vec!["Process c not found"]);
}

#[tokio::test]
async fn stop_removes_the_worker() {
    let kernel = kernel();
    scripted_worker(kernel.workers(), "w1");

    let (out, _, result) = run(&kernel, "stop").await;
    assert_eq!(result, Ok(()));
    assert_eq!(parse_lines(&out), vec![json!({"cmdId": "stop", "@type": "stopped", "@id": "w1"})]);
    assert!(kernel.workers().is_empty());

    let (out, _, _) = run(&kernel, "workers").await;
    assert_eq!(out, vec!["(no workers)"]);
}

#[tokio::test]
async fn exit_stops_every_worker() {
    let kernel = kernel();
    let a = scripted_worker(kernel.workers(), "a");
    let b = scripted_worker(kernel.workers(), "b");

    assert_eq!(run(&kernel, "exit").await.2, Ok(()));
    assert!(kernel.is_closed());
    assert!(kernel.workers().is_empty());
    for journal in [a, b] {
        assert_eq!(journal.lock().unwrap().last().map(|r| r.kind.clone()), Some(RequestKind::Stop));
    }
}
