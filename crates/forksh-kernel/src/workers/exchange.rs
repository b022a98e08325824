//! Correlated exchanges over a control channel.
//!
//! Single-reply exchanges (`status`, `write`) resolve on one terminal frame.
//! Streaming exchanges (`read`) turn each `next` frame into one JSON line on
//! a pipe stream, end on `complete` and break the stream on `error`.

use std::future::Future;
use std::sync::Arc;

use forksh_types::{Reply, ReplyKind, Request, RequestKind};
use serde_json::Value;

use super::channel::{ControlChannel, Route};
use crate::error::{ProcessError, RegistryError};
use crate::scheduler::{pipe_stream_default, PipeReader, PipeWriter};

/// Wait for the frame that ends a single-reply exchange.
///
/// `expected` is the success kind (`status` for status, `complete` for
/// write). An `error` frame fails with its `err`; a closed route fails as a
/// disconnection. Other frames on the route are logged and skipped.
pub async fn await_terminal(route: &mut Route, expected: ReplyKind) -> Result<Reply, ProcessError> {
    loop {
        let Some(reply) = route.recv().await else {
            return Err(RegistryError::Disconnected(format!("no reply to {}", route.id())).into());
        };
        match reply.kind {
            ReplyKind::Error => return Err(remote_error(&reply)),
            ref kind if *kind == expected => return Ok(reply),
            ref kind => tracing::warn!(cmd_id = %route.id(), %kind, "unexpected frame ignored"),
        }
    }
}

/// Send one request and wait for its terminal frame.
pub async fn round_trip(
    channel: &ControlChannel,
    request: Request,
    expected: ReplyKind,
) -> Result<Reply, ProcessError> {
    let mut route = channel.request(request)?;
    await_terminal(&mut route, expected).await
}

/// Start a streaming `read` on an already registered route.
///
/// The query is prepared asynchronously (it may come from stdin); a
/// preparation failure breaks the output stream like a transport error.
/// Subjects are written as JSON lines; if the consumer drops the stream,
/// forwarding stops and the route is released. Nothing is sent to the worker.
pub fn stream_read<F>(channel: Arc<ControlChannel>, mut route: Route, query: F) -> PipeReader
where
    F: Future<Output = Result<Value, ProcessError>> + Send + 'static,
{
    let (writer, reader) = pipe_stream_default();
    tokio::spawn(async move {
        let jrql = match query.await {
            Ok(jrql) => jrql,
            Err(err) => {
                writer.fail(err.into());
                return;
            }
        };
        let request = Request::new(route.id(), RequestKind::Read).with_jrql(jrql);
        if let Err(err) = channel.send(request) {
            writer.fail(ProcessError::from(err).into());
            return;
        }
        let outcome = forward_subjects(&mut route, &writer).await;
        drop(route);
        if let Err(err) = outcome {
            writer.fail(err.into());
        }
    });
    reader
}

/// Copy `next` subjects to `writer` until the exchange ends.
///
/// A consumer that hangs up ends the exchange quietly.
async fn forward_subjects(route: &mut Route, writer: &PipeWriter) -> Result<(), ProcessError> {
    loop {
        let Some(reply) = route.recv().await else {
            let err = RegistryError::Disconnected(format!("read {} interrupted", route.id()));
            return Err(err.into());
        };
        match reply.kind {
            ReplyKind::Next => {
                let subject = reply.subject().cloned().unwrap_or(Value::Null);
                let line = format!("{subject}\n");
                if writer.write_all_bytes(line.as_bytes()).await.is_err() {
                    tracing::debug!(cmd_id = %route.id(), "read output dropped; forwarding stopped");
                    return Ok(());
                }
            }
            ReplyKind::Complete => return Ok(()),
            ReplyKind::Error => return Err(remote_error(&reply)),
            kind => tracing::warn!(cmd_id = %route.id(), %kind, "unexpected frame in read"),
        }
    }
}

fn remote_error(reply: &Reply) -> ProcessError {
    ProcessError::Remote(reply.err().unwrap_or_else(|| "unspecified worker error".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// A scripted worker: answers each request id with the given frames.
    fn scripted(worker: DuplexStream, script: fn(&Request) -> Vec<Value>) {
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(worker);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Request = serde_json::from_str(&line).unwrap();
                for frame in script(&request) {
                    write.write_all(format!("{frame}\n").as_bytes()).await.unwrap();
                }
            }
        });
    }

    fn connect(script: fn(&Request) -> Vec<Value>) -> Arc<ControlChannel> {
        let (host, worker) = tokio::io::duplex(4096);
        let (channel, _lifecycle) = ControlChannel::attach(host, "w1");
        scripted(worker, script);
        channel
    }

    #[tokio::test]
    async fn test_read_streams_one_line_per_subject() {
        let channel = connect(|req| {
            vec![
                json!({"cmdId": req.id, "@type": "next", "subject": {"@id": "a"}}),
                json!({"cmdId": req.id, "@type": "next", "subject": {"@id": "b"}}),
                json!({"cmdId": req.id, "@type": "complete"}),
            ]
        });
        let route = channel.route("5").unwrap();
        let mut reader = stream_read(channel.clone(), route, async { Ok(json!({"@describe": "?s"})) });

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "{\"@id\":\"a\"}\n{\"@id\":\"b\"}\n");
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_read_error_breaks_stream() {
        let channel = connect(|req| {
            vec![
                json!({"cmdId": req.id, "@type": "next", "subject": 1}),
                json!({"cmdId": req.id, "@type": "error", "err": "bad query"}),
            ]
        });
        let route = channel.route("6").unwrap();
        let reader = stream_read(channel, route, async { Ok(json!({})) });

        let mut lines = BufReader::new(reader).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("1"));
        let err = lines.next_line().await.unwrap_err();
        assert_eq!(ProcessError::from(err), ProcessError::Remote("bad query".into()));
    }

    #[tokio::test]
    async fn test_failed_preparation_fails_the_stream() {
        let channel = connect(|_| Vec::new());
        let route = channel.route("7").unwrap();
        let mut reader = stream_read(channel, route, async {
            Err(ProcessError::Input("stdin is not JSON".into()))
        });

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(ProcessError::from(err), ProcessError::Input("stdin is not JSON".into()));
    }

    #[tokio::test]
    async fn test_single_reply_exchanges() {
        let channel = connect(|req| match req.kind {
            RequestKind::Status => vec![json!({"cmdId": req.id, "@type": "status", "online": true})],
            RequestKind::Write => vec![json!({"cmdId": req.id, "@type": "complete"})],
            _ => vec![json!({"cmdId": req.id, "@type": "error", "err": "No handler for it"})],
        });

        let status = round_trip(&channel, Request::new("1", RequestKind::Status), ReplyKind::Status)
            .await
            .unwrap();
        assert_eq!(status.body["online"], json!(true));

        let write = Request::new("2-1", RequestKind::Write).with_jrql(json!({"@id": "x"}));
        assert!(round_trip(&channel, write, ReplyKind::Complete).await.is_ok());

        let odd = Request::new("3", RequestKind::Other("frob".into()));
        assert_eq!(
            round_trip(&channel, odd, ReplyKind::Complete).await,
            Err(ProcessError::Remote("No handler for it".into()))
        );
    }
}
