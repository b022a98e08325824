//! Pipeline executor.
//!
//! Walks a `PipelineNode`, dispatching each leaf and composing the running
//! stages into one aggregate process. Stages run concurrently; bytes flow
//! between them through the streams themselves, so backpressure is whatever
//! the upstream stream provides.

use futures::future::{self, BoxFuture};
use futures::stream::{self, StreamExt};
use tokio_util::io::{ReaderStream, StreamReader};

use crate::ast::PipelineNode;
use crate::dispatch::CommandDispatcher;
use crate::error::DispatchError;
use crate::process::{empty_stream, ByteStream, Process, ProcessControl};

/// Execute a pipeline tree.
///
/// Returns `None` when nothing was started (e.g. `help`). Dispatch errors
/// abort the whole walk; stages already started are dropped with it.
pub fn execute<'a>(
    node: &'a PipelineNode,
    dispatcher: &'a dyn CommandDispatcher,
    stdin: Option<ByteStream>,
) -> BoxFuture<'a, Result<Option<Process>, DispatchError>> {
    Box::pin(async move {
        match node {
            PipelineNode::Leaf(args) => dispatcher.dispatch(args, stdin).await,
            PipelineNode::Pipe { left, right } => {
                let Some(left) = execute(left, dispatcher, stdin).await? else {
                    tracing::debug!("left stage started nothing; right stage runs without stdin");
                    return execute(right, dispatcher, None).await;
                };
                let Process {
                    stdout,
                    stderr,
                    messages,
                    done,
                } = left;
                let upstream = Process {
                    stdout: empty_stream(),
                    stderr,
                    messages,
                    done,
                };
                match execute(right, dispatcher, Some(stdout)).await? {
                    Some(right) => Ok(Some(compose(upstream, right))),
                    // The right stage took the stream and started nothing.
                    None => Ok(Some(upstream)),
                }
            }
        }
    })
}

/// Compose two running stages. `left.stdout` is ignored; it has already
/// been handed to the right stage.
pub fn compose(left: Process, right: Process) -> Process {
    let stderr = stream::select(ReaderStream::new(left.stderr), ReaderStream::new(right.stderr));
    let messages = stream::select(left.messages, right.messages).boxed();

    let (control, done, _) = ProcessControl::new();
    let (left_done, right_done) = (left.done, right.done);
    tokio::spawn(async move {
        match future::try_join(left_done.wait(), right_done.wait()).await {
            Ok(_) => control.complete(),
            Err(err) => control.fail(err),
        };
    });

    Process {
        stdout: right.stdout,
        stderr: Box::new(StreamReader::new(stderr)),
        messages,
        done,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use crate::parser::parse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

    /// Test dispatcher: `emit <words>` is a sync process, `upper` uppercases
    /// its stdin, `noisy <msg>` writes to stderr and emits a message, `fail`
    /// fails after draining stdin, `quiet` starts nothing.
    #[derive(Default)]
    struct Fixture {
        seen: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl CommandDispatcher for Fixture {
        async fn dispatch(
            &self,
            args: &[String],
            stdin: Option<ByteStream>,
        ) -> Result<Option<Process>, DispatchError> {
            self.seen.lock().unwrap().push((args[0].clone(), stdin.is_some()));
            match args[0].as_str() {
                "emit" => {
                    let text = format!("{}\n", args[1..].join(" "));
                    Ok(Some(Process::sync(Box::new(std::io::Cursor::new(text.into_bytes())))))
                }
                "upper" => {
                    let mut input = stdin.expect("upper needs stdin");
                    let mut text = String::new();
                    input.read_to_string(&mut text).await.unwrap();
                    let bytes = text.to_uppercase().into_bytes();
                    Ok(Some(Process::sync(Box::new(std::io::Cursor::new(bytes)))))
                }
                "noisy" => {
                    let err = format!("{}\n", args[1]);
                    let (process, control) =
                        Process::new(None, Some(Box::new(std::io::Cursor::new(err.into_bytes()))));
                    control.emit(json!({ "from": args[1] }));
                    control.complete();
                    Ok(Some(process))
                }
                "fail" => Ok(Some(Process::sink(async {
                    Err(ProcessError::Remote("stage failed".into()))
                }))),
                "quiet" => Ok(None),
                other => Err(DispatchError::UnknownCommand(other.to_string())),
            }
        }
    }

    async fn run(line: &str) -> Result<Option<Process>, DispatchError> {
        let node = parse(line).unwrap().unwrap();
        execute(&node, &Fixture::default(), None).await
    }

    async fn lines(stream: ByteStream) -> Vec<String> {
        let mut lines = BufReader::new(stream).lines();
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn test_right_stage_reads_left_output() {
        let process = run("emit hello world > upper").await.unwrap().unwrap();
        let done = process.done.clone();
        assert_eq!(lines(process.stdout).await, ["HELLO WORLD"]);
        assert_eq!(done.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_stderr_and_messages_are_merged() {
        let process = run("noisy left > noisy right").await.unwrap().unwrap();
        let mut stderr = lines(process.stderr).await;
        stderr.sort();
        assert_eq!(stderr, ["left", "right"]);

        let mut messages: Vec<_> = process.messages.take(2).collect().await;
        messages.sort_by_key(|m| m["from"].to_string());
        assert_eq!(messages, vec![json!({"from": "left"}), json!({"from": "right"})]);
        assert_eq!(process.done.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_either_failure_fails_the_pipe() {
        let process = run("emit x > fail").await.unwrap().unwrap();
        assert_eq!(process.done.wait().await, Err(ProcessError::Remote("stage failed".into())));

        let process = run("fail > upper").await.unwrap().unwrap();
        assert_eq!(process.done.wait().await, Err(ProcessError::Remote("stage failed".into())));
    }

    #[tokio::test]
    async fn test_dispatch_error_aborts_walk() {
        let err = run("emit x > nope > upper").await.unwrap_err();
        assert_eq!(err, DispatchError::UnknownCommand("nope".into()));
    }

    #[tokio::test]
    async fn test_quiet_left_stage_gives_no_stdin() {
        let fixture = Fixture::default();
        let node = parse("quiet > emit after").unwrap().unwrap();
        let process = execute(&node, &fixture, None).await.unwrap().unwrap();
        assert_eq!(lines(process.stdout).await, ["after"]);
        assert_eq!(
            *fixture.seen.lock().unwrap(),
            [("quiet".to_string(), false), ("emit".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_grouping_does_not_change_results() {
        for line in ["emit a > upper > upper", "(emit a > upper) > upper"] {
            let process = run(line).await.unwrap().unwrap();
            let done = process.done.clone();
            assert_eq!(lines(process.stdout).await, ["A"], "{line}");
            assert_eq!(done.wait().await, Ok(()), "{line}");
        }
    }
}
