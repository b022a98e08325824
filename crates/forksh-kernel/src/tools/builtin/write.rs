//! write — Send updates to a worker.
//!
//! Input is JSON text, from the argument or from stdin (which may hold
//! several concatenated values, e.g. the JSON lines of a `read`). `--path`
//! picks the items to write from each value:
//!
//! ```text
//!   *          each element of a top-level array; a non-array is one item
//!   . or $     the whole value
//!   a.b.*      each element of the array at a.b
//! ```
//!
//! Input is decoded as it arrives, and each item is written as soon as it is
//! complete: with `*`, the elements of a streamed array go out one by one
//! before the closing bracket is seen. Items are written one exchange at a
//! time, ids `"<turn>-<n>"`; the process completes once every item is
//! acknowledged and the input has ended.

use std::sync::Arc;

use async_trait::async_trait;
use forksh_types::{ReplyKind, Request, RequestKind};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};

use crate::error::{DispatchError, ProcessError};
use crate::process::{ByteStream, Process};
use crate::tools::{CmdContext, ParamSchema, Tool, ToolArgs, ToolSchema, Turn};
use crate::workers::{round_trip, ControlChannel};

/// Write tool: a sink over sequential `write` exchanges.
pub struct Write;

#[async_trait]
impl Tool for Write {
    fn name(&self) -> &str {
        "write"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("write", "Write to a worker using json-rql")
            .param(ParamSchema::positional("jrql", "json", "Update in json-rql (TIP: use single quotes)"))
            .param(ParamSchema::optional("@id", "string", Value::Null, "The @id of the worker to write to"))
            .param(ParamSchema::optional("path", "string", json!("*"), "Path to the items in the input"))
            .example("Insert a subject", "write '{\"@id\":\"fred\",\"name\":\"Fred\"}'")
            .example("Write generated subjects", "fake '{\"@id\":\"{{datatype.uuid}}\"}' --count 5 > write")
    }

    async fn execute(&self, args: ToolArgs, ctx: &mut CmdContext) -> Result<Option<Process>, DispatchError> {
        let path = args.get_string("path").unwrap_or_else(|| "*".to_string());
        let input: ByteStream = match args.get_positional(0) {
            Some(text) => Box::new(std::io::Cursor::new(wrap_array(text).into_bytes())),
            None => ctx
                .take_stdin()
                .ok_or_else(|| DispatchError::usage("Missing required argument: jrql"))?,
        };

        let worker = ctx.worker(args.get_string("@id").as_deref(), "write")?;
        let channel = worker.channel().clone();
        let turn = ctx.turn.clone();
        Ok(Some(Process::sink(write_all(channel, turn, input, path))))
    }
}

/// A single argument value is written as one item.
fn wrap_array(text: &str) -> String {
    let text = text.trim();
    if text.starts_with('[') {
        text.to_string()
    } else {
        format!("[{text}]")
    }
}

async fn write_all(channel: Arc<ControlChannel>, turn: Arc<Turn>, input: ByteStream, path: String) -> Result<(), ProcessError> {
    let spread = path.trim() == "*";
    let mut values = FramedRead::new(input, JsonItems::new(spread));

    let mut written = 0usize;
    while let Some(value) = values.next().await {
        let items = if spread { vec![value?] } else { select(value?, &path)? };
        for item in items {
            let request = Request::new(turn.next_sub_id(), RequestKind::Write).with_jrql(item);
            round_trip(&channel, request, ReplyKind::Complete).await?;
            written += 1;
        }
    }
    tracing::debug!(turn = %turn.id(), written, "write complete");
    Ok(())
}

/// Incremental decoder for concatenated JSON values.
///
/// With `spread`, a top-level array is opened and its elements are decoded
/// one at a time; other top-level values are yielded whole.
#[derive(Debug)]
struct JsonItems {
    spread: bool,
    in_array: bool,
}

impl JsonItems {
    fn new(spread: bool) -> Self {
        Self { spread, in_array: false }
    }

    fn next_value(&mut self, src: &mut BytesMut, eof: bool) -> Result<Option<Value>, ProcessError> {
        loop {
            let blank = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
            src.advance(blank);
            match src.first() {
                None => return Ok(None),
                Some(b'[') if self.spread && !self.in_array => self.in_array = true,
                Some(b']') if self.in_array => self.in_array = false,
                Some(b',') if self.in_array => {}
                Some(_) => break,
            }
            src.advance(1);
        }

        let (parsed, used) = {
            let mut values = serde_json::Deserializer::from_slice(&src[..]).into_iter::<Value>();
            let parsed = values.next();
            (parsed, values.byte_offset())
        };
        match parsed {
            // A number at the end of the buffer may continue in the next chunk.
            Some(Ok(value)) if value.is_number() && used == src.len() && !eof => Ok(None),
            Some(Ok(value)) => {
                src.advance(used);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() && !eof => Ok(None),
            Some(Err(e)) => Err(ProcessError::Input(format!("invalid JSON: {e}"))),
            None => Ok(None),
        }
    }
}

impl Decoder for JsonItems {
    type Item = Value;
    type Error = ProcessError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, ProcessError> {
        self.next_value(src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Value>, ProcessError> {
        match self.next_value(src, true)? {
            Some(value) => Ok(Some(value)),
            None if self.in_array => Err(ProcessError::Input("invalid JSON: unterminated array".into())),
            None => Ok(None),
        }
    }
}

/// Pick the items at `path` in `value`.
fn select(value: Value, path: &str) -> Result<Vec<Value>, ProcessError> {
    let path = path.trim();
    if matches!(path, "." | "$" | "") {
        return Ok(vec![value]);
    }

    let mut segments: Vec<&str> = path
        .trim_start_matches('$')
        .split('.')
        .filter(|s| !s.is_empty())
        .collect();
    let spread = segments.last() == Some(&"*");
    if spread {
        segments.pop();
    }

    let mut current = value;
    for segment in segments {
        current = match current {
            Value::Object(mut map) => map.remove(segment),
            Value::Array(mut items) => segment
                .parse::<usize>()
                .ok()
                .filter(|i| *i < items.len())
                .map(|i| items.swap_remove(i)),
            _ => None,
        }
        .ok_or_else(|| ProcessError::Input(format!("nothing at {segment} in path {path}")))?;
    }

    Ok(match current {
        Value::Array(items) if spread => items,
        other => vec![other],
    })
}
