//! read — Stream a query result from a worker.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncReadExt;

use crate::error::{DispatchError, ProcessError};
use crate::process::{ByteStream, Process};
use crate::tools::{CmdContext, ParamSchema, Tool, ToolArgs, ToolSchema};
use crate::workers::stream_read;

/// Read tool: one streaming `read` exchange, one JSON line per subject.
pub struct Read;

#[async_trait]
impl Tool for Read {
    fn name(&self) -> &str {
        "read"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("read", "Read from a worker using json-rql")
            .param(ParamSchema::positional("jrql", "json", "Query in json-rql (TIP: use single quotes)"))
            .param(ParamSchema::optional("@id", "string", Value::Null, "The @id of the worker to read"))
            .example("Describe one subject", "read '{\"@describe\":\"fred\"}'")
            .example("Copy every subject to another worker", "read '{\"@describe\":\"?s\"}' --@id w1 > write --@id w2")
    }

    async fn execute(&self, args: ToolArgs, ctx: &mut CmdContext) -> Result<Option<Process>, DispatchError> {
        let given = args
            .get_positional(0)
            .map(|text| {
                serde_json::from_str::<Value>(text)
                    .map_err(|e| DispatchError::usage(format!("Invalid JSON for jrql: {e}")))
            })
            .transpose()?;
        let stdin = match given {
            Some(_) => None,
            None => Some(
                ctx.take_stdin()
                    .ok_or_else(|| DispatchError::usage("Missing required argument: jrql"))?,
            ),
        };

        let worker = ctx.worker(args.get_string("@id").as_deref(), "read")?;
        let channel = worker.channel().clone();
        let route = channel.route(ctx.cmd_id())?;

        let query = resolve_query(given, stdin);
        Ok(Some(Process::sync(Box::new(stream_read(channel, route, query)))))
    }
}

/// The query: as given, or the JSON read from stdin.
async fn resolve_query(given: Option<Value>, stdin: Option<ByteStream>) -> Result<Value, ProcessError> {
    if let Some(jrql) = given {
        return Ok(jrql);
    }
    let mut stdin = stdin.ok_or_else(|| ProcessError::Input("no query".to_string()))?;
    let mut text = String::new();
    stdin.read_to_string(&mut text).await?;
    serde_json::from_str(&text).map_err(|e| ProcessError::Input(format!("jrql from stdin: {e}")))
}
