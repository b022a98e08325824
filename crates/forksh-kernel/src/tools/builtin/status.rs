//! status — Ask a worker for its status.

use async_trait::async_trait;
use forksh_types::{ReplyKind, Request, RequestKind};
use serde_json::Value;

use crate::error::DispatchError;
use crate::process::Process;
use crate::tools::{CmdContext, ParamSchema, Tool, ToolArgs, ToolSchema};
use crate::workers::await_terminal;

/// Status tool: one `status` exchange, the reply emitted as a message.
pub struct Status;

#[async_trait]
impl Tool for Status {
    fn name(&self) -> &str {
        "status"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("status", "Interrogate the status of a worker")
            .param(ParamSchema::optional("@id", "string", Value::Null, "The @id of the worker to interrogate"))
    }

    async fn execute(&self, args: ToolArgs, ctx: &mut CmdContext) -> Result<Option<Process>, DispatchError> {
        let worker = ctx.worker(args.get_string("@id").as_deref(), "query")?;
        let mut route = worker
            .channel()
            .request(Request::new(ctx.cmd_id(), RequestKind::Status))?;

        let (process, control) = Process::new(None, None);
        tokio::spawn(async move {
            match await_terminal(&mut route, ReplyKind::Status).await {
                Ok(reply) => {
                    control.emit(reply.to_value());
                    control.complete();
                }
                Err(err) => {
                    control.fail(err);
                }
            }
        });
        Ok(Some(process))
    }
}
