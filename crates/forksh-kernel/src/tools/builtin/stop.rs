//! stop — Stop a worker.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DispatchError;
use crate::process::Process;
use crate::tools::{CmdContext, ParamSchema, Tool, ToolArgs, ToolSchema};

/// Stop tool: the worker's remaining output, then its exit.
pub struct Stop;

#[async_trait]
impl Tool for Stop {
    fn name(&self) -> &str {
        "stop"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("stop", "Stop a worker process")
            .param(ParamSchema::optional("@id", "string", Value::Null, "The @id of the worker to stop"))
    }

    async fn execute(&self, args: ToolArgs, ctx: &mut CmdContext) -> Result<Option<Process>, DispatchError> {
        let id = ctx
            .workers()
            .resolve_default_id(args.get_string("@id").as_deref(), "stop")?;
        Ok(Some(ctx.workers().stop(&id)?))
    }
}
