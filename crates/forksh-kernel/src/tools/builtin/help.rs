//! help, exit — Session commands that start no process.

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::process::Process;
use crate::tools::{CmdContext, ParamSchema, Tool, ToolArgs, ToolSchema};

/// Help tool: overall or per-command help, as user output.
pub struct Help;

#[async_trait]
impl Tool for Help {
    fn name(&self) -> &str {
        "help"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("help", "Show help for all commands or one command")
            .param(ParamSchema::positional("command", "string", "Command name"))
    }

    async fn execute(&self, args: ToolArgs, ctx: &mut CmdContext) -> Result<Option<Process>, DispatchError> {
        let text = match args.get_positional(0) {
            None => ctx.tools().overview(),
            Some(name) => ctx
                .tools()
                .get(name)
                .map(|tool| tool.schema().help())
                .ok_or_else(|| DispatchError::UnknownCommand(name.to_string()))?,
        };
        ctx.notice(text);
        Ok(None)
    }
}

/// Exit tool: ends the session once the turn is over.
pub struct Exit;

#[async_trait]
impl Tool for Exit {
    fn name(&self) -> &str {
        "exit"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("exit", "Stop all workers and leave")
    }

    async fn execute(&self, _args: ToolArgs, ctx: &mut CmdContext) -> Result<Option<Process>, DispatchError> {
        ctx.session.request_exit();
        Ok(None)
    }
}
