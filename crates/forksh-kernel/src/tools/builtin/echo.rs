//! echo — Print arguments to stdout.

use std::io::Cursor;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::process::Process;
use crate::tools::{CmdContext, ParamSchema, Tool, ToolArgs, ToolSchema};

/// Echo tool: prints its arguments, space separated, with a newline.
pub struct Echo;

#[async_trait]
impl Tool for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("echo", "Print arguments to standard output")
            .param(ParamSchema::positional("words", "string", "Words to print"))
            .variadic()
            .example("Feed a subject to a worker", "echo '{\"@id\":\"fred\"}' > write")
    }

    async fn execute(&self, args: ToolArgs, _ctx: &mut CmdContext) -> Result<Option<Process>, DispatchError> {
        let mut output = args.positional.join(" ");
        output.push('\n');
        Ok(Some(Process::sync(Box::new(Cursor::new(output.into_bytes())))))
    }
}
