//! fork, start — Spawn workers.

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::process::Process;
use crate::tools::{CmdContext, ParamSchema, Tool, ToolArgs, ToolSchema};

/// Fork tool: spawn any program as a worker. Help belongs to the program.
pub struct Fork;

#[async_trait]
impl Tool for Fork {
    fn name(&self) -> &str {
        "fork"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("fork", "Spawn a program as a worker")
            .param(ParamSchema::required("program", "string", "Program to run"))
            .raw_args()
            .example("Start a worker from another build", "fork ./target/debug/forksh start --@id w2")
    }

    async fn execute(&self, args: ToolArgs, ctx: &mut CmdContext) -> Result<Option<Process>, DispatchError> {
        let (program, rest) = args
            .positional
            .split_first()
            .ok_or_else(|| DispatchError::usage("Missing required argument: program"))?;
        let stdin = ctx.take_stdin();
        let process = ctx.workers().spawn(program, rest, stdin).await?;
        Ok(Some(process))
    }
}

/// Start tool: spawn the configured worker program.
pub struct Start;

#[async_trait]
impl Tool for Start {
    fn name(&self) -> &str {
        "start"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("start", "Start a worker (run 'start --help' for its options)")
            .raw_args()
            .example("Start a worker with a chosen id", "start --@id w1")
    }

    async fn execute(&self, args: ToolArgs, ctx: &mut CmdContext) -> Result<Option<Process>, DispatchError> {
        let program = ctx
            .config()
            .worker_program()
            .map_err(|e| DispatchError::usage(format!("No worker program: {e:#}")))?;
        let mut argv = ctx.config().worker_args.clone();
        argv.extend(args.positional);

        let stdin = ctx.take_stdin();
        let program = program.to_string_lossy().into_owned();
        let process = ctx.workers().spawn(&program, &argv, stdin).await?;
        Ok(Some(process))
    }
}
