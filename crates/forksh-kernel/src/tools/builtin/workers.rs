//! workers — List registered workers.

use std::io::Cursor;

use async_trait::async_trait;

use crate::error::DispatchError;
use crate::process::Process;
use crate::tools::{CmdContext, Tool, ToolArgs, ToolSchema};

/// Workers tool: one line per registered worker.
pub struct Workers;

#[async_trait]
impl Tool for Workers {
    fn name(&self) -> &str {
        "workers"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("workers", "List running workers")
    }

    async fn execute(&self, _args: ToolArgs, ctx: &mut CmdContext) -> Result<Option<Process>, DispatchError> {
        let workers = ctx.workers().list();
        let mut output = String::new();
        if workers.is_empty() {
            output.push_str("(no workers)\n");
        }
        for worker in workers {
            let pid = worker.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
            output.push_str(&format!("{}\t{}\t{}\n", worker.id, pid, worker.program));
        }
        Ok(Some(Process::sync(Box::new(Cursor::new(output.into_bytes())))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::testing::make_ctx;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_no_workers() {
        let mut ctx = make_ctx();
        let mut process = Workers.execute(ToolArgs::new(), &mut ctx).await.unwrap().unwrap();
        let mut out = String::new();
        process.stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "(no workers)\n");
    }
}
