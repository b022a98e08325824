//! file — Read a file, or write stdin to it.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{DispatchError, ProcessError};
use crate::process::Process;
use crate::tools::{CmdContext, ParamSchema, Tool, ToolArgs, ToolSchema};

/// File tool: without stdin, streams the file; with stdin, writes it.
pub struct File;

#[async_trait]
impl Tool for File {
    fn name(&self) -> &str {
        "file"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("file", "Read from or write to a file")
            .param(ParamSchema::required("path", "string", "File path"))
            .example("Load subjects from a file", "file subjects.json > write")
            .example("Save a query result", "read '{\"@describe\":\"?s\"}' > file out.json")
    }

    async fn execute(&self, args: ToolArgs, ctx: &mut CmdContext) -> Result<Option<Process>, DispatchError> {
        let path = args
            .get_positional(0)
            .ok_or_else(|| DispatchError::usage("Missing required argument: path"))?
            .to_string();

        match ctx.take_stdin() {
            None => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| ProcessError::Io(format!("{path}: {e}")))?;
                Ok(Some(Process::sync(Box::new(file))))
            }
            Some(mut stdin) => {
                let mut file = tokio::fs::File::create(&path)
                    .await
                    .map_err(|e| ProcessError::Io(format!("{path}: {e}")))?;
                Ok(Some(Process::sink(async move {
                    tokio::io::copy(&mut stdin, &mut file).await?;
                    file.flush().await?;
                    tracing::debug!(%path, "file written");
                    Ok(())
                })))
            }
        }
    }
}
