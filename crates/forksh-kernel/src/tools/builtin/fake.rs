//! fake — Generate subjects from a template.
//!
//! The template is JSON text with `{{placeholder}}` markers, each replaced
//! by a generated value on every repetition. Output is one JSON array:
//! `[` item `,` item ... `]`.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::io::AsyncReadExt;

use crate::error::{DispatchError, ProcessError};
use crate::process::{ByteStream, Process};
use crate::scheduler::pipe_stream_default;
use crate::tools::{CmdContext, ParamSchema, Tool, ToolArgs, ToolSchema};

const FIRST_NAMES: &[&str] = &["Fred", "Wilma", "Barney", "Betty", "Pebbles", "Bamm-Bamm", "Dino"];
const LAST_NAMES: &[&str] = &["Flintstone", "Rubble", "Slate", "Gazoo", "Rockhead"];
const WORDS: &[&str] = &[
    "quarry", "granite", "boulder", "pebble", "cave", "tar", "mammoth", "fern", "flint", "slate",
];

/// Fake tool: repeat a template with generated values.
pub struct Fake;

#[async_trait]
impl Tool for Fake {
    fn name(&self) -> &str {
        "fake"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new("fake", "Generate fake subjects using a template")
            .param(ParamSchema::positional("input", "string", "Template JSON object for fake subjects"))
            .param(ParamSchema::optional("count", "int", json!(1), "How many fake subjects to generate"))
            .param(ParamSchema::optional("seed", "int", serde_json::Value::Null, "Seed for repeatable output"))
            .example(
                "Ten subjects with random ids",
                "fake '{\"@id\":\"{{datatype.uuid}}\",\"n\":{{datatype.number}}}' --count 10 > write",
            )
    }

    async fn execute(&self, args: ToolArgs, ctx: &mut CmdContext) -> Result<Option<Process>, DispatchError> {
        let count = args.get_int("count").unwrap_or(1);
        let count = usize::try_from(count)
            .ok()
            .filter(|c| *c > 0)
            .ok_or_else(|| DispatchError::usage(format!("Invalid value for --count: {count}")))?;
        let seed = args.get_int("seed");

        let template = match args.get_positional(0) {
            Some(input) => TemplateSource::Given(input.to_string()),
            None => TemplateSource::Stdin(
                ctx.take_stdin()
                    .ok_or_else(|| DispatchError::usage("Missing template: give it as an argument or on stdin"))?,
            ),
        };

        let (writer, reader) = pipe_stream_default();
        tokio::spawn(async move {
            let result = async {
                let template = template.resolve().await?;
                let mut faker = Faker::new(seed);
                writer.write_all_bytes(b"[").await?;
                for index in 0..count {
                    let item = faker.fill(&template, index)?;
                    let sep = if index + 1 == count { "]" } else { "," };
                    writer.write_all_bytes(format!("{item}{sep}").as_bytes()).await?;
                }
                Ok::<_, ProcessError>(())
            }
            .await;
            if let Err(err) = result {
                writer.fail(err.into());
            }
        });
        Ok(Some(Process::sync(Box::new(reader))))
    }
}

enum TemplateSource {
    Given(String),
    Stdin(ByteStream),
}

impl TemplateSource {
    async fn resolve(self) -> Result<String, ProcessError> {
        match self {
            TemplateSource::Given(text) => Ok(text),
            TemplateSource::Stdin(mut stdin) => {
                let mut text = String::new();
                stdin.read_to_string(&mut text).await?;
                Ok(text.trim().to_string())
            }
        }
    }
}

/// Placeholder expansion over a seedable generator.
struct Faker {
    rng: StdRng,
}

impl Faker {
    fn new(seed: Option<i64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed as u64),
            None => StdRng::from_os_rng(),
        };
        Self { rng }
    }

    /// Expand every `{{name}}` in `template`.
    fn fill(&mut self, template: &str, index: usize) -> Result<String, ProcessError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| ProcessError::Input("unclosed {{ in template".to_string()))?;
            out.push_str(&self.value(after[..end].trim(), index)?);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn value(&mut self, name: &str, index: usize) -> Result<String, ProcessError> {
        let value = match name {
            "index" => index.to_string(),
            "datatype.uuid" => {
                let bytes: [u8; 16] = self.rng.random();
                uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
            }
            "datatype.number" => self.rng.random_range(0..=99_999u32).to_string(),
            "datatype.boolean" => self.rng.random_bool(0.5).to_string(),
            "name.firstName" => self.pick(FIRST_NAMES),
            "name.lastName" => self.pick(LAST_NAMES),
            "lorem.word" => self.pick(WORDS),
            other => return Err(ProcessError::Input(format!("unknown placeholder {{{{{other}}}}}"))),
        };
        Ok(value)
    }

    fn pick(&mut self, list: &[&str]) -> String {
        list[self.rng.random_range(0..list.len())].to_string()
    }
}
