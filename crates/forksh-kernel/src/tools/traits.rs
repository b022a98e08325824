//! Core tool traits and types.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use async_trait::async_trait;
use serde_json::Value;

use super::context::CmdContext;
use crate::error::DispatchError;
use crate::process::Process;

/// Schema for a tool parameter.
#[derive(Debug, Clone)]
pub struct ParamSchema {
    /// Parameter name. Options are given as `--name`.
    pub name: String,
    /// Type hint (string, int, bool, json).
    pub param_type: String,
    /// Whether this parameter is required.
    pub required: bool,
    /// Default value if not given.
    pub default: Option<Value>,
    /// Description for help text.
    pub description: String,
    /// Positional parameters are matched by order; the rest are options.
    pub positional: bool,
}

impl ParamSchema {
    /// A required positional parameter.
    pub fn required(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            required: true,
            default: None,
            description: description.into(),
            positional: true,
        }
    }

    /// An optional positional parameter.
    pub fn positional(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    /// An option (`--name value`) with a default.
    pub fn optional(
        name: impl Into<String>,
        param_type: impl Into<String>,
        default: Value,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            required: false,
            default: (!default.is_null()).then_some(default),
            description: description.into(),
            positional: false,
        }
    }

    /// A boolean flag (`--name`).
    pub fn flag(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::optional(name, "bool", Value::Null, description)
    }

    fn usage(&self) -> String {
        match (self.positional, self.required, self.param_type.as_str()) {
            (true, true, _) => format!("<{}>", self.name),
            (true, false, _) => format!("[{}]", self.name),
            (false, _, "bool") => format!("[--{}]", self.name),
            (false, _, ty) => format!("[--{} <{}>]", self.name, ty),
        }
    }
}

/// An example invocation shown in help.
#[derive(Debug, Clone)]
pub struct Example {
    pub description: String,
    pub code: String,
}

/// Schema describing a tool's interface.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    /// Tool name.
    pub name: String,
    /// Short description.
    pub description: String,
    /// Parameter definitions.
    pub params: Vec<ParamSchema>,
    /// Example invocations.
    pub examples: Vec<Example>,
    /// Extra positionals beyond the declared ones are accepted.
    pub variadic: bool,
    /// Arguments, including `--help`, are passed through untouched.
    pub raw_args: bool,
}

impl ToolSchema {
    /// Create a new tool schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            examples: Vec::new(),
            variadic: false,
            raw_args: false,
        }
    }

    /// Add a parameter to the schema.
    pub fn param(mut self, param: ParamSchema) -> Self {
        self.params.push(param);
        self
    }

    /// Add an example.
    pub fn example(mut self, description: impl Into<String>, code: impl Into<String>) -> Self {
        self.examples.push(Example {
            description: description.into(),
            code: code.into(),
        });
        self
    }

    /// Accept any number of trailing positionals.
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// Pass arguments through unparsed; help belongs to whatever runs.
    pub fn raw_args(mut self) -> Self {
        self.raw_args = true;
        self.variadic = true;
        self
    }

    fn option(&self, name: &str) -> Option<&ParamSchema> {
        self.params.iter().find(|p| !p.positional && p.name == name)
    }

    fn positionals(&self) -> impl Iterator<Item = &ParamSchema> {
        self.params.iter().filter(|p| p.positional)
    }

    /// One-line synopsis, e.g. `read [jrql] [--@id <string>]`.
    pub fn synopsis(&self) -> String {
        let mut line = self.name.clone();
        for param in self.positionals().chain(self.params.iter().filter(|p| !p.positional)) {
            line.push(' ');
            line.push_str(&param.usage());
        }
        if self.variadic {
            line.push_str(" ...");
        }
        line
    }

    /// Help text for this tool.
    pub fn help(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}\n\n{}", self.synopsis(), self.description);

        let width = self.params.iter().map(|p| p.name.len() + 2).max().unwrap_or(0);
        if !self.params.is_empty() {
            out.push_str("\nParameters:\n");
            for param in &self.params {
                let name = if param.positional {
                    param.name.clone()
                } else {
                    format!("--{}", param.name)
                };
                let mut desc = param.description.clone();
                if let Some(default) = &param.default {
                    let _ = write!(desc, " (default: {})", display_value(default));
                }
                let _ = writeln!(out, "  {name:<width$}  {desc}");
            }
        }
        if !self.raw_args {
            let _ = writeln!(out, "  {:<width$}  Show help", "--help");
        }

        if !self.examples.is_empty() {
            out.push_str("\nExamples:\n");
            for example in &self.examples {
                let _ = writeln!(out, "  # {}\n  {}", example.description, example.code);
            }
        }
        out
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parsed arguments ready for tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolArgs {
    /// Positional arguments in order.
    pub positional: Vec<String>,
    /// Named arguments by key.
    pub named: HashMap<String, Value>,
    /// Boolean flags (e.g. `--dry-run`).
    pub flags: HashSet<String>,
}

impl ToolArgs {
    /// Create empty args.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments taken verbatim as positionals.
    pub fn raw(args: &[String]) -> Self {
        Self {
            positional: args.to_vec(),
            ..Self::default()
        }
    }

    /// Parse `args` against `schema`.
    ///
    /// Options are `--name value` or `--name=value`; `--` ends option
    /// parsing. Unknown options, missing values, bad numbers and missing or
    /// surplus positionals are usage errors.
    pub fn parse(args: &[String], schema: &ToolSchema) -> Result<Self, DispatchError> {
        if schema.raw_args {
            return Ok(Self::raw(args));
        }

        let mut parsed = Self::new();
        let mut only_positional = false;
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if only_positional {
                parsed.positional.push(arg.clone());
                continue;
            }
            if arg == "--" {
                only_positional = true;
                continue;
            }
            let Some(option) = arg.strip_prefix("--").filter(|o| !o.is_empty()) else {
                parsed.positional.push(arg.clone());
                continue;
            };

            let (key, inline) = match option.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (option, None),
            };
            let param = schema
                .option(key)
                .ok_or_else(|| DispatchError::usage(format!("Unknown argument: --{key}")))?;

            if param.param_type == "bool" {
                match inline.map(parse_bool) {
                    None | Some(Some(true)) => {
                        parsed.flags.insert(key.to_string());
                    }
                    Some(Some(false)) => {}
                    Some(None) => {
                        return Err(DispatchError::usage(format!("Invalid value for --{key}: expected true or false")));
                    }
                }
                continue;
            }

            let raw = match inline {
                Some(value) => value.to_string(),
                None => iter
                    .next()
                    .cloned()
                    .ok_or_else(|| DispatchError::usage(format!("Not enough arguments following: --{key}")))?,
            };
            parsed.named.insert(key.to_string(), coerce(param, raw)?);
        }

        let declared: Vec<_> = schema.positionals().collect();
        if let Some(missing) = declared.iter().skip(parsed.positional.len()).find(|p| p.required) {
            return Err(DispatchError::usage(format!("Missing required argument: {}", missing.name)));
        }
        if !schema.variadic {
            if let Some(extra) = parsed.positional.get(declared.len()) {
                return Err(DispatchError::usage(format!("Unknown argument: {extra}")));
            }
        }

        for param in schema.params.iter().filter(|p| !p.positional) {
            if let Some(default) = &param.default {
                parsed.named.entry(param.name.clone()).or_insert_with(|| default.clone());
            }
            if param.required && !parsed.named.contains_key(&param.name) {
                return Err(DispatchError::usage(format!("Missing required argument: --{}", param.name)));
            }
        }

        Ok(parsed)
    }

    /// Get a positional argument by index.
    pub fn get_positional(&self, index: usize) -> Option<&str> {
        self.positional.get(index).map(String::as_str)
    }

    /// Get a named argument by key.
    pub fn get_named(&self, key: &str) -> Option<&Value> {
        self.named.get(key)
    }

    /// Get a string option.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.named.get(key).map(display_value)
    }

    /// Get an integer option.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.named.get(key).and_then(Value::as_i64)
    }

    /// Check if a flag is set.
    pub fn has_flag(&self, name: &str) -> bool {
        self.flags.contains(name)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn coerce(param: &ParamSchema, raw: String) -> Result<Value, DispatchError> {
    match param.param_type.as_str() {
        "int" => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| DispatchError::usage(format!("Invalid value for --{}: {raw} is not a number", param.name))),
        _ => Ok(Value::String(raw)),
    }
}

/// A command that can be dispatched.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's name (used for lookup).
    fn name(&self) -> &str;

    /// Get the tool's schema.
    fn schema(&self) -> ToolSchema;

    /// Start the command.
    ///
    /// Validation happens here, before anything is started; errors are
    /// reported without a process. `Ok(None)` means the command produced
    /// user output only (e.g. `help`).
    async fn execute(&self, args: ToolArgs, ctx: &mut CmdContext) -> Result<Option<Process>, DispatchError>;
}
