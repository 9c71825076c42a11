//! Script parser.
//!
//! The entry points are [`parse`] for YAML documents, [`parse_simple_commands`]
//! for plain newline-separated command lists, and [`parse_input`] which picks
//! one of the two with [`is_yaml_script`].
//!
//! Parsing is lenient about missing step options; [`validate`] reports those
//! as advisory messages instead.

use super::command::StepHandler;
use super::commands::{
    BreakCommand, ExitCommand, ExtractCommand, ForeachCommand, IfCommand, InputCommand,
    PrintCommand, ReadFileCommand, SendCommand, SetCommand, UpdateColumnCommand, WaitCommand,
    WhileCommand, WriteFileCommand,
};
use super::value::Value;
use super::{OnError, Script, Step, StepKind};
use crate::error::ScriptParseError;
use anyhow::{Context as _, anyhow};
use regex::Regex;
use serde_yaml::{Mapping, Value as Yaml};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

const TOP_LEVEL_KEYS: &[&str] = &["name", "description", "version", "debug", "vars", "steps"];
const DETECT_LINES: usize = 10;

type ParseFn = fn(&StepFields<'_>) -> Result<StepKind, ScriptParseError>;

static REGISTRY: &[(&str, ParseFn)] = &[
    (SendCommand::NAME, SendCommand::parse),
    (PrintCommand::NAME, PrintCommand::parse),
    (SetCommand::NAME, SetCommand::parse),
    (WaitCommand::NAME, WaitCommand::parse),
    (ExitCommand::NAME, ExitCommand::parse),
    (BreakCommand::NAME, BreakCommand::parse),
    (IfCommand::NAME, IfCommand::parse),
    (ForeachCommand::NAME, ForeachCommand::parse),
    (WhileCommand::NAME, WhileCommand::parse),
    (ExtractCommand::NAME, ExtractCommand::parse),
    (ReadFileCommand::NAME, ReadFileCommand::parse),
    (WriteFileCommand::NAME, WriteFileCommand::parse),
    (InputCommand::NAME, InputCommand::parse),
    (UpdateColumnCommand::NAME, UpdateColumnCommand::parse),
];

fn lookup(keyword: &str) -> Option<ParseFn> {
    REGISTRY
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(keyword))
        .map(|(_, parse)| *parse)
}

/// Parse a YAML script document.
///
/// # Errors
///
/// Returns an error if the document is not valid YAML, has no steps, or a
/// step is not a map or scalar, names an unknown step type, or has an
/// option of the wrong shape.
///
/// # Example
///
/// ```
/// use shelldrive::script::parse;
///
/// let script = parse("steps:\n  - send: show version\n    capture: v\n").unwrap();
/// assert_eq!(script.steps.len(), 1);
/// assert_eq!(script.steps[0].capture.as_deref(), Some("v"));
/// ```
pub fn parse(document: &str) -> Result<Script, ScriptParseError> {
    let root: Yaml = serde_yaml::from_str(document)?;
    match &root {
        Yaml::Sequence(steps) => Ok(Script {
            steps: parse_steps(steps, "steps")?,
            ..Script::default()
        }),
        Yaml::Mapping(map) => parse_document(map),
        Yaml::Null => Err(ScriptParseError::Document("script is empty".into())),
        _ => Err(ScriptParseError::Document(
            "script must be a map with a `steps` list".into(),
        )),
    }
}

/// Read and parse a script file, YAML or plain command list.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Script, ScriptParseError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script file: {}", path.display()))
        .map_err(|e| ScriptParseError::Document(format!("{e:#}")))?;
    parse_input(&content)
}

/// Parse `text` as YAML if it looks like a script, else as a command list.
pub fn parse_input(text: &str) -> Result<Script, ScriptParseError> {
    if is_yaml_script(text) {
        parse(text)
    } else {
        Ok(parse_simple_commands(text))
    }
}

/// True iff one of the first non-comment lines is a document marker, a
/// top-level script key, or a step list item such as `- send: ...`.
pub fn is_yaml_script(text: &str) -> bool {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        .take(DETECT_LINES)
        .any(|line| {
            if line == "---" {
                return true;
            }
            if let Some((key, _)) = line.split_once(':') {
                if TOP_LEVEL_KEYS.contains(&key) {
                    return true;
                }
            }
            line.trim_start()
                .strip_prefix("- ")
                .and_then(|item| item.split_once(':'))
                .is_some_and(|(key, _)| lookup(key.trim()).is_some())
        })
}

/// Every non-blank, non-comment line becomes a `send` step.
pub fn parse_simple_commands(text: &str) -> Script {
    let steps = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|command| {
            Step::new(StepKind::Send {
                command: command.to_string(),
            })
        })
        .collect();
    Script {
        steps,
        ..Script::default()
    }
}

fn parse_document(map: &Mapping) -> Result<Script, ScriptParseError> {
    let text = |key: &str| map.get(key).and_then(scalar_string);
    let debug = match map.get("debug") {
        None | Some(Yaml::Null) => false,
        Some(value) => as_bool(value)
            .ok_or_else(|| ScriptParseError::Document("`debug` must be a boolean".into()))?,
    };

    let vars = match map.get("vars") {
        None | Some(Yaml::Null) => Vec::new(),
        Some(Yaml::Mapping(vars)) => vars
            .iter()
            .map(|(k, v)| {
                scalar_string(k)
                    .map(|name| (name, Value::from_yaml(v)))
                    .ok_or_else(|| ScriptParseError::Document("variable names must be scalars".into()))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(ScriptParseError::Document("`vars` must be a map".into())),
    };

    let steps = match map.get("steps") {
        Some(Yaml::Sequence(steps)) => parse_steps(steps, "steps")?,
        Some(Yaml::Null) | None => {
            return Err(ScriptParseError::Document("script has no `steps` list".into()));
        }
        Some(_) => return Err(ScriptParseError::Document("`steps` must be a list".into())),
    };

    Ok(Script {
        name: text("name"),
        description: text("description"),
        version: text("version"),
        debug,
        vars,
        steps,
    })
}

fn parse_steps(items: &[Yaml], path: &str) -> Result<Vec<Step>, ScriptParseError> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_step(item, &format!("{path}[{i}]")))
        .collect()
}

fn parse_step(item: &Yaml, path: &str) -> Result<Step, ScriptParseError> {
    static EMPTY: LazyLock<Mapping> = LazyLock::new(Mapping::new);
    static NULL: Yaml = Yaml::Null;

    let (keyword, value, outer) = match item {
        Yaml::Mapping(map) => {
            let (key, value) = map
                .iter()
                .find_map(|(k, v)| k.as_str().filter(|k| lookup(k).is_some()).map(|k| (k, v)))
                .ok_or_else(|| {
                    let keys: Vec<String> = map.keys().filter_map(scalar_string).collect();
                    ScriptParseError::step(path, format!("unknown step type ({})", keys.join(", ")))
                })?;
            (key, value, map)
        }
        Yaml::String(text) if lookup(text.trim()).is_some() => (text.trim(), &NULL, &*EMPTY),
        Yaml::String(_) => ("send", item, &*EMPTY),
        _ => return Err(ScriptParseError::step(path, "step must be a map or a string")),
    };

    let fields = StepFields {
        path: path.to_string(),
        keyword,
        value,
        outer,
    };
    let parse_kind = lookup(keyword).ok_or_else(|| fields.error("unknown step type"))?;
    let mut step = Step::new(parse_kind(&fields)?);

    step.capture = fields.string("capture");
    step.suppress = fields.bool("suppress")?.unwrap_or(false);
    step.expect = fields.string("expect");
    step.timeout = fields.duration("timeout")?;
    step.when = fields.string("when");
    step.on_error = match fields.string("on_error").or_else(|| fields.string("onerror")) {
        None => OnError::Stop,
        Some(policy) => match policy.to_lowercase().as_str() {
            "continue" | "ignore" | "true" => OnError::Continue,
            "stop" | "fail" | "false" => OnError::Stop,
            other => return Err(fields.error(format!("unknown on_error policy `{other}`"))),
        },
    };
    Ok(step)
}

/// The document fields of one step.
///
/// Options are looked up in the step's own map (`- extract: {from: x}`)
/// first, then beside the keyword (`- send: cmd` / `  capture: v`).
pub struct StepFields<'a> {
    path: String,
    keyword: &'a str,
    value: &'a Yaml,
    outer: &'a Mapping,
}

impl<'a> StepFields<'a> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn keyword(&self) -> &str {
        self.keyword
    }

    pub fn error(&self, message: impl Into<String>) -> ScriptParseError {
        ScriptParseError::step(&self.path, format!("{}: {}", self.keyword, message.into()))
    }

    /// The keyword's value when it is a scalar (`- print: hello`).
    pub fn scalar(&self) -> Option<String> {
        scalar_string(self.value)
    }

    pub fn get(&self, key: &str) -> Option<&'a Yaml> {
        let inner = self.value.as_mapping().and_then(|map| map.get(key));
        inner
            .or_else(|| (key != self.keyword).then(|| self.outer.get(key)).flatten())
            .filter(|v| !v.is_null())
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(scalar_string)
    }

    /// The scalar value, else the first of `keys` present.
    pub fn scalar_or(&self, keys: &[&str]) -> Option<String> {
        self.scalar().or_else(|| keys.iter().find_map(|key| self.string(key)))
    }

    pub fn bool(&self, key: &str) -> Result<Option<bool>, ScriptParseError> {
        self.get(key)
            .map(|v| as_bool(v).ok_or_else(|| self.error(format!("`{key}` must be a boolean"))))
            .transpose()
    }

    pub fn usize(&self, key: &str) -> Result<Option<usize>, ScriptParseError> {
        self.get(key)
            .map(|v| {
                v.as_u64()
                    .or_else(|| scalar_string(v).and_then(|s| s.trim().parse().ok()))
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| self.error(format!("`{key}` must be a non-negative integer")))
            })
            .transpose()
    }

    pub fn duration(&self, key: &str) -> Result<Option<Duration>, ScriptParseError> {
        self.get(key).map(|v| self.to_duration(v)).transpose()
    }

    pub fn to_duration(&self, value: &Yaml) -> Result<Duration, ScriptParseError> {
        let text = scalar_string(value).ok_or_else(|| self.error("expected a duration"))?;
        parse_duration(&text).map_err(|e| self.error(format!("{e:#}")))
    }

    /// A scalar or a list of scalars.
    pub fn string_list(&self, key: &str) -> Result<Vec<String>, ScriptParseError> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(Yaml::Sequence(items)) => items
                .iter()
                .map(|v| scalar_string(v).ok_or_else(|| self.error(format!("`{key}` must list names"))))
                .collect(),
            Some(v) => Ok(scalar_string(v)
                .map(|s| s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
                .unwrap_or_default()),
        }
    }

    /// A nested step list; missing means empty.
    pub fn steps(&self, key: &str) -> Result<Vec<Step>, ScriptParseError> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(Yaml::Sequence(items)) => parse_steps(items, &format!("{}.{key}", self.path)),
            Some(_) => Err(self.error(format!("`{key}` must be a list of steps"))),
        }
    }
}

fn scalar_string(value: &Yaml) -> Option<String> {
    match value {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Number(n) => Some(n.to_string()),
        Yaml::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_bool(value: &Yaml) -> Option<bool> {
    match value {
        Yaml::Bool(b) => Some(*b),
        Yaml::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "on" => Some(true),
            "false" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Parse a duration string: `1s`, `500ms`, `1.5s`, or bare seconds (`2`).
pub(crate) fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let secs = if let Some(ms_str) = s.strip_suffix("ms") {
        let ms: f64 = ms_str.trim().parse().context("Invalid milliseconds value")?;
        ms / 1000.0
    } else if let Some(s_str) = s.strip_suffix('s') {
        s_str.trim().parse().context("Invalid seconds value")?
    } else {
        s.parse()
            .map_err(|_| anyhow!("Duration must be seconds, or end with 's' or 'ms', got: {s}"))?
    };
    Duration::try_from_secs_f64(secs).map_err(|_| anyhow!("Duration out of range: {s}"))
}

/// Report structural problems without rejecting the script.
pub fn validate(script: &Script) -> Vec<String> {
    let mut issues = Vec::new();
    validate_steps(&script.steps, "steps", &mut issues);
    issues
}

fn validate_steps(steps: &[Step], path: &str, issues: &mut Vec<String>) {
    for (i, step) in steps.iter().enumerate() {
        let path = format!("{path}[{i}]");
        let mut issue = |message: &str| issues.push(format!("{path} ({}): {message}", step.kind.name()));

        if let Some(pattern) = &step.expect {
            check_regex(pattern, "expect", &mut issue);
        }
        match &step.kind {
            StepKind::Send { command } if command.trim().is_empty() => issue("command is empty"),
            StepKind::Set { assignment } => match assignment.split_once('=') {
                None => issue("expected `name = expression`"),
                Some((name, _)) if name.trim().is_empty() => issue("variable name is empty"),
                Some(_) => {}
            },
            StepKind::If { condition, then, .. } => {
                if condition.trim().is_empty() {
                    issue("condition is empty");
                }
                if then.is_empty() {
                    issue("missing `then` steps");
                }
            }
            StepKind::Foreach { var, collection, body, .. } => {
                if var.trim().is_empty() {
                    issue("missing loop variable");
                }
                if collection.trim().is_empty() {
                    issue("missing `in` collection");
                }
                if body.is_empty() {
                    issue("missing `do` steps");
                }
            }
            StepKind::While { condition, body } => {
                if condition.trim().is_empty() {
                    issue("condition is empty");
                }
                if body.is_empty() {
                    issue("missing `do` steps");
                }
            }
            StepKind::Extract { from, pattern, into, .. } => {
                if from.trim().is_empty() {
                    issue("missing `from` variable");
                }
                if pattern.is_empty() {
                    issue("missing `pattern`");
                } else {
                    check_regex(pattern, "pattern", &mut issue);
                }
                if into.is_empty() {
                    issue("missing `into` variables");
                }
            }
            StepKind::ReadFile { path, into, .. } => {
                if path.trim().is_empty() {
                    issue("missing `path`");
                }
                if into.trim().is_empty() {
                    issue("missing `into` variable");
                }
            }
            StepKind::WriteFile { path, .. } if path.trim().is_empty() => issue("missing `path`"),
            StepKind::Input { into, validate, .. } => {
                if into.trim().is_empty() {
                    issue("missing `into` variable");
                }
                if let Some(pattern) = validate {
                    check_regex(pattern, "validate", &mut issue);
                }
            }
            StepKind::UpdateColumn { column, .. } if column.trim().is_empty() => {
                issue("missing `column`")
            }
            _ => {}
        }

        match &step.kind {
            StepKind::If { then, otherwise, .. } => {
                validate_steps(then, &format!("{path}.then"), issues);
                validate_steps(otherwise, &format!("{path}.else"), issues);
            }
            StepKind::Foreach { body, .. } | StepKind::While { body, .. } => {
                validate_steps(body, &format!("{path}.do"), issues);
            }
            _ => {}
        }
    }
}

/// Patterns with `${...}` are only known at run time.
fn check_regex(pattern: &str, field: &str, issue: &mut impl FnMut(&str)) {
    if !pattern.contains("${") {
        if let Err(e) = Regex::new(pattern) {
            issue(&format!("invalid `{field}` regex: {e}"));
        }
    }
}
