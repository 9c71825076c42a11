//! The automation scripting language.
//!
//! A script is a YAML document with optional `name`, `description`,
//! `version`, `debug` and `vars` keys and an ordered `steps` list:
//!
//! ```yaml
//! name: version check
//! vars:
//!   wanted: "1.0"
//! steps:
//!   - send: show version
//!     capture: v
//!   - if: v contains ${wanted}
//!     then:
//!       - print: match
//!     else:
//!       - exit: failed, got ${v}
//! ```
//!
//! [`parser`] turns documents into a [`Script`], [`ScriptExecutor`] runs it
//! against a [`CommandTarget`](crate::session::CommandTarget) with a
//! [`ScriptContext`].

mod command;
mod commands;
mod context;
mod executor;
pub mod expr;
pub mod parser;
#[cfg(test)]
mod testing;
mod value;

pub use command::{CommandResult, ControlFlow, StepExecutor, StepHandler};
pub use commands::{
    BreakCommand, ExitCommand, ExtractCommand, ForeachCommand, IfCommand, InputCommand,
    PrintCommand, ReadFileCommand, SendCommand, SetCommand, UpdateColumnCommand, WaitCommand,
    WhileCommand, WriteFileCommand,
};
pub use context::ScriptContext;
pub use executor::{ScriptExecutor, ScriptOutcome};
pub use parser::{is_yaml_script, parse, parse_file, parse_input, parse_simple_commands, validate};
pub use value::{Value, format_number, is_numeric_literal};

use std::time::Duration;

/// A parsed script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub debug: bool,
    /// Declared defaults, in document order.
    pub vars: Vec<(String, Value)>,
    pub steps: Vec<Step>,
}

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnError {
    #[default]
    Stop,
    Continue,
}

/// One step plus the options every step kind accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub kind: StepKind,
    /// Store the step's raw output in this variable.
    pub capture: Option<String>,
    /// Do not echo the command or its output to listeners.
    pub suppress: bool,
    /// A regex the output must match for the step to succeed.
    pub expect: Option<String>,
    pub timeout: Option<Duration>,
    pub on_error: OnError,
    /// Skip the step unless this condition holds.
    pub when: Option<String>,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            capture: None,
            suppress: false,
            expect: None,
            timeout: None,
            on_error: OnError::Stop,
            when: None,
        }
    }

    pub fn continue_on_error(&self) -> bool {
        self.on_error == OnError::Continue
    }
}

/// Which match(es) `extract` assigns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchSelector {
    #[default]
    First,
    Last,
    All,
    /// Zero-based.
    Index(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileEncoding {
    #[default]
    Utf8,
    Ascii,
    Utf16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Send {
        command: String,
    },
    Print {
        message: String,
    },
    /// `name = expression`, kept unparsed for `validate`.
    Set {
        assignment: String,
    },
    Wait {
        duration: Duration,
    },
    Exit {
        message: String,
    },
    Break,
    If {
        condition: String,
        then: Vec<Step>,
        otherwise: Vec<Step>,
    },
    Foreach {
        var: String,
        collection: String,
        when: Option<String>,
        body: Vec<Step>,
    },
    While {
        condition: String,
        body: Vec<Step>,
    },
    Extract {
        from: String,
        pattern: String,
        into: Vec<String>,
        selector: MatchSelector,
    },
    ReadFile {
        path: String,
        into: String,
        encoding: FileEncoding,
        skip_empty: bool,
        trim: bool,
        max_lines: Option<usize>,
    },
    WriteFile {
        path: String,
        content: String,
        append: bool,
    },
    Input {
        prompt: String,
        into: String,
        default: Option<String>,
        validate: Option<String>,
        error_message: Option<String>,
    },
    UpdateColumn {
        column: String,
        value: String,
    },
}

impl StepKind {
    /// The step keyword, as written in scripts.
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Send { .. } => SendCommand::NAME,
            StepKind::Print { .. } => PrintCommand::NAME,
            StepKind::Set { .. } => SetCommand::NAME,
            StepKind::Wait { .. } => WaitCommand::NAME,
            StepKind::Exit { .. } => ExitCommand::NAME,
            StepKind::Break => BreakCommand::NAME,
            StepKind::If { .. } => IfCommand::NAME,
            StepKind::Foreach { .. } => ForeachCommand::NAME,
            StepKind::While { .. } => WhileCommand::NAME,
            StepKind::Extract { .. } => ExtractCommand::NAME,
            StepKind::ReadFile { .. } => ReadFileCommand::NAME,
            StepKind::WriteFile { .. } => WriteFileCommand::NAME,
            StepKind::Input { .. } => InputCommand::NAME,
            StepKind::UpdateColumn { .. } => UpdateColumnCommand::NAME,
        }
    }
}
