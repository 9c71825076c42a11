use super::command::{CommandResult, StepExecutor, StepHandler};
use super::commands::{
    BreakCommand, ExitCommand, ExtractCommand, ForeachCommand, IfCommand, InputCommand,
    PrintCommand, ReadFileCommand, SendCommand, SetCommand, UpdateColumnCommand, WaitCommand,
    WhileCommand, WriteFileCommand,
};
use super::context::ScriptContext;
use super::expr::evaluate;
use super::value::Value;
use super::{Script, Step, StepKind};
use crate::event::OutputType;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of a whole script run.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptOutcome {
    pub success: bool,
    pub cancelled: bool,
    /// The `exit` message, if the script exited explicitly.
    pub message: Option<String>,
    pub error: Option<String>,
    /// Everything emitted except debug lines.
    pub output: String,
    pub duration: Duration,
    pub variables: Vec<(String, Value)>,
}

/// Dispatches steps to their handlers.
///
/// Built once and shared by every run; handlers hold no per-run state.
pub struct ScriptExecutor {
    handlers: HashMap<&'static str, Box<dyn StepHandler>>,
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptExecutor {
    pub fn new() -> Self {
        let mut executor = Self {
            handlers: HashMap::new(),
        };
        executor.register(SendCommand);
        executor.register(PrintCommand);
        executor.register(SetCommand);
        executor.register(WaitCommand);
        executor.register(ExitCommand);
        executor.register(BreakCommand);
        executor.register(IfCommand);
        executor.register(ForeachCommand);
        executor.register(WhileCommand);
        executor.register(ExtractCommand);
        executor.register(ReadFileCommand);
        executor.register(WriteFileCommand);
        executor.register(InputCommand);
        executor.register(UpdateColumnCommand);
        executor
    }

    fn register(&mut self, handler: impl StepHandler) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    /// Seed the script's variable defaults and run its steps.
    ///
    /// Variables already set on `ctx` (host and row values) win over the
    /// script's declared defaults.
    pub async fn run(&self, script: &Script, ctx: &mut ScriptContext) -> ScriptOutcome {
        let start = Instant::now();
        if script.debug {
            ctx.set_debug(true);
        }
        for (name, value) in &script.vars {
            if !ctx.has(name) {
                ctx.set(name, value.clone());
            }
        }

        let name = script.name.as_deref().unwrap_or("script");
        debug!(host = %ctx.host_id(), script = %name, steps = script.steps.len(), "script started");
        let vars = if ctx.is_debug() { ctx.snapshot() } else { Vec::new() };
        ctx.debug(|| {
            format!(
                "[start] {name}: {} steps, variables: {}",
                script.steps.len(),
                format_vars(&vars)
            )
        });

        let result = self.execute_steps(&script.steps, ctx).await;
        let duration = start.elapsed();
        let cancelled = !result.success && ctx.is_cancelled();

        let vars = if ctx.is_debug() { ctx.snapshot() } else { Vec::new() };
        ctx.debug(|| {
            format!(
                "[end] {name}: success={} in {}ms, variables: {}",
                result.success,
                duration.as_millis(),
                format_vars(&vars)
            )
        });
        debug!(host = %ctx.host_id(), script = %name, success = result.success, cancelled, "script finished");

        ScriptOutcome {
            success: result.success,
            cancelled,
            message: result.message,
            error: result.error,
            output: ctx.output_text(),
            duration,
            variables: ctx.snapshot(),
        }
    }
}

fn is_block(step: &Step) -> bool {
    matches!(
        step.kind,
        StepKind::If { .. } | StepKind::Foreach { .. } | StepKind::While { .. }
    )
}

fn format_vars(vars: &[(String, Value)]) -> String {
    if vars.is_empty() {
        return "(none)".into();
    }
    vars.iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl StepExecutor for ScriptExecutor {
    async fn execute_steps(&self, steps: &[Step], ctx: &mut ScriptContext) -> CommandResult {
        for step in steps {
            if ctx.is_cancelled() {
                return CommandResult::cancelled();
            }

            // A foreach guard applies per iteration instead.
            if !matches!(step.kind, StepKind::Foreach { .. }) {
                if let Some(guard) = &step.when {
                    if !evaluate(guard, ctx) {
                        ctx.debug(|| format!("skip {}: `{guard}` is false", step.kind.name()));
                        continue;
                    }
                }
            }

            let Some(handler) = self.handlers.get(step.kind.name()) else {
                return CommandResult::failed(format!("no handler for `{}`", step.kind.name()));
            };
            let result = handler.execute(step, ctx, self).await;

            if !result.is_normal() {
                return result;
            }
            if !result.success {
                let error = result.error.clone().unwrap_or_else(|| "step failed".into());
                if !is_block(step) {
                    let output_type = if step.continue_on_error() {
                        OutputType::Warning
                    } else {
                        OutputType::Error
                    };
                    ctx.emit(format!("{}: {error}", step.kind.name()), output_type);
                }
                if step.continue_on_error() {
                    continue;
                }
                return result;
            }
        }
        CommandResult::ok()
    }
}
