//! The [`StepHandler`] trait and the [`CommandResult`] signal handlers return.

use super::context::ScriptContext;
use super::parser::StepFields;
use super::{Step, StepKind};
use crate::error::ScriptParseError;
use async_trait::async_trait;

/// How execution continues after a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControlFlow {
    #[default]
    Normal,
    /// Leave the innermost loop.
    Break,
    /// Unwind to the top of the script.
    Exit,
}

/// Outcome of one step or step list.
///
/// Failures travel up nested blocks the same way `break` and `exit` do.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub success: bool,
    pub flow: ControlFlow,
    /// The `exit` message, if any.
    pub message: Option<String>,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            flow: ControlFlow::Normal,
            message: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            flow: ControlFlow::Normal,
            message: None,
            error: Some(error.into()),
        }
    }

    pub fn break_loop() -> Self {
        Self {
            flow: ControlFlow::Break,
            ..Self::ok()
        }
    }

    pub fn exit(success: bool, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success,
            flow: ControlFlow::Exit,
            error: (!success).then(|| message.clone()),
            message: Some(message),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            success: false,
            flow: ControlFlow::Exit,
            message: None,
            error: Some("cancelled".into()),
        }
    }

    pub fn is_normal(&self) -> bool {
        self.flow == ControlFlow::Normal
    }
}

/// Runs nested step lists for control-flow handlers.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute_steps(&self, steps: &[Step], ctx: &mut ScriptContext) -> CommandResult;
}

/// A single script step type.
///
/// Implement this trait to add a step keyword. Then:
///
/// 1. Define `pub const NAME: &'static str` on your struct, the keyword used
///    in scripts (e.g. `"send"`), and add a [`StepKind`] variant.
/// 2. Re-export the struct from `src/script/commands/mod.rs`.
/// 3. Add one entry to the `REGISTRY` in [`crate::script::parser`] and
///    register the handler in [`ScriptExecutor::new`](super::ScriptExecutor::new).
#[async_trait]
pub trait StepHandler: Send + Sync + 'static {
    /// The step keyword, accessible at runtime through a trait object.
    fn name(&self) -> &'static str;

    /// Build this step's [`StepKind`] from its document fields.
    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError>
    where
        Self: Sized;

    /// Run `step`, whose kind is always this handler's.
    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        executor: &dyn StepExecutor,
    ) -> CommandResult;
}
