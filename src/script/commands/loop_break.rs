//! [`BreakCommand`] leaves the innermost `foreach` or `while` loop.
//!
//! Script syntax: `- break` or `- break: true`

use crate::error::ScriptParseError;
use crate::script::command::{CommandResult, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::parser::StepFields;
use crate::script::{Step, StepKind};
use async_trait::async_trait;

pub struct BreakCommand;

impl BreakCommand {
    pub const NAME: &'static str = "break";
}

#[async_trait]
impl StepHandler for BreakCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(_fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        Ok(StepKind::Break)
    }

    async fn execute(
        &self,
        _step: &Step,
        ctx: &mut ScriptContext,
        _executor: &dyn StepExecutor,
    ) -> CommandResult {
        ctx.debug(|| "break".to_string());
        CommandResult::break_loop()
    }
}
