//! [`PrintCommand`] writes a line to the run's output.
//!
//! Script syntax: `- print: interface ${port} is ${state}`

use crate::error::ScriptParseError;
use crate::event::OutputType;
use crate::script::command::{CommandResult, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::parser::StepFields;
use crate::script::{Step, StepKind};
use async_trait::async_trait;

pub struct PrintCommand;

impl PrintCommand {
    pub const NAME: &'static str = "print";
}

#[async_trait]
impl StepHandler for PrintCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        Ok(StepKind::Print {
            message: fields.scalar_or(&["message", "text"]).unwrap_or_default(),
        })
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        _executor: &dyn StepExecutor,
    ) -> CommandResult {
        let StepKind::Print { message } = &step.kind else {
            return CommandResult::failed("not a print step");
        };
        let text = ctx.substitute(message);
        ctx.debug(|| format!("print: `{message}` -> `{text}`"));
        ctx.emit(text, OutputType::Info);
        CommandResult::ok()
    }
}
