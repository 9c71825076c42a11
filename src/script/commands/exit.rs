//! [`ExitCommand`] stops the script.
//!
//! Script syntax: `- exit: done` or `- exit: failed, ${port} is down`
//!
//! A message containing "fail" or "error" marks the run as failed.

use crate::error::ScriptParseError;
use crate::event::OutputType;
use crate::script::command::{CommandResult, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::parser::StepFields;
use crate::script::{Step, StepKind};
use async_trait::async_trait;

pub struct ExitCommand;

impl ExitCommand {
    pub const NAME: &'static str = "exit";
}

fn is_failure(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("fail") || message.contains("error")
}

#[async_trait]
impl StepHandler for ExitCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        Ok(StepKind::Exit {
            message: fields.scalar_or(&["message"]).unwrap_or_default(),
        })
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        _executor: &dyn StepExecutor,
    ) -> CommandResult {
        let StepKind::Exit { message } = &step.kind else {
            return CommandResult::failed("not an exit step");
        };
        let message = ctx.substitute(message);
        let success = !is_failure(&message);
        if !message.is_empty() {
            let output_type = if success { OutputType::Success } else { OutputType::Error };
            ctx.emit(message.clone(), output_type);
        }
        CommandResult::exit(success, message)
    }
}
