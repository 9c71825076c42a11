//! [`WhileCommand`] repeats its body while a condition holds.
//!
//! Script syntax:
//! ```yaml
//! - while: n < 3
//!   do:
//!     - set: n = n + 1
//! ```
//!
//! A loop that runs [`MAX_ITERATIONS`] times is stopped with a warning.

use crate::error::ScriptParseError;
use crate::event::OutputType;
use crate::script::command::{CommandResult, ControlFlow, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::expr::evaluate;
use crate::script::parser::StepFields;
use crate::script::{Step, StepKind};
use async_trait::async_trait;

pub const MAX_ITERATIONS: usize = 10_000;

pub struct WhileCommand;

impl WhileCommand {
    pub const NAME: &'static str = "while";
}

#[async_trait]
impl StepHandler for WhileCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        Ok(StepKind::While {
            condition: fields.scalar_or(&["condition"]).unwrap_or_default(),
            body: fields.steps("do")?,
        })
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        executor: &dyn StepExecutor,
    ) -> CommandResult {
        let StepKind::While { condition, body } = &step.kind else {
            return CommandResult::failed("not a while step");
        };

        let mut iterations = 0;
        while evaluate(condition, ctx) {
            if ctx.is_cancelled() {
                return CommandResult::cancelled();
            }
            if iterations == MAX_ITERATIONS {
                ctx.emit(
                    format!("while `{condition}`: stopped after {MAX_ITERATIONS} iterations"),
                    OutputType::Warning,
                );
                break;
            }
            iterations += 1;

            let result = executor.execute_steps(body, ctx).await;
            match result.flow {
                ControlFlow::Break => break,
                ControlFlow::Exit => return result,
                ControlFlow::Normal if !result.success && !step.continue_on_error() => {
                    return result;
                }
                ControlFlow::Normal => {}
            }
        }
        ctx.debug(|| format!("while `{condition}`: {iterations} iterations"));
        CommandResult::ok()
    }
}
