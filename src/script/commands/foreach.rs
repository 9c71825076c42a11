//! [`ForeachCommand`] runs its body once per list item.
//!
//! Script syntax:
//! ```yaml
//! - foreach: port in ports
//!   when: port != gi0/0
//!   do:
//!     - send: show interface ${port}
//! ```
//! or with explicit keys: `foreach: {var: port, in: ports}`.
//!
//! The loop sets `<var>` and `<var>_index` (zero-based). `when` is checked
//! per item and skips only that item.

use super::variable_name;
use crate::error::ScriptParseError;
use crate::script::command::{CommandResult, ControlFlow, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::expr::evaluate;
use crate::script::parser::StepFields;
use crate::script::{Step, StepKind};
use async_trait::async_trait;

pub struct ForeachCommand;

impl ForeachCommand {
    pub const NAME: &'static str = "foreach";
}

#[async_trait]
impl StepHandler for ForeachCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        let (var, collection) = match fields.scalar() {
            Some(spec) => match spec.split_once(" in ") {
                Some((var, collection)) => (var.trim().to_string(), collection.trim().to_string()),
                None => return Err(fields.error(format!("expected `item in list`, got `{spec}`"))),
            },
            None => (
                fields.string("var").or_else(|| fields.string("item")).unwrap_or_default(),
                ["in", "list", "collection"]
                    .iter()
                    .find_map(|key| fields.string(key))
                    .unwrap_or_default(),
            ),
        };
        Ok(StepKind::Foreach {
            var: variable_name(&var).to_string(),
            collection,
            when: fields.string("when"),
            body: fields.steps("do")?,
        })
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        executor: &dyn StepExecutor,
    ) -> CommandResult {
        let StepKind::Foreach { var, collection, when, body } = &step.kind else {
            return CommandResult::failed("not a foreach step");
        };
        let items = ctx
            .get(variable_name(collection))
            .map(|value| value.as_list())
            .unwrap_or_default();
        ctx.debug(|| format!("foreach {var} in {collection}: {} items", items.len()));

        for (index, item) in items.into_iter().enumerate() {
            if ctx.is_cancelled() {
                return CommandResult::cancelled();
            }
            ctx.set(var, item);
            ctx.set(&format!("{var}_index"), index as f64);
            if let Some(guard) = when {
                if !evaluate(guard, ctx) {
                    ctx.debug(|| format!("foreach {var}[{index}] skipped: `{guard}` is false"));
                    continue;
                }
            }

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
        CommandResult::ok()
    }
}
