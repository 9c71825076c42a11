//! [`UpdateColumnCommand`] sets a column of this host's row in the caller's
//! host table.
//!
//! Script syntax: `- updatecolumn: {column: version, value: "${ver}"}`

use crate::error::ScriptParseError;
use crate::script::command::{CommandResult, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::parser::StepFields;
use crate::script::{Step, StepKind};
use async_trait::async_trait;

pub struct UpdateColumnCommand;

impl UpdateColumnCommand {
    pub const NAME: &'static str = "updatecolumn";
}

#[async_trait]
impl StepHandler for UpdateColumnCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        Ok(StepKind::UpdateColumn {
            column: fields.scalar_or(&["column", "name"]).unwrap_or_default(),
            value: fields.string("value").unwrap_or_default(),
        })
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        _executor: &dyn StepExecutor,
    ) -> CommandResult {
        let StepKind::UpdateColumn { column, value } = &step.kind else {
            return CommandResult::failed("not an updatecolumn step");
        };
        let column = ctx.substitute(column);
        if column.trim().is_empty() {
            return CommandResult::failed("missing column name");
        }
        let value = ctx.substitute(value);
        ctx.debug(|| format!("updatecolumn {column} = `{value}`"));
        ctx.update_column(&column, &value);
        CommandResult::ok()
    }
}
