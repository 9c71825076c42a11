//! [`WaitCommand`] pauses this host's run.
//!
//! Script syntax: `- wait: 2` (seconds), `- wait: 500ms`, `- wait: 1.5s`

use crate::error::ScriptParseError;
use crate::script::command::{CommandResult, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::parser::StepFields;
use crate::script::{Step, StepKind};
use async_trait::async_trait;

pub struct WaitCommand;

impl WaitCommand {
    pub const NAME: &'static str = "wait";
}

#[async_trait]
impl StepHandler for WaitCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        let value = fields
            .scalar_or(&["seconds", "duration"])
            .ok_or_else(|| fields.error("expected a duration"))?;
        let duration = crate::script::parser::parse_duration(&value)
            .map_err(|e| fields.error(format!("{e:#}")))?;
        Ok(StepKind::Wait { duration })
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        _executor: &dyn StepExecutor,
    ) -> CommandResult {
        let StepKind::Wait { duration } = &step.kind else {
            return CommandResult::failed("not a wait step");
        };
        ctx.debug(|| format!("wait {}ms", duration.as_millis()));
        let cancel = ctx.cancel_token().clone();
        tokio::select! {
            _ = tokio::time::sleep(*duration) => CommandResult::ok(),
            _ = cancel.cancelled() => CommandResult::cancelled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse;
    use std::time::Duration;

    #[test]
    fn test_parse_forms() {
        let script = parse("steps:\n  - wait: 2\n  - wait: 250ms\n  - wait:\n      seconds: 1.5\n").unwrap();
        let durations: Vec<_> = script
            .steps
            .iter()
            .map(|s| match s.kind {
                StepKind::Wait { duration } => duration,
                _ => Duration::ZERO,
            })
            .collect();
        assert_eq!(
            durations,
            [Duration::from_secs(2), Duration::from_millis(250), Duration::from_millis(1500)]
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("steps:\n  - wait: later\n").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps() {
        let step = Step::new(StepKind::Wait { duration: Duration::from_secs(3) });
        let mut ctx = ScriptContext::new("fake:22");
        let executor = crate::script::ScriptExecutor::new();
        let start = tokio::time::Instant::now();
        let result = WaitCommand.execute(&step, &mut ctx, &executor).await;
        assert!(result.success);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
