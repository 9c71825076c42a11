//! [`IfCommand`] runs one of two branches.
//!
//! Script syntax:
//! ```yaml
//! - if: v contains 1.0
//!   then:
//!     - print: match
//!   else:
//!     - exit: failed
//! ```

use crate::error::ScriptParseError;
use crate::script::command::{CommandResult, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::expr::evaluate;
use crate::script::parser::StepFields;
use crate::script::{Step, StepKind};
use async_trait::async_trait;

pub struct IfCommand;

impl IfCommand {
    pub const NAME: &'static str = "if";
}

#[async_trait]
impl StepHandler for IfCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        Ok(StepKind::If {
            condition: fields.scalar_or(&["condition"]).unwrap_or_default(),
            then: fields.steps("then")?,
            otherwise: fields.steps("else")?,
        })
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        executor: &dyn StepExecutor,
    ) -> CommandResult {
        let StepKind::If { condition, then, otherwise } = &step.kind else {
            return CommandResult::failed("not an if step");
        };
        let holds = evaluate(condition, ctx);
        let resolved = ctx.substitute(condition);
        ctx.debug(|| format!("if `{condition}` resolved `{resolved}` -> {holds}"));
        let branch = if holds { then } else { otherwise };
        if branch.is_empty() {
            return CommandResult::ok();
        }
        executor.execute_steps(branch, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use crate::event::{Event, OutputType};
    use crate::script::testing::{FakeTarget, run_yaml};
    use crate::script::{ScriptContext, ScriptExecutor, parse};
    use std::sync::Arc;
    use tokio::sync::mpsc::unbounded_channel;

    const BRANCHES: &str = r#"
steps:
  - send: show version
    capture: v
  - if: v contains 1.0
    then:
      - print: match
    else:
      - print: mismatch
"#;

    #[tokio::test]
    async fn test_then_branch() {
        let target = Arc::new(FakeTarget::new().reply("show version", "Version 1.0.3"));
        let (outcome, _) = run_yaml(BRANCHES, target).await;
        assert!(outcome.output.ends_with("match"));
        assert!(!outcome.output.contains("mismatch"));
    }

    #[tokio::test]
    async fn test_else_branch() {
        let target = Arc::new(FakeTarget::new().reply("show version", "Version 2.4"));
        let (outcome, _) = run_yaml(BRANCHES, target).await;
        assert!(outcome.output.ends_with("mismatch"));
    }

    #[tokio::test]
    async fn test_break_propagates_out_of_if() {
        let yaml = r#"
vars:
  items: [a, b, c]
steps:
  - foreach: item in items
    do:
      - if: item == b
        then:
          - break
      - print: ${item}
"#;
        let (outcome, _) = run_yaml(yaml, Arc::new(FakeTarget::new())).await;
        assert!(outcome.success);
        assert_eq!(outcome.output, "a");
    }

    #[tokio::test]
    async fn test_debug_line_shows_raw_and_resolved_condition() {
        let yaml = r#"
steps:
  - send: show version
    capture: v
  - if: ${v} contains 1.0
    then:
      - print: match
"#;
        let target = Arc::new(FakeTarget::new().reply("show version", "Version 1.0.3"));
        let (tx, mut rx) = unbounded_channel();
        let mut ctx = ScriptContext::new("fake:22")
            .with_target(target)
            .with_events(tx)
            .with_debug(true);
        let outcome = ScriptExecutor::new().run(&parse(yaml).unwrap(), &mut ctx).await;
        assert!(outcome.success);

        let mut line = None;
        while let Ok(event) = rx.try_recv() {
            if let Event::Output { text, output_type: OutputType::Debug, .. } = event {
                if text.starts_with("if ") {
                    line = Some(text);
                }
            }
        }
        let line = line.unwrap();
        assert!(line.contains("`${v} contains 1.0`"), "{line}");
        assert!(line.contains("`Version 1.0.3 contains 1.0`"), "{line}");
        assert!(line.ends_with("-> true"), "{line}");
    }
}
