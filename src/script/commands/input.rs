//! [`InputCommand`] asks the operator for a value.
//!
//! Script syntax:
//! ```yaml
//! - input:
//!     prompt: VLAN for ${host}?
//!     into: vlan
//!     default: "10"
//!     validate: '^\d+$'
//!     error_message: VLAN must be numeric
//! ```
//!
//! Without an input provider the default is used.

use crate::error::ScriptParseError;
use crate::input::InputRequest;
use crate::script::command::{CommandResult, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::parser::StepFields;
use crate::script::{Step, StepKind};
use async_trait::async_trait;
use regex::Regex;

pub struct InputCommand;

impl InputCommand {
    pub const NAME: &'static str = "input";
}

#[async_trait]
impl StepHandler for InputCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        Ok(StepKind::Input {
            prompt: fields.scalar_or(&["prompt", "message"]).unwrap_or_default(),
            into: fields
                .string("into")
                .or_else(|| fields.string("variable"))
                .unwrap_or_default(),
            default: fields.string("default"),
            validate: fields.string("validate"),
            error_message: fields.string("error_message"),
        })
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        _executor: &dyn StepExecutor,
    ) -> CommandResult {
        let StepKind::Input { prompt, into, default, validate, error_message } = &step.kind else {
            return CommandResult::failed("not an input step");
        };
        if into.trim().is_empty() {
            return CommandResult::failed("missing `into` variable");
        }
        let prompt = ctx.substitute(prompt);
        let default = default.as_deref().map(|d| ctx.substitute(d));

        let answer = match ctx.input() {
            None => default.clone().unwrap_or_default(),
            Some(provider) => {
                let request = InputRequest {
                    host_id: ctx.host_id().to_string(),
                    prompt: prompt.clone(),
                    default: default.clone(),
                };
                let cancel = ctx.cancel_token().clone();
                let response = tokio::select! {
                    response = provider.request_input(request) => response,
                    _ = cancel.cancelled() => return CommandResult::cancelled(),
                };
                match response {
                    None => return CommandResult::failed("input cancelled"),
                    Some(text) if text.is_empty() => default.clone().unwrap_or_default(),
                    Some(text) => text,
                }
            }
        };

        if let Some(pattern) = validate {
            match Regex::new(&ctx.substitute(pattern)) {
                Ok(re) if re.is_match(&answer) => {}
                Ok(_) => {
                    let message = error_message
                        .as_deref()
                        .map(|m| ctx.substitute(m))
                        .unwrap_or_else(|| format!("`{answer}` is not valid for {into}"));
                    return CommandResult::failed(message);
                }
                Err(e) => return CommandResult::failed(format!("invalid validate pattern: {e}")),
            }
        }

        ctx.debug(|| format!("input `{prompt}` -> {into} = `{answer}`"));
        ctx.set(into, answer);
        CommandResult::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputProvider;
    use crate::script::{ScriptExecutor, Value, parse};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Canned {
        answer: Option<String>,
        seen: Mutex<Vec<InputRequest>>,
    }

    #[async_trait]
    impl InputProvider for Canned {
        async fn request_input(&self, request: InputRequest) -> Option<String> {
            self.seen.lock().push(request);
            self.answer.clone()
        }
    }

    const YAML: &str = r#"
vars:
  site: ams1
steps:
  - input:
      prompt: VLAN for ${site}?
      into: vlan
      default: "10"
      validate: '^\d+$'
      error_message: VLAN must be numeric
"#;

    async fn run(answer: Option<&str>) -> (bool, Option<String>, ScriptContext, Arc<Canned>) {
        let canned = Arc::new(Canned {
            answer: answer.map(str::to_string),
            seen: Mutex::new(Vec::new()),
        });
        let mut ctx = ScriptContext::new("r1:22").with_input(canned.clone());
        let outcome = ScriptExecutor::new().run(&parse(YAML).unwrap(), &mut ctx).await;
        (outcome.success, outcome.error, ctx, canned)
    }

    #[tokio::test]
    async fn test_answer_is_stored() {
        let (success, _, ctx, canned) = run(Some("200")).await;
        assert!(success);
        assert_eq!(ctx.get("vlan"), Some(&Value::from("200")));
        let seen = canned.seen.lock();
        assert_eq!(seen[0].prompt, "VLAN for ams1?");
        assert_eq!(seen[0].default.as_deref(), Some("10"));
    }

    #[tokio::test]
    async fn test_empty_answer_takes_default() {
        let (success, _, ctx, _) = run(Some("")).await;
        assert!(success);
        assert_eq!(ctx.get("vlan"), Some(&Value::from("10")));
    }

    #[tokio::test]
    async fn test_validation_failure() {
        let (success, error, _, _) = run(Some("ten")).await;
        assert!(!success);
        assert_eq!(error.as_deref(), Some("VLAN must be numeric"));
    }

    #[tokio::test]
    async fn test_dismissed_prompt_fails() {
        let (success, error, _, _) = run(None).await;
        assert!(!success);
        assert_eq!(error.as_deref(), Some("input cancelled"));
    }

    #[tokio::test]
    async fn test_no_provider_uses_default() {
        let mut ctx = ScriptContext::new("r1:22");
        let outcome = ScriptExecutor::new().run(&parse(YAML).unwrap(), &mut ctx).await;
        assert!(outcome.success);
        assert_eq!(ctx.get("vlan"), Some(&Value::from("10")));
    }
}
