//! [`SendCommand`] runs a command on the host's session.
//!
//! Script syntax:
//! - `- send: show version`
//! - `- send: show interface ${port}` with sibling options `capture: out`,
//!   `suppress: true`, `expect: 'line protocol is up'`, `timeout: 10s`
//!
//! The cleaned output is always stored in `_output`.

use crate::event::OutputType;
use crate::script::command::{CommandResult, StepExecutor, StepHandler};
use crate::script::context::ScriptContext;
use crate::script::parser::StepFields;
use crate::script::{Step, StepKind};
use crate::error::ScriptParseError;
use crate::session::SessionEvent;
use async_trait::async_trait;
use regex::Regex;
use tokio::sync::broadcast::Receiver;

pub struct SendCommand;

impl SendCommand {
    pub const NAME: &'static str = "send";
}

/// Pass a session event on to the run's listeners.
fn forward(ctx: &mut ScriptContext, event: SessionEvent, suppress: bool, streamed: &mut bool) {
    match event {
        SessionEvent::Output(text) => {
            *streamed = true;
            if !suppress {
                ctx.stream(text, OutputType::CommandOutput);
            }
        }
        SessionEvent::Debug(message) => ctx.debug(|| message),
        SessionEvent::State(_) => {}
    }
}

fn drain(ctx: &mut ScriptContext, live: &mut Receiver<SessionEvent>, suppress: bool, streamed: &mut bool) {
    while let Ok(event) = live.try_recv() {
        forward(ctx, event, suppress, streamed);
    }
}

#[async_trait]
impl StepHandler for SendCommand {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(fields: &StepFields<'_>) -> Result<StepKind, ScriptParseError> {
        let command = fields
            .scalar_or(&["command", "cmd"])
            .ok_or_else(|| fields.error("expected a command"))?;
        Ok(StepKind::Send { command })
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ScriptContext,
        _executor: &dyn StepExecutor,
    ) -> CommandResult {
        let StepKind::Send { command } = &step.kind else {
            return CommandResult::failed("not a send step");
        };
        let command = ctx.substitute(command);
        let Some(target) = ctx.target() else {
            return CommandResult::failed("no session to send to");
        };

        if !step.suppress {
            ctx.emit(command.clone(), OutputType::Command);
        }
        let timeout = step.timeout.unwrap_or_else(|| ctx.command_timeout());
        let cancel = ctx.cancel_token().clone();
        let mut live = target.subscribe();
        let mut streamed = false;

        let run = target.run_command(&command, timeout, &cancel);
        tokio::pin!(run);
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                Ok(event) = live.recv() => forward(ctx, event, step.suppress, &mut streamed),
            }
        };
        drain(ctx, &mut live, step.suppress, &mut streamed);

        ctx.set("_output", result.output.clone());
        if let Some(var) = &step.capture {
            ctx.set(var, result.output.clone());
        }
        ctx.debug(|| {
            format!(
                "send `{command}`: success={} in {}ms, {} chars{}",
                result.success,
                result.duration.as_millis(),
                result.output.len(),
                step.capture
                    .as_ref()
                    .map(|v| format!(", captured into {v}"))
                    .unwrap_or_default()
            )
        });

        if !step.suppress && !result.output.is_empty() {
            if streamed {
                ctx.record(result.output.clone());
            } else {
                ctx.emit(result.output.clone(), OutputType::CommandOutput);
            }
        }

        if result.cancelled() {
            return CommandResult::cancelled();
        }
        if !result.success {
            return CommandResult::failed(
                result.error_message().unwrap_or_else(|| "command failed".into()),
            );
        }

        if let Some(pattern) = &step.expect {
            let pattern = ctx.substitute(pattern);
            match Regex::new(&pattern) {
                Ok(re) if re.is_match(&result.output) => {}
                Ok(_) => {
                    return CommandResult::failed(format!(
                        "output of `{command}` did not match `{pattern}`"
                    ));
                }
                Err(e) => return CommandResult::failed(format!("invalid expect pattern: {e}")),
            }
        }
        CommandResult::ok()
    }
}

#[cfg(test)]
mod tests {
    use crate::script::Value;
    use crate::script::testing::{FakeTarget, run_yaml};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_send_captures_output() {
        let target = Arc::new(FakeTarget::new().reply("show ip int gi0/1", "10.0.0.1/24"));
        let yaml = "vars:\n  port: gi0/1\nsteps:\n  - send: show ip int ${port}\n    capture: ip\n";
        let (outcome, ctx) = run_yaml(yaml, target.clone()).await;
        assert!(outcome.success);
        assert_eq!(target.sent.lock().as_slice(), ["show ip int gi0/1"]);
        assert_eq!(ctx.get("ip"), Some(&Value::from("10.0.0.1/24")));
        assert_eq!(ctx.get("_output"), Some(&Value::from("10.0.0.1/24")));
        assert_eq!(ctx.output_log(), ["show ip int gi0/1", "10.0.0.1/24"]);
    }

    #[tokio::test]
    async fn test_suppress_hides_command_and_output() {
        let target = Arc::new(FakeTarget::new().reply("show clock", "12:00"));
        let yaml = "steps:\n  - send: show clock\n    suppress: true\n    capture: t\n";
        let (outcome, ctx) = run_yaml(yaml, target).await;
        assert!(outcome.success);
        assert!(ctx.output_log().is_empty());
        assert_eq!(ctx.get("t"), Some(&Value::from("12:00")));
    }

    #[tokio::test]
    async fn test_expect_mismatch_fails() {
        let target = Arc::new(FakeTarget::new().reply("show int", "line protocol is down"));
        let yaml = "steps:\n  - send: show int\n    expect: protocol is up\n";
        let (outcome, _) = run_yaml(yaml, target).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("did not match"));
    }

    #[tokio::test]
    async fn test_plain_string_step_is_send() {
        let target = Arc::new(FakeTarget::new().reply("terminal length 0", ""));
        let (outcome, _) = run_yaml("steps:\n  - terminal length 0\n", target.clone()).await;
        assert!(outcome.success);
        assert_eq!(target.sent.lock().len(), 1);
    }
}
