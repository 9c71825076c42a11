//! Test fixtures for script handlers.

use super::{ScriptContext, ScriptExecutor, ScriptOutcome, parse};
use crate::error::SessionError;
use crate::session::{CommandTarget, ExecutionResult, SessionEvent};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Answers commands from a table and records what was sent.
pub(crate) struct FakeTarget {
    replies: HashMap<String, Result<String, ()>>,
    pub(crate) sent: Mutex<Vec<String>>,
    events: broadcast::Sender<SessionEvent>,
}

impl FakeTarget {
    pub(crate) fn new() -> Self {
        Self {
            replies: HashMap::new(),
            sent: Mutex::new(Vec::new()),
            events: broadcast::channel(16).0,
        }
    }

    pub(crate) fn reply(mut self, command: &str, output: &str) -> Self {
        self.replies.insert(command.to_string(), Ok(output.to_string()));
        self
    }

    /// `command` times out.
    pub(crate) fn hang(mut self, command: &str) -> Self {
        self.replies.insert(command.to_string(), Err(()));
        self
    }
}

#[async_trait]
impl CommandTarget for FakeTarget {
    fn host_id(&self) -> &str {
        "fake:22"
    }

    async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        self.sent.lock().push(command.to_string());
        let error = if cancel.is_cancelled() {
            Some(SessionError::Cancelled)
        } else if let Some(Err(())) = self.replies.get(command) {
            Some(SessionError::CommandTimedOut {
                command: command.to_string(),
                timeout,
            })
        } else {
            None
        };
        let output = match self.replies.get(command) {
            Some(Ok(output)) => output.clone(),
            _ => String::new(),
        };
        let now = Utc::now();
        ExecutionResult {
            host_id: "fake:22".into(),
            command: command.to_string(),
            success: error.is_none(),
            output,
            error,
            started_at: now,
            finished_at: now,
            duration: Duration::ZERO,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// Parse `yaml` and run it against `target`.
pub(crate) async fn run_yaml(yaml: &str, target: Arc<FakeTarget>) -> (ScriptOutcome, ScriptContext) {
    let script = parse(yaml).unwrap();
    let mut ctx = ScriptContext::new("fake:22").with_target(target);
    let outcome = ScriptExecutor::new().run(&script, &mut ctx).await;
    (outcome, ctx)
}
