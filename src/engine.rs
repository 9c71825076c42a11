//! The command surface a front end drives.
//!
//! An [`Engine`] owns the session pool and the event channel. Every
//! operation reports what happens through [`Event`]s keyed by host, so a
//! front end can render a live table while runs proceed in parallel.

use crate::config::Config;
use crate::error::{EngineError, SessionError};
use crate::event::{CompletionEvent, Event, EventReceiver, EventSender, OutputType, ProgressStatus};
use crate::host::{HostConfig, HostId};
use crate::input::InputProvider;
use crate::script::{Script, ScriptContext, ScriptExecutor, parse_input, validate};
use crate::session::{ExecutionResult, PoolLease, Session, SessionHandle, SessionPool};
use crate::transport::Connector;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Drives sessions and scripts on many hosts.
///
/// Cheap to clone; clones share the pool, the event channel and the
/// cancellation state.
#[derive(Clone)]
pub struct Engine {
    config: Arc<Config>,
    connector: Arc<dyn Connector>,
    pool: Arc<SessionPool>,
    events: EventSender,
    cancel: Arc<Mutex<CancellationToken>>,
    shutdown: CancellationToken,
    debug: Arc<AtomicBool>,
    input: Option<Arc<dyn InputProvider>>,
    executor: Arc<ScriptExecutor>,
    slots: Arc<Semaphore>,
}

/// A session borrowed for one run.
struct Borrowed {
    handle: SessionHandle,
    /// `None` when pooling is off and the session is closed after the run.
    lease: Option<PoolLease>,
}

impl Engine {
    /// Create an engine and the receiver for its events.
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> (Self, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let engine = Self {
            pool: Arc::new(SessionPool::new(config.pool.clone())),
            slots: Arc::new(Semaphore::new(config.max_parallel_hosts.max(1))),
            config: Arc::new(config),
            connector,
            events,
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            shutdown: CancellationToken::new(),
            debug: Arc::new(AtomicBool::new(false)),
            input: None,
            executor: Arc::new(ScriptExecutor::new()),
        };
        (engine, receiver)
    }

    /// Answer `input` steps with `provider`. Without one, defaults are used.
    pub fn with_input_provider(mut self, provider: Arc<dyn InputProvider>) -> Self {
        self.input = Some(provider);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start closing idle pooled sessions in the background.
    pub fn start_reaper(&self) -> Option<JoinHandle<()>> {
        self.config
            .pool
            .enabled
            .then(|| self.pool.spawn_reaper(self.shutdown.clone()))
    }

    pub fn is_connected(&self, host_id: &str) -> bool {
        self.pool.checkout(host_id).is_some()
    }

    /// Open a session to `host` and keep it for later commands and runs.
    ///
    /// An existing live session for the same host is reused.
    pub async fn connect(&self, host: HostConfig) -> Result<HostId, SessionError> {
        let host_id = host.id();
        if self.is_connected(&host_id) {
            debug!(host = %host_id, "already connected");
            return Ok(host_id);
        }
        let cancel = self.run_token();
        let handle = self.open(host, &cancel).await?;
        if let Some(old) = self.pool.insert(handle) {
            old.close().await;
        }
        Ok(host_id)
    }

    /// Close the session for `host_id`. Returns false if there was none.
    pub async fn disconnect(&self, host_id: &str) -> bool {
        let Some(handle) = self.pool.remove(host_id) else {
            return false;
        };
        handle.close().await;
        info!(host = %host_id, "disconnected");
        self.send(Event::progress(host_id, ProgressStatus::Disconnected));
        true
    }

    /// Run one command on a connected host.
    pub async fn execute(
        &self,
        host_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        let Some(lease) = self.pool.checkout(host_id) else {
            let error = SessionError::NotConnected { host: host_id.to_string() };
            self.output(host_id, None, error.to_string(), OutputType::Error);
            return ExecutionResult::failed(host_id, command, error);
        };
        let cancel = self.run_token();
        let timeout = timeout.unwrap_or_else(|| self.config.session.command_timeout());

        self.output(host_id, None, command, OutputType::Command);
        let result = lease.execute(command, timeout, &cancel).await;
        if !result.output.is_empty() {
            self.output(host_id, None, result.output.clone(), OutputType::CommandOutput);
        }
        if let Some(message) = result.error_message() {
            self.output(host_id, None, message, OutputType::Error);
        }
        if !lease.is_alive() {
            self.send(Event::progress(host_id, ProgressStatus::Disconnected));
        }
        result
    }

    /// Run a script, or a plain list of commands, on every host in parallel.
    ///
    /// The text is parsed once before any host starts; a parse failure
    /// rejects the whole batch. After that each host succeeds or fails on
    /// its own and gets exactly one completion event. Completions are
    /// returned in the order of `hosts`.
    pub async fn execute_on_hosts(
        &self,
        hosts: Vec<HostConfig>,
        text: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<CompletionEvent>, EngineError> {
        if hosts.is_empty() {
            return Err(EngineError::NoHosts);
        }
        let script = Arc::new(parse_input(text)?);
        for issue in validate(&script) {
            warn!(%issue, "script validation");
        }
        let cancel = self.run_token();
        info!(hosts = hosts.len(), steps = script.steps.len(), "starting batch");

        let tasks: Vec<(HostId, JoinHandle<CompletionEvent>)> = hosts
            .into_iter()
            .map(|host| {
                let engine = self.clone();
                let script = Arc::clone(&script);
                let cancel = cancel.clone();
                let host_id = host.id();
                let task = tokio::spawn(async move { engine.run_host(host, &script, timeout, &cancel).await });
                (host_id, task)
            })
            .collect();

        let mut completions = Vec::with_capacity(tasks.len());
        for (host_id, task) in tasks {
            let completion = match task.await {
                Ok(completion) => completion,
                Err(e) => {
                    warn!(host = %host_id, error = %e, "host run aborted");
                    let completion = CompletionEvent {
                        host_id: host_id.clone(),
                        run_id: Uuid::new_v4(),
                        success: false,
                        cancelled: false,
                        output: String::new(),
                        error_message: Some(format!("run aborted: {e}")),
                        timestamp: Utc::now(),
                        duration: None,
                    };
                    self.send(Event::progress(&host_id, ProgressStatus::Error));
                    self.send(Event::Completion(completion.clone()));
                    completion
                }
            };
            completions.push(completion);
        }
        Ok(completions)
    }

    /// Cancel every running command and script.
    ///
    /// Sessions stay open; the next operation starts with a fresh token.
    pub fn cancel(&self) {
        info!("cancelling running operations");
        self.cancel.lock().cancel();
    }

    /// Emit debug lines for runs started from now on.
    pub fn set_debug_mode(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::SeqCst);
    }

    pub fn debug_mode(&self) -> bool {
        self.debug.load(Ordering::SeqCst)
    }

    /// Stop the reaper and close every pooled session.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.pool.close_all().await;
    }

    /// The current cancellation token, replaced first if already cancelled.
    fn run_token(&self) -> CancellationToken {
        let mut token = self.cancel.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    fn send(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn output(&self, host_id: &str, run_id: Option<Uuid>, text: impl Into<String>, kind: OutputType) {
        self.send(Event::output(host_id, run_id, text, kind));
    }

    /// Connect a new session, reporting progress.
    async fn open(&self, host: HostConfig, cancel: &CancellationToken) -> Result<SessionHandle, SessionError> {
        let host_id = host.id();
        self.send(Event::progress(&host_id, ProgressStatus::Connecting));
        match Session::connect(host, self.connector.as_ref(), self.config.session.clone(), cancel).await {
            Ok(session) => {
                let prompt = session.prompt().unwrap_or_default().to_string();
                info!(host = %host_id, %prompt, "connected");
                self.output(&host_id, None, format!("connected, prompt `{prompt}`"), OutputType::Success);
                Ok(SessionHandle::new(session))
            }
            Err(e) => {
                warn!(host = %host_id, error = %e, "connect failed");
                self.output(&host_id, None, e.to_string(), OutputType::Error);
                self.send(Event::progress(&host_id, ProgressStatus::Error));
                Err(e)
            }
        }
    }

    /// A pooled session for `host`, connecting one if needed.
    async fn borrow(&self, host: &HostConfig, cancel: &CancellationToken) -> Result<Borrowed, SessionError> {
        let host_id = host.id();
        if let Some(lease) = self.pool.checkout(&host_id) {
            debug!(host = %host_id, "reusing pooled session");
            return Ok(Borrowed {
                handle: SessionHandle::clone(&lease),
                lease: Some(lease),
            });
        }
        let handle = self.open(host.clone(), cancel).await?;
        if !self.pool.config().enabled {
            return Ok(Borrowed { handle, lease: None });
        }
        if let Some(old) = self.pool.insert(handle.clone()) {
            old.close().await;
        }
        Ok(Borrowed {
            lease: self.pool.checkout(&host_id),
            handle,
        })
    }

    async fn run_host(
        &self,
        host: HostConfig,
        script: &Script,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> CompletionEvent {
        let host_id = host.id();
        let run_id = Uuid::new_v4();
        let start = Instant::now();
        let _slot = self.slots.acquire().await.ok();

        if cancel.is_cancelled() {
            return self.fail(&host_id, run_id, start, SessionError::Cancelled);
        }
        let borrowed = match self.borrow(&host, cancel).await {
            Ok(borrowed) => borrowed,
            Err(e) => return self.fail(&host_id, run_id, start, e),
        };
        self.send(Event::progress(&host_id, ProgressStatus::Running));

        let mut ctx = ScriptContext::new(host_id.clone())
            .with_events(self.events.clone())
            .with_target(Arc::new(borrowed.handle.clone()))
            .with_cancel(cancel.clone())
            .with_debug(self.debug_mode())
            .with_command_timeout(timeout.unwrap_or_else(|| self.config.session.command_timeout()))
            .with_run_id(run_id);
        if let Some(input) = &self.input {
            ctx = ctx.with_input(Arc::clone(input));
        }
        if let Some(label) = &host.label {
            ctx = ctx.with_row(label.clone());
        }
        seed_host_vars(&mut ctx, &host);

        let outcome = self.executor.run(script, &mut ctx).await;
        debug!(host = %host_id, success = outcome.success, ms = outcome.duration.as_millis() as u64, "run finished");

        let alive = borrowed.handle.is_alive();
        if borrowed.lease.is_none() {
            borrowed.handle.close().await;
        }
        drop(borrowed);
        if !alive {
            self.send(Event::progress(&host_id, ProgressStatus::Disconnected));
        }

        let error_message = if outcome.success {
            None
        } else if outcome.cancelled {
            Some(SessionError::Cancelled.to_string())
        } else {
            Some(outcome.error.unwrap_or_else(|| "script failed".into()))
        };
        self.finish(CompletionEvent {
            host_id,
            run_id,
            success: outcome.success,
            cancelled: outcome.cancelled,
            output: outcome.output,
            error_message,
            timestamp: Utc::now(),
            duration: Some(start.elapsed()),
        })
    }

    /// Completion for a run that never reached its first step.
    fn fail(&self, host_id: &str, run_id: Uuid, start: Instant, error: SessionError) -> CompletionEvent {
        self.finish(CompletionEvent {
            host_id: host_id.to_string(),
            run_id,
            success: false,
            cancelled: error.is_cancelled(),
            output: String::new(),
            error_message: Some(error.to_string()),
            timestamp: Utc::now(),
            duration: Some(start.elapsed()),
        })
    }

    fn finish(&self, completion: CompletionEvent) -> CompletionEvent {
        let status = if completion.success {
            ProgressStatus::Success
        } else {
            ProgressStatus::Error
        };
        info!(host = %completion.host_id, success = completion.success, cancelled = completion.cancelled, "host complete");
        self.send(Event::progress(&completion.host_id, status));
        self.send(Event::Completion(completion.clone()));
        completion
    }
}

/// Variables every run starts with. Host-table variables win over the
/// built-ins; script defaults only fill what is still unset.
fn seed_host_vars(ctx: &mut ScriptContext, host: &HostConfig) {
    ctx.set("host", host.address.as_str());
    ctx.set("host_address", host.address.as_str());
    ctx.set("host_port", f64::from(host.port));
    ctx.set("host_user", host.username.clone().unwrap_or_default());
    if let Some(label) = &host.label {
        ctx.set("host_label", label.as_str());
    }
    for (name, value) in &host.vars {
        ctx.set(name, value.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::script::Value;
    use crate::transport::{Reply, ScriptedConnector};

    fn test_config() -> Config {
        Config {
            session: SessionConfig {
                connect_timeout_ms: 1_000,
                init_timeout_ms: 1_000,
                command_timeout_ms: 2_000,
                idle_timeout_ms: 500,
                prompt_confirm_ms: 20,
                poll_interval_ms: 5,
                ..SessionConfig::default()
            },
            ..Config::default()
        }
    }

    fn engine(device: ScriptedConnector) -> (Engine, EventReceiver) {
        Engine::new(test_config(), Arc::new(device))
    }

    fn drain(rx: &mut EventReceiver) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_connect_execute_disconnect() {
        let device = ScriptedConnector::new("r1#").respond("show clock", Reply::text("12:00"));
        let (engine, mut rx) = engine(device);

        let host_id = engine.connect(HostConfig::new("r1")).await.unwrap();
        assert_eq!(host_id, "r1:22");
        assert!(engine.is_connected(&host_id));

        let result = engine.execute(&host_id, "show clock", None).await;
        assert!(result.success);
        assert_eq!(result.output, "12:00");

        assert!(engine.disconnect(&host_id).await);
        assert!(!engine.disconnect(&host_id).await);
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(Event::Progress { status: ProgressStatus::Disconnected, .. })
        ));
    }

    #[tokio::test]
    async fn test_execute_without_session() {
        let (engine, _rx) = engine(ScriptedConnector::new("r1#"));
        let result = engine.execute("r9:22", "show clock", None).await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(SessionError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error() {
        let (engine, mut rx) = engine(ScriptedConnector::new("#").refuse("Connection refused"));
        let err = engine.connect(HostConfig::new("r1")).await.unwrap_err();
        assert!(matches!(err, SessionError::ConnectFailed { .. }));
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, Event::Progress { status: ProgressStatus::Error, .. })));
    }

    #[tokio::test]
    async fn test_parse_error_rejects_batch() {
        let (engine, mut rx) = engine(ScriptedConnector::new("r1#"));
        let err = engine
            .execute_on_hosts(vec![HostConfig::new("r1")], "steps:\n  - launch: now\n", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_host_vars_seeded() {
        let device = ScriptedConnector::new("r1#");
        let (engine, _rx) = engine(device);
        let host = HostConfig::new("10.0.0.1").with_username("admin").with_var("site", "ams1");
        let completions = engine
            .execute_on_hosts(vec![host], "steps:\n  - print: ${host_user}@${host}:${host_port} ${site}\n", None)
            .await
            .unwrap();
        assert!(completions[0].success);
        assert_eq!(completions[0].output, "admin@10.0.0.1:22 ams1");
    }

    #[tokio::test]
    async fn test_runs_reuse_pooled_session() {
        let device = ScriptedConnector::new("r1#").respond("show clock", Reply::text("12:00"));
        let (engine, mut rx) = engine(device);
        for _ in 0..2 {
            let completions = engine
                .execute_on_hosts(vec![HostConfig::new("r1")], "show clock\n", None)
                .await
                .unwrap();
            assert!(completions[0].success);
        }
        let connects = drain(&mut rx)
            .iter()
            .filter(|e| matches!(e, Event::Progress { status: ProgressStatus::Connecting, .. }))
            .count();
        assert_eq!(connects, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_batch_does_not_stick() {
        let (engine, _rx) = engine(ScriptedConnector::new("r1#"));
        engine.cancel();
        let completions = engine
            .execute_on_hosts(vec![HostConfig::new("r1")], "steps:\n  - set: x = 1\n", None)
            .await
            .unwrap();
        assert!(completions[0].success);
    }

    #[test]
    fn test_seed_host_vars() {
        let host = HostConfig::new("r1").with_port(2222).with_var("host", "override");
        let mut ctx = ScriptContext::new(host.id());
        seed_host_vars(&mut ctx, &host);
        assert_eq!(ctx.get("host"), Some(&Value::from("override")));
        assert_eq!(ctx.get("host_port"), Some(&Value::Number(2222.0)));
        assert_eq!(ctx.get("host_user"), Some(&Value::from("")));
    }
}
