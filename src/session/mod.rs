//! Per-host interactive shell sessions.
//!
//! A [`Session`] owns one open [`ShellChannel`] and turns its raw byte stream
//! into command results. Completion is decided on a fixed poll tick:
//!
//! 1. hard timeout, then cancellation;
//! 2. new data resets any pending prompt candidate;
//! 3. a pager marker is dismissed with a keystroke and stripped;
//! 4. the known prompt at the buffer tail completes the command;
//! 5. otherwise a prompt-looking tail becomes a *candidate* that must survive
//!    a quiet period before it is trusted (and adopted if it differs from
//!    the known prompt, e.g. after `enable`);
//! 6. after a longer idle period one last detection pass runs over the tail.
//!    A prompt-looking line it finds above the final line completes the
//!    command but never replaces the known prompt.
//!
//! Output is suppressed while the session initializes and between commands
//! so banners and late bytes never reach listeners or the next result.

mod pool;

pub use pool::{PoolLease, SessionPool};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::host::{HostConfig, HostId};
use crate::normalize::{StreamDecoder, normalize};
use crate::pager::{
    DISMISS_KEY, contains_pager_prompt, strip_pager_artifacts, strip_pager_dismissal_artifacts,
};
use crate::prompt::{PromptMatcher, tail, tail_prompt, try_detect_prompt};
use crate::transport::{Connector, ShellChannel, ShellWriter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Mutex, broadcast};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pager markers are only looked for on the last line within this many
/// characters of the end of the buffer.
const PAGER_TAIL_CHARS: usize = 256;
const EVENT_CAPACITY: usize = 256;

#[allow(clippy::expect_used)]
static PASSWORD_PROMPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:password|passcode)[^:\r\n]*:\s*$").expect("constant regex pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Initializing,
    Ready,
    Executing,
    Closed,
}

/// Published on a session's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Sanitized output received while a command runs with live streaming on.
    Output(String),
    /// Engine diagnostics (pager dismissals, prompt adoption).
    Debug(String),
    State(SessionState),
}

/// Outcome of one command.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub host_id: HostId,
    pub command: String,
    pub success: bool,
    pub output: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<SessionError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<SessionError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl ExecutionResult {
    pub fn cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(SessionError::is_cancelled)
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    /// A result for a command that never reached a session.
    pub fn failed(host_id: impl Into<HostId>, command: impl Into<String>, error: SessionError) -> Self {
        let now = Utc::now();
        Self {
            host_id: host_id.into(),
            command: command.into(),
            success: false,
            output: String::new(),
            error: Some(error),
            started_at: now,
            finished_at: now,
            duration: Duration::ZERO,
        }
    }
}

/// Something commands can be sent to. Script runs only see this trait.
#[async_trait]
pub trait CommandTarget: Send + Sync {
    fn host_id(&self) -> &str;

    async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecutionResult;

    /// Session events for the duration of one command.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}

/// Which rule decided that the shell is back at a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PromptMatch {
    /// The known prompt ends the buffer.
    Known,
    /// A prompt-looking final line that survived the quiet period.
    Confirmed(String),
    /// A prompt-looking line found by the idle pass. It may sit above
    /// further output, so it is only trusted at the buffer's final line.
    Idle { prompt: String, at_tail: bool },
}

impl PromptMatch {
    /// The prompt the session may switch to, if any.
    fn adoptable(&self) -> Option<&str> {
        match self {
            PromptMatch::Known => None,
            PromptMatch::Confirmed(prompt) => Some(prompt),
            PromptMatch::Idle { prompt, at_tail } => at_tail.then_some(prompt.as_str()),
        }
    }
}

/// Tracks the two-stage prompt model across poll ticks.
#[derive(Debug)]
struct PromptWatch {
    pending_since: Option<Instant>,
    last_data: Instant,
    idle_checked: bool,
    confirm: Duration,
    idle: Duration,
}

impl PromptWatch {
    fn new(now: Instant, config: &SessionConfig) -> Self {
        Self {
            pending_since: None,
            last_data: now,
            idle_checked: false,
            confirm: config.prompt_confirm(),
            idle: config.idle_timeout(),
        }
    }

    /// Output is still flowing, so any candidate was not the final prompt.
    fn data_arrived(&mut self, now: Instant) {
        self.pending_since = None;
        self.last_data = now;
        self.idle_checked = false;
    }

    /// The prompt the buffer currently ends at, once it can be trusted.
    fn check(&mut self, buffer: &str, known: Option<&PromptMatcher>, now: Instant) -> Option<PromptMatch> {
        if let Some(matcher) = known {
            if matcher.ends(buffer) {
                return Some(PromptMatch::Known);
            }
        }

        match self.pending_since {
            None => {
                if tail_prompt(buffer).is_some() {
                    self.pending_since = Some(now);
                    return None;
                }
            }
            Some(since) => {
                let quiet = now.duration_since(since) >= self.confirm
                    && now.duration_since(self.last_data) >= self.confirm;
                if quiet {
                    match tail_prompt(buffer) {
                        Some(prompt) => return Some(PromptMatch::Confirmed(prompt)),
                        None => self.pending_since = None,
                    }
                }
                return None;
            }
        }

        if !self.idle_checked && now.duration_since(self.last_data) >= self.idle {
            self.idle_checked = true;
            let prompt = try_detect_prompt(buffer)?;
            let at_tail = tail_prompt(buffer).as_deref() == Some(prompt.as_str());
            return Some(PromptMatch::Idle { prompt, at_tail });
        }
        None
    }
}

/// Build the result text from a raw command buffer.
///
/// The first line is the command echo. A trailing line matching `prompt` is
/// dropped, as are pager markers and trailing whitespace.
pub fn clean_output(raw: &str, prompt: Option<&PromptMatcher>) -> String {
    let text = normalize(&strip_pager_dismissal_artifacts(raw));
    let mut lines: Vec<&str> = text.lines().skip(1).map(str::trim_end).collect();
    trim_blank_tail(&mut lines);
    if let (Some(last), Some(matcher)) = (lines.last(), prompt) {
        if matcher.matches_line(last) {
            lines.pop();
            trim_blank_tail(&mut lines);
        }
    }
    let (cleaned, _) = strip_pager_artifacts(&lines.join("\n"));
    cleaned.trim_end().to_string()
}

fn trim_blank_tail(lines: &mut Vec<&str>) {
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
}

/// One interactive shell on one host.
pub struct Session {
    host: HostConfig,
    host_id: HostId,
    config: SessionConfig,
    writer: Box<dyn ShellWriter>,
    output: UnboundedReceiver<Vec<u8>>,
    decoder: StreamDecoder,
    buffer: String,
    prompt: Option<PromptMatcher>,
    suppress_output: bool,
    in_flight: bool,
    state: SessionState,
    alive: Arc<AtomicBool>,
    last_used: Instant,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Open a channel to `host` and wait for its first prompt.
    pub async fn connect(
        host: HostConfig,
        connector: &dyn Connector,
        config: SessionConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, SessionError> {
        let host_id = host.id();
        let timeout = config.connect_timeout();
        info!(host = %host_id, "connecting");

        let channel = match tokio::time::timeout(timeout, connector.open(&host)).await {
            Err(_) => return Err(SessionError::ConnectionTimeout { host: host_id, timeout }),
            Ok(Err(e)) => {
                return Err(SessionError::ConnectFailed {
                    host: host_id,
                    message: format!("{e:#}"),
                });
            }
            Ok(Ok(channel)) => channel,
        };

        let mut session = Self::attach(host, channel, config);
        session.set_state(SessionState::Connecting);
        if let Err(e) = session.initialize(cancel).await {
            warn!(host = %session.host_id, error = %e, "initialization failed");
            session.close();
            return Err(e);
        }
        Ok(session)
    }

    /// Wrap an already open channel. Call [`initialize`](Self::initialize)
    /// before executing commands.
    pub fn attach(host: HostConfig, channel: ShellChannel, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            host_id: host.id(),
            host,
            config,
            writer: channel.writer,
            output: channel.output,
            decoder: StreamDecoder::new(),
            buffer: String::new(),
            prompt: None,
            suppress_output: true,
            in_flight: false,
            state: SessionState::Disconnected,
            alive: Arc::new(AtomicBool::new(true)),
            last_used: Instant::now(),
            events,
        }
    }

    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The prompt literal commands currently complete on.
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_ref().map(PromptMatcher::literal)
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Provoke and confirm the first prompt, answering a password prompt and
    /// dismissing MOTD pagination on the way. Everything read here is
    /// discarded.
    pub async fn initialize(&mut self, cancel: &CancellationToken) -> Result<(), SessionError> {
        self.set_state(SessionState::Initializing);
        self.suppress_output = true;
        self.write(b"\n")?;

        let timeout = self.config.init_timeout();
        let start = Instant::now();
        let deadline = start + timeout;
        let mut watch = PromptWatch::new(start, &self.config);
        let mut ticker = self.ticker();
        let mut password_sent = false;
        let mut pages = 0;

        loop {
            ticker.tick().await;
            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::PromptDetectionFailed {
                    host: self.host_id.clone(),
                    timeout,
                });
            }
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            if self.pump()? {
                watch.data_arrived(now);
            }

            if PASSWORD_PROMPT.is_match(&normalize(tail(&self.buffer, PAGER_TAIL_CHARS))) {
                let Some(password) = self.host.password.clone() else {
                    return Err(SessionError::AuthenticationFailed {
                        host: self.host_id.clone(),
                        message: "password requested but none configured".into(),
                    });
                };
                if password_sent {
                    return Err(SessionError::AuthenticationFailed {
                        host: self.host_id.clone(),
                        message: "password rejected".into(),
                    });
                }
                debug!(host = %self.host_id, "answering password prompt");
                self.buffer.clear();
                self.write(format!("{password}\n").as_bytes())?;
                password_sent = true;
                continue;
            }

            if pages < self.config.max_pages
                && contains_pager_prompt(tail(&self.buffer, PAGER_TAIL_CHARS))
            {
                pages += 1;
                self.dismiss_pager()?;
                continue;
            }

            if let Some(found) = watch.check(&self.buffer, self.prompt.as_ref(), now) {
                // With no prompt known yet, an idle match is adopted wherever it sits.
                let first = match &found {
                    PromptMatch::Idle { prompt, .. } if self.prompt.is_none() => Some(prompt.as_str()),
                    _ => found.adoptable(),
                };
                if let Some(prompt) = first {
                    self.adopt_prompt(prompt);
                }
                break;
            }
        }

        self.buffer.clear();
        self.last_used = Instant::now();
        self.set_state(SessionState::Ready);
        info!(host = %self.host_id, prompt = ?self.prompt(), "session ready");
        Ok(())
    }

    /// Send `command` and wait until the shell is back at a prompt.
    ///
    /// Never panics or returns early on failure: the result carries the
    /// error and whatever output was captured before it.
    pub async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let start = Instant::now();
        debug!(host = %self.host_id, %command, "executing");

        let outcome = self.run(command, timeout, cancel).await;

        self.in_flight = false;
        self.suppress_output = true;
        self.last_used = Instant::now();
        let output = clean_output(&self.buffer, self.prompt.as_ref());
        self.buffer.clear();
        if self.state == SessionState::Executing {
            self.set_state(SessionState::Ready);
        }

        if let Err(e) = &outcome {
            warn!(host = %self.host_id, %command, error = %e, "command failed");
        }
        ExecutionResult {
            host_id: self.host_id.clone(),
            command: command.to_string(),
            success: outcome.is_ok(),
            output,
            error: outcome.err(),
            started_at,
            finished_at: Utc::now(),
            duration: start.elapsed(),
        }
    }

    async fn run(
        &mut self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Ready) || self.in_flight {
            return Err(SessionError::NotConnected {
                host: self.host_id.clone(),
            });
        }

        // Late bytes from the previous command belong to nobody.
        self.pump()?;
        self.buffer.clear();
        self.in_flight = true;
        self.set_state(SessionState::Executing);
        self.suppress_output = !self.config.stream_live_output;
        self.write(format!("{command}\n").as_bytes())?;

        let start = Instant::now();
        let deadline = start + timeout;
        let mut watch = PromptWatch::new(start, &self.config);
        let mut ticker = self.ticker();
        let mut pages = 0;
        let mut pager_dismissed = false;

        loop {
            ticker.tick().await;
            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::CommandTimedOut {
                    command: command.to_string(),
                    timeout,
                });
            }
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            let fresh = self.pump()?;
            if fresh {
                watch.data_arrived(now);
            }

            if pages < self.config.max_pages
                && contains_pager_prompt(tail(&self.buffer, PAGER_TAIL_CHARS))
            {
                pages += 1;
                self.dismiss_pager()?;
                pager_dismissed = true;
                continue;
            }

            if pager_dismissed && fresh {
                self.buffer = strip_pager_dismissal_artifacts(&self.buffer);
                pager_dismissed = false;
            }

            if let Some(found) = watch.check(&self.buffer, self.prompt.as_ref(), now) {
                match found.adoptable() {
                    Some(prompt) => self.adopt_prompt(prompt),
                    None => {
                        if let PromptMatch::Idle { prompt, .. } = &found {
                            debug!(host = %self.host_id, %prompt, "completed on idle, prompt kept");
                        }
                    }
                }
                return Ok(());
            }
        }
    }

    /// Close the channel. The session cannot be used afterwards.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Err(e) = self.writer.close() {
            debug!(host = %self.host_id, "close: {e:#}");
        }
        self.alive.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Closed);
        info!(host = %self.host_id, "session closed");
    }

    fn ticker(&self) -> tokio::time::Interval {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Move every chunk received so far into the buffer. Returns whether
    /// anything arrived.
    fn pump(&mut self) -> Result<bool, SessionError> {
        let mut received = false;
        loop {
            match self.output.try_recv() {
                Ok(chunk) => {
                    received = true;
                    let text = self.decoder.decode(&chunk);
                    let live = self.decoder.sanitize_chunk(&text);
                    if !self.suppress_output && !live.is_empty() {
                        let _ = self.events.send(SessionEvent::Output(live));
                    }
                    self.buffer.push_str(&text);
                }
                Err(TryRecvError::Empty) => return Ok(received),
                Err(TryRecvError::Disconnected) => {
                    // Give whatever arrived with the hang-up one more tick.
                    if received {
                        return Ok(true);
                    }
                    return Err(self.transport_closed());
                }
            }
        }
    }

    fn transport_closed(&mut self) -> SessionError {
        self.alive.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Closed);
        let text = normalize(tail(&self.buffer, PAGER_TAIL_CHARS));
        let detail = text
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string();
        SessionError::TransportClosed {
            host: self.host_id.clone(),
            detail,
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.writer.write(data).map_err(|e| SessionError::WriteFailed {
            host: self.host_id.clone(),
            message: format!("{e:#}"),
        })
    }

    fn dismiss_pager(&mut self) -> Result<(), SessionError> {
        let (cleaned, _) = strip_pager_artifacts(&self.buffer);
        self.buffer = cleaned;
        self.write(DISMISS_KEY)?;
        self.publish_debug("pager dismissed".to_string());
        Ok(())
    }

    /// Replace the known prompt only when a different one was confirmed.
    fn adopt_prompt(&mut self, prompt: &str) {
        if self.prompt.as_ref().is_some_and(|m| m.literal() == prompt) {
            return;
        }
        match PromptMatcher::new(prompt) {
            Ok(matcher) => {
                debug!(host = %self.host_id, %prompt, "prompt adopted");
                self.publish_debug(format!("prompt adopted: {prompt}"));
                self.prompt = Some(matcher);
            }
            Err(e) => warn!(host = %self.host_id, %prompt, "unusable prompt: {e}"),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        let _ = self.events.send(SessionEvent::State(state));
    }

    fn publish_debug(&self, message: String) {
        let _ = self.events.send(SessionEvent::Debug(message));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// A cloneable, lockable handle to a [`Session`].
///
/// Commands on one session are serialized by the handle's lock.
#[derive(Clone)]
pub struct SessionHandle {
    host_id: HostId,
    inner: Arc<Mutex<Session>>,
    events: broadcast::Sender<SessionEvent>,
    alive: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            host_id: session.host_id.clone(),
            events: session.events.clone(),
            alive: Arc::clone(&session.alive),
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// False once the transport closed or the session was closed.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub async fn execute(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        self.inner.lock().await.execute(command, timeout, cancel).await
    }

    pub async fn close(&self) {
        self.inner.lock().await.close();
    }

    pub async fn prompt(&self) -> Option<String> {
        self.inner.lock().await.prompt().map(str::to_string)
    }
}

#[async_trait]
impl CommandTarget for SessionHandle {
    fn host_id(&self) -> &str {
        &self.host_id
    }

    async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        self.execute(command, timeout, cancel).await
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
