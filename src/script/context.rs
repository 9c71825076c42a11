use super::value::Value;
use crate::event::{Event, EventSender, OutputType};
use crate::host::HostId;
use crate::input::InputProvider;
use crate::session::CommandTarget;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// `${name}` or `${name[index]}`.
#[allow(clippy::expect_used)]
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*([A-Za-z_][\w.-]*)\s*(?:\[\s*([^\]]*?)\s*\])?\s*\}")
        .expect("constant regex pattern is valid")
});

/// State threaded through one script run on one host.
///
/// Variables live in a single flat namespace; names are case-insensitive
/// but keep the spelling they were first set with.
pub struct ScriptContext {
    vars: HashMap<String, (String, Value)>,
    output: Vec<String>,
    debug: bool,
    host_id: HostId,
    run_id: Uuid,
    row: Option<String>,
    events: Option<EventSender>,
    target: Option<Arc<dyn CommandTarget>>,
    input: Option<Arc<dyn InputProvider>>,
    cancel: CancellationToken,
    command_timeout: Duration,
}

impl ScriptContext {
    pub fn new(host_id: impl Into<HostId>) -> Self {
        Self {
            vars: HashMap::new(),
            output: Vec::new(),
            debug: false,
            host_id: host_id.into(),
            run_id: Uuid::new_v4(),
            row: None,
            events: None,
            target: None,
            input: None,
            cancel: CancellationToken::new(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_target(mut self, target: Arc<dyn CommandTarget>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_input(mut self, input: Arc<dyn InputProvider>) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    /// Correlate the run with a row in the caller's host table.
    pub fn with_row(mut self, row: impl Into<String>) -> Self {
        self.row = Some(row.into());
        self
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn row(&self) -> Option<&str> {
        self.row.as_deref()
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn target(&self) -> Option<Arc<dyn CommandTarget>> {
        self.target.clone()
    }

    pub fn input(&self) -> Option<Arc<dyn InputProvider>> {
        self.input.clone()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(&name.trim().to_lowercase()).map(|(_, v)| v)
    }

    pub fn has(&self, name: &str) -> bool {
        self.vars.contains_key(&name.trim().to_lowercase())
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let name = name.trim();
        let value = value.into();
        self.vars
            .entry(name.to_lowercase())
            .and_modify(|(_, v)| *v = value.clone())
            .or_insert_with(|| (name.to_string(), value));
    }

    /// Every variable with its original spelling, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        let mut vars: Vec<(String, Value)> = self.vars.values().cloned().collect();
        vars.sort_by_key(|(name, _)| name.to_lowercase());
        vars
    }

    /// Replace `${name}` and `${name[index]}` references.
    ///
    /// `index` is a literal or a variable holding one. Unknown names are left
    /// as written; an index past the end yields an empty string.
    pub fn substitute(&self, text: &str) -> String {
        if !text.contains("${") {
            return text.to_string();
        }
        REFERENCE
            .replace_all(text, |caps: &Captures<'_>| {
                let Some(value) = self.get(&caps[1]) else {
                    return caps[0].to_string();
                };
                match caps.get(2) {
                    None => value.as_string(),
                    Some(index) => self
                        .resolve_index(index.as_str())
                        .and_then(|i| value.as_list().into_iter().nth(i))
                        .unwrap_or_default(),
                }
            })
            .into_owned()
    }

    fn resolve_index(&self, index: &str) -> Option<usize> {
        index
            .parse()
            .ok()
            .or_else(|| self.get(index).and_then(|v| v.as_string().trim().parse().ok()))
    }

    /// Send a line to listeners. Everything but debug lines is also kept in
    /// the run's output log.
    pub fn emit(&mut self, text: impl Into<String>, output_type: OutputType) {
        let text = text.into();
        if output_type != OutputType::Debug {
            self.output.push(text.clone());
        }
        self.stream(text, output_type);
    }

    /// Send a line to listeners without logging it.
    pub fn stream(&self, text: impl Into<String>, output_type: OutputType) {
        if let Some(events) = &self.events {
            let _ = events.send(Event::output(
                self.host_id.clone(),
                Some(self.run_id),
                text,
                output_type,
            ));
        }
    }

    /// Log a line without sending it.
    pub fn record(&mut self, text: impl Into<String>) {
        self.output.push(text.into());
    }

    /// Emit a debug line. The message is only built when debugging is on.
    pub fn debug(&mut self, message: impl FnOnce() -> String) {
        if self.debug {
            self.emit(message(), OutputType::Debug);
        }
    }

    /// Ask the caller to set a column of this host's row.
    pub fn update_column(&self, column: &str, value: &str) {
        if let Some(events) = &self.events {
            let _ = events.send(Event::column_update(self.host_id.clone(), column, value));
        }
    }

    pub fn output_log(&self) -> &[String] {
        &self.output
    }

    pub fn output_text(&self) -> String {
        self.output.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn test_case_insensitive_vars() {
        let mut ctx = ScriptContext::new("r1:22");
        ctx.set("Version", "1.0");
        assert_eq!(ctx.get("VERSION"), Some(&Value::from("1.0")));
        ctx.set("version", "2.0");
        assert_eq!(ctx.snapshot(), vec![("Version".to_string(), Value::from("2.0"))]);
    }

    #[test]
    fn test_substitute() {
        let mut ctx = ScriptContext::new("r1:22");
        ctx.set("host", "r1");
        ctx.set("ports", Value::List(vec!["gi0/1".into(), "gi0/2".into()]));
        ctx.set("i", 1.0);
        assert_eq!(ctx.substitute("ping ${host}"), "ping r1");
        assert_eq!(ctx.substitute("${ports[0]} ${ports[i]}"), "gi0/1 gi0/2");
        assert_eq!(ctx.substitute("${ports[5]}|"), "|");
        assert_eq!(ctx.substitute("${missing} ok"), "${missing} ok");
        assert_eq!(ctx.substitute("${HOST}"), "r1");
    }

    #[test]
    fn test_debug_lines_not_logged() {
        let (tx, mut rx) = unbounded_channel();
        let mut ctx = ScriptContext::new("r1:22").with_events(tx).with_debug(true);
        ctx.emit("hello", OutputType::Info);
        ctx.debug(|| "internals".to_string());
        assert_eq!(ctx.output_log(), ["hello"]);
        assert!(rx.try_recv().is_ok());
        match rx.try_recv().unwrap() {
            Event::Output { output_type, .. } => assert_eq!(output_type, OutputType::Debug),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_debug_closure_skipped_when_off() {
        let mut ctx = ScriptContext::new("r1:22");
        ctx.debug(|| panic!("must not be evaluated"));
        assert!(ctx.output_log().is_empty());
    }
}
