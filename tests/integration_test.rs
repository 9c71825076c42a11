use anyhow::{Result, anyhow};
use async_trait::async_trait;
use shelldrive::config::SessionConfig;
use shelldrive::transport::{Reply, ScriptedConnector, ShellChannel};
use shelldrive::{
    CompletionEvent, Config, Connector, Engine, EngineError, Event, EventReceiver, HostConfig,
    OutputType, ProgressStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Routes each host to its own simulated device by address.
struct Lab {
    devices: HashMap<String, ScriptedConnector>,
}

impl Lab {
    fn new() -> Self {
        Self { devices: HashMap::new() }
    }

    fn device(mut self, address: &str, device: ScriptedConnector) -> Self {
        self.devices.insert(address.to_string(), device);
        self
    }
}

#[async_trait]
impl Connector for Lab {
    async fn open(&self, host: &HostConfig) -> Result<ShellChannel> {
        let device = self
            .devices
            .get(&host.address)
            .ok_or_else(|| anyhow!("{}: No route to host", host.address))?;
        device.open(host).await
    }
}

fn config() -> Config {
    Config {
        session: SessionConfig {
            connect_timeout_ms: 1_000,
            init_timeout_ms: 1_500,
            command_timeout_ms: 5_000,
            idle_timeout_ms: 500,
            prompt_confirm_ms: 30,
            poll_interval_ms: 10,
            ..SessionConfig::default()
        },
        ..Config::default()
    }
}

fn engine(connector: impl Connector + 'static) -> (Engine, EventReceiver) {
    Engine::new(config(), Arc::new(connector))
}

fn drain(rx: &mut EventReceiver) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn run_one(device: ScriptedConnector, script: &str) -> (CompletionEvent, Vec<Event>) {
    let (engine, mut rx) = engine(device);
    let mut completions = engine
        .execute_on_hosts(vec![HostConfig::new("r1")], script, None)
        .await
        .unwrap();
    (completions.remove(0), drain(&mut rx))
}

const VERSION_CHECK: &str = r#"
steps:
  - send: show version
    capture: v
  - if: v contains 1.0
    then:
      - print: match
    else:
      - print: nomatch
"#;

#[tokio::test]
async fn test_version_check_end_to_end() {
    let device = ScriptedConnector::new("r1#")
        .banner("Authorized access only")
        .respond("show version", Reply::text("Version 1.0.3"));
    let (completion, events) = run_one(device, VERSION_CHECK).await;

    assert!(completion.success, "{:?}", completion.error_message);
    assert!(completion.output.contains("match"));
    assert!(!completion.output.contains("nomatch"));
    assert!(!completion.output.contains("Authorized"));

    let statuses: Vec<ProgressStatus> = events
        .iter()
        .filter_map(|e| match e {
            Event::Progress { status, .. } => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        [ProgressStatus::Connecting, ProgressStatus::Running, ProgressStatus::Success]
    );
    assert!(matches!(events.last(), Some(Event::Completion(_))));
}

#[tokio::test]
async fn test_command_output_events_in_order() {
    let device = ScriptedConnector::new("r1#").respond("show version", Reply::text("Version 1.0.3"));
    let (_, events) = run_one(device, VERSION_CHECK).await;
    let lines: Vec<(OutputType, &str)> = events
        .iter()
        .filter_map(|e| match e {
            Event::Output { text, output_type, run_id: Some(_), .. } => Some((*output_type, text.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(
        lines,
        [
            (OutputType::Command, "show version"),
            (OutputType::CommandOutput, "Version 1.0.3"),
            (OutputType::Info, "match"),
        ]
    );
}

#[tokio::test]
async fn test_command_without_prompt_times_out() {
    let device = ScriptedConnector::new("r1#")
        .respond("copy run start", Reply::text("Destination filename [startup-config]?").without_prompt());
    let (engine, _rx) = engine(device);
    let start = Instant::now();
    let completions = engine
        .execute_on_hosts(
            vec![HostConfig::new("r1")],
            "steps:\n  - send: copy run start\n",
            Some(Duration::from_millis(2000)),
        )
        .await
        .unwrap();
    let elapsed = start.elapsed();

    let completion = &completions[0];
    assert!(!completion.success);
    assert!(!completion.cancelled);
    assert!(completion.error_message.as_deref().unwrap_or_default().contains("timed out"));
    assert!(elapsed >= Duration::from_millis(1900), "finished after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(6), "finished after {elapsed:?}");
}

#[tokio::test]
async fn test_paged_output_is_joined() {
    let device = ScriptedConnector::new("r1#").respond(
        "show log",
        Reply::paged(vec!["entry 1\nentry 2".into(), "entry 3".into(), "entry 4".into()]),
    );
    let (completion, _) = run_one(device, "steps:\n  - send: show log\n    capture: log\n  - print: ${log}\n").await;
    assert!(completion.success, "{:?}", completion.error_message);
    assert!(completion.output.ends_with("entry 1\nentry 2\nentry 3\nentry 4"));
    assert!(!completion.output.contains("More"));
}

#[tokio::test]
async fn test_prompt_change_across_modes() {
    let device = ScriptedConnector::new("edge>")
        .respond("enable", Reply::text("").switch_prompt("edge#"))
        .respond("configure terminal", Reply::text("Enter configuration commands").switch_prompt("edge(config)#"))
        .respond("hostname edge", Reply::text(""))
        .respond("end", Reply::text("").switch_prompt("edge#"))
        .respond("show clock", Reply::text("12:00:00 UTC"));
    let script = r#"
steps:
  - enable
  - configure terminal
  - hostname edge
  - end
  - send: show clock
    capture: clock
"#;
    let (completion, _) = run_one(device, script).await;
    assert!(completion.success, "{:?}", completion.error_message);
    assert!(completion.output.ends_with("12:00:00 UTC"));
}

#[tokio::test]
async fn test_password_login() {
    let device = ScriptedConnector::new("box$ ")
        .password("s3cret")
        .respond("uname", Reply::text("Linux"));
    let (engine, _rx) = engine(device);
    let completions = engine
        .execute_on_hosts(vec![HostConfig::new("box").with_password("s3cret")], "uname\n", None)
        .await
        .unwrap();
    assert!(completions[0].success, "{:?}", completions[0].error_message);
    assert!(completions[0].output.contains("Linux"));
    assert!(!completions[0].output.contains("s3cret"));
}

#[tokio::test]
async fn test_failed_host_does_not_stop_siblings() {
    let lab = Lab::new()
        .device("r1", ScriptedConnector::new("r1#").respond("show version", Reply::text("Version 1.0.1")))
        .device("r2", ScriptedConnector::new("r2#").respond("show version", Reply::text("Version 2.0")));
    let (engine, mut rx) = engine(lab);
    let hosts = vec![HostConfig::new("r1"), HostConfig::new("r3"), HostConfig::new("r2")];
    let completions = engine.execute_on_hosts(hosts, VERSION_CHECK, None).await.unwrap();

    let ids: Vec<&str> = completions.iter().map(|c| c.host_id.as_str()).collect();
    assert_eq!(ids, ["r1:22", "r3:22", "r2:22"]);
    assert!(completions[0].success);
    assert!(!completions[1].success);
    assert!(completions[1].error_message.as_deref().unwrap_or_default().contains("No route to host"));
    assert!(completions[2].success);
    assert!(completions[2].output.contains("nomatch"));

    let events = drain(&mut rx);
    let completed = events.iter().filter(|e| matches!(e, Event::Completion(_))).count();
    assert_eq!(completed, 3);
}

#[tokio::test]
async fn test_interface_report_updates_columns() {
    let brief = "Interface  IP-Address  Status\n\
                 gi0/1      10.0.0.1    up\n\
                 gi0/2      unassigned  down\n\
                 gi0/3      10.0.0.3    up";
    let device = ScriptedConnector::new("sw1#")
        .respond("show ip interface brief", Reply::text(brief))
        .respond("show interface gi0/1 counters", Reply::text("errors 0"))
        .respond("show interface gi0/3 counters", Reply::text("errors 7"));
    let script = r#"
vars:
  dirty: 0
steps:
  - send: show ip interface brief
    capture: brief
    suppress: true
  - extract:
      from: brief
      pattern: '^(gi\S+)\s+\S+\s+up$'
      into: up
      match: all
  - updatecolumn:
      column: up_ports
      value: ${up}
  - foreach: port in up
    do:
      - send: show interface ${port} counters
        capture: counters
        suppress: true
      - extract:
          from: counters
          pattern: 'errors (\d+)'
          into: errors
      - if: errors > 0
        then:
          - set: dirty = dirty + 1
  - updatecolumn:
      column: dirty_ports
      value: ${dirty}
"#;
    let (engine, mut rx) = engine(device);
    let completions = engine
        .execute_on_hosts(vec![HostConfig::new("sw1")], script, None)
        .await
        .unwrap();
    assert!(completions[0].success, "{:?}", completions[0].error_message);

    let columns: Vec<(String, String)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            Event::ColumnUpdate { column_name, value, .. } => Some((column_name, value)),
            _ => None,
        })
        .collect();
    assert_eq!(
        columns,
        [
            ("up_ports".to_string(), "gi0/1, gi0/3".to_string()),
            ("dirty_ports".to_string(), "1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_parse_error_starts_nothing() {
    let (engine, mut rx) = engine(ScriptedConnector::new("r1#"));
    let err = engine
        .execute_on_hosts(vec![HostConfig::new("r1")], "steps:\n  - sned: show version\n", None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Parse(_)));
    assert!(err.to_string().contains("steps[0]"));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_cancel_stops_running_command() {
    let device = ScriptedConnector::new("r1#")
        .respond("show tech-support", Reply::text("...").delayed(Duration::from_secs(10)));
    let (engine, _rx) = engine(device);
    let runner = engine.clone();
    let batch = tokio::spawn(async move {
        runner
            .execute_on_hosts(
                vec![HostConfig::new("r1")],
                "steps:\n  - send: show tech-support\n  - print: unreachable\n",
                Some(Duration::from_secs(30)),
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    let start = Instant::now();
    engine.cancel();
    let completions = batch.await.unwrap().unwrap();

    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(completions[0].cancelled);
    assert!(!completions[0].success);
    assert!(!completions[0].output.contains("unreachable"));
}

#[tokio::test]
async fn test_debug_mode_emits_summaries() {
    let device = ScriptedConnector::new("r1#").respond("show version", Reply::text("Version 1.0.3"));
    let (engine, mut rx) = engine(device);
    engine.set_debug_mode(true);
    let completions = engine
        .execute_on_hosts(vec![HostConfig::new("r1")], VERSION_CHECK, None)
        .await
        .unwrap();
    assert!(completions[0].success);
    assert!(!completions[0].output.contains("[start]"));

    let debug: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            Event::Output { text, output_type: OutputType::Debug, .. } => Some(text),
            _ => None,
        })
        .collect();
    assert!(debug.iter().any(|line| line.starts_with("[start]")));
    assert!(debug.iter().any(|line| line.starts_with("[end]") && line.contains("v=Version 1.0.3")));
}
