use anyhow::{Context, Result, bail};
use clap::Parser;
use shelldrive::{Config, Engine, Event, HostConfig, OutputType, PtyConnector, TerminalInput};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "shelldrive",
    about = "Run a script or command list on interactive remote shells",
    version
)]
struct Args {
    /// Path to the script: a YAML script or one command per line
    #[arg(short, long)]
    script: String,

    /// Host to run on, as `[user@]address[:port]`; repeatable
    #[arg(short = 'H', long = "host", required = true)]
    hosts: Vec<String>,

    /// Password for hosts that ask for one
    #[arg(long, env = "SHELLDRIVE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// TOML configuration file
    #[arg(short, long, env = "SHELLDRIVE_CONFIG")]
    config: Option<String>,

    /// Per-command timeout in milliseconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Emit script debug lines
    #[arg(short, long)]
    debug: bool,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Program used to reach hosts instead of the configured one
    #[arg(long)]
    program: Option<String>,
}

fn print_event(event: &Event, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        Event::Output { host_id, text, output_type, .. } => {
            let marker = match output_type {
                OutputType::Command => "> ",
                OutputType::Debug => "[debug] ",
                OutputType::Warning => "[warn] ",
                OutputType::Error => "[error] ",
                _ => "",
            };
            for line in text.lines() {
                println!("[{host_id}] {marker}{line}");
            }
        }
        Event::Progress { host_id, status } => eprintln!("[{host_id}] {status:?}"),
        Event::ColumnUpdate { host_id, column_name, value } => {
            println!("[{host_id}] {column_name} = {value}");
        }
        Event::Completion(c) => {
            let ms = c.duration.map(|d| d.as_millis()).unwrap_or_default();
            match &c.error_message {
                Some(error) => eprintln!("[{}] failed after {ms}ms: {error}", c.host_id),
                None => eprintln!("[{}] done in {ms}ms", c.host_id),
            }
        }
    }
    Ok(())
}

fn parse_hosts(args: &Args) -> Result<Vec<HostConfig>> {
    args.hosts
        .iter()
        .map(|spec| {
            let mut host: HostConfig = spec.parse().with_context(|| format!("Invalid host: {spec}"))?;
            if host.password.is_none() {
                host.password = args.password.clone();
            }
            Ok(host)
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(program) = &args.program {
        config.transport.program = program.clone();
    }
    let hosts = parse_hosts(&args)?;
    if hosts.is_empty() {
        bail!("No hosts given");
    }
    let text = std::fs::read_to_string(&args.script)
        .with_context(|| format!("Failed to read script file: {}", args.script))?;

    let connector = Arc::new(PtyConnector::new(config.transport.clone()));
    let (engine, mut events) = Engine::new(config, connector);
    let engine = engine.with_input_provider(Arc::new(TerminalInput::new()));
    engine.set_debug_mode(args.debug);
    let reaper = engine.start_reaper();

    let json = args.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(e) = print_event(&event, json) {
                tracing::warn!(error = %e, "failed to print event");
            }
        }
    });

    let timeout = args.timeout.map(Duration::from_millis);
    let completions = {
        let batch = engine.execute_on_hosts(hosts, &text, timeout);
        tokio::pin!(batch);
        loop {
            tokio::select! {
                result = &mut batch => break result,
                _ = tokio::signal::ctrl_c() => engine.cancel(),
            }
        }
    };

    engine.shutdown().await;
    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }
    drop(engine);
    let _ = printer.await;

    let completions = completions.context("Failed to start script")?;
    let failed = completions.iter().filter(|c| !c.success).count();
    if failed > 0 {
        eprintln!("{failed} of {} hosts failed", completions.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
