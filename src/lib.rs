//! # Shelldrive
//!
//! Drive interactive remote shells (network devices, Unix hosts) the way an
//! operator would: type a command, wait for the prompt, page through
//! `--More--`, and read back clean output.
//!
//! Shelldrive runs scripts on many hosts in parallel. Each host gets its own
//! session; completion of a command is decided by detecting the device's
//! prompt, with a quiet-period confirmation so verbose output that merely
//! looks like a prompt does not end a command early.
//!
//! ## Quick start
//!
//! ```no_run
//! use shelldrive::{Config, Engine, HostConfig, PtyConnector};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let connector = Arc::new(PtyConnector::new(config.transport.clone()));
//!     let (engine, mut events) = Engine::new(config, connector);
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{event:?}");
//!         }
//!     });
//!
//!     let script = r#"
//! steps:
//!   - send: show version
//!     capture: v
//!   - if: v contains 15.2
//!     then:
//!       - print: up to date
//!     else:
//!       - exit: failed, running ${v}
//! "#;
//!     let hosts = vec!["admin@10.0.0.1".parse::<HostConfig>()?];
//!     for completion in engine.execute_on_hosts(hosts, script, None).await? {
//!         println!("{}: {}", completion.host_id, completion.success);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Script steps
//!
//! | Step | Description |
//! |------|-------------|
//! | `send: cmd` | Run a command; options `capture`, `suppress`, `expect`, `timeout` |
//! | `print: text` | Emit a line |
//! | `set: name = expr` | Assign a string, list, number or arithmetic result |
//! | `wait: 2` | Pause (`500ms`, `1.5s`, bare seconds) |
//! | `exit: message` | Stop; a message containing "fail" or "error" fails the run |
//! | `break` | Leave the innermost loop |
//! | `if` / `then` / `else` | Branch on an expression |
//! | `foreach: x in list` / `do` | Loop over a list, with an optional per-item `when` |
//! | `while: expr` / `do` | Loop while an expression holds |
//! | `extract` | Regex captures into variables |
//! | `readfile` / `writefile` | Load lines into a list, write or append text |
//! | `input` | Ask the operator for a value |
//! | `updatecolumn` | Set a column of the host's row in the caller's table |
//!
//! Any step accepts `when` and `on_error: continue`.
//!
//! ## Testing without devices
//!
//! [`transport::ScriptedConnector`] simulates a device with a banner,
//! echo, paging and mode prompts, so scripts can be exercised in-process.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod host;
pub mod input;
pub mod normalize;
pub mod pager;
pub mod prompt;
pub mod script;
pub mod session;
pub mod transport;

pub use config::Config;
pub use engine::Engine;
pub use error::{EngineError, ScriptParseError, SessionError};
pub use event::{CompletionEvent, Event, EventReceiver, OutputType, ProgressStatus};
pub use host::{HostConfig, HostId};
pub use input::{InputProvider, InputRequest, TerminalInput};
pub use script::{Script, ScriptContext, ScriptExecutor, ScriptOutcome, parse, parse_file, parse_input};
pub use session::{ExecutionResult, Session, SessionHandle};
pub use transport::{Connector, PtyConnector};
