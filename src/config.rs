//! Runtime configuration, loadable from a TOML file.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! max_parallel_hosts = 8
//!
//! [session]
//! command_timeout_ms = 60000
//! prompt_confirm_ms = 250
//!
//! [transport]
//! program = "ssh"
//! extra_args = ["-o", "StrictHostKeyChecking=accept-new"]
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub pool: PoolConfig,
    pub transport: TransportConfig,
    /// Upper bound on hosts driven at the same time.
    pub max_parallel_hosts: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            pool: PoolConfig::default(),
            transport: TransportConfig::default(),
            max_parallel_hosts: 16,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Timing knobs for one shell session.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Opening the transport.
    pub connect_timeout_ms: u64,
    /// Waiting for the first prompt after the transport is open.
    pub init_timeout_ms: u64,
    /// Default hard limit for one command.
    pub command_timeout_ms: u64,
    /// Silence after which the tail gets one last prompt check.
    pub idle_timeout_ms: u64,
    /// Quiet period before a prompt-looking tail is trusted.
    pub prompt_confirm_ms: u64,
    pub poll_interval_ms: u64,
    /// Pager dismissals allowed per command.
    pub max_pages: usize,
    /// Publish sanitized output while a command is still running.
    pub stream_live_output: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            init_timeout_ms: 15_000,
            command_timeout_ms: 30_000,
            idle_timeout_ms: 3_000,
            prompt_confirm_ms: 150,
            poll_interval_ms: 50,
            max_pages: 200,
            stream_live_output: false,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn prompt_confirm(&self) -> Duration {
        Duration::from_millis(self.prompt_confirm_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Idle-session reclamation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub enabled: bool,
    pub idle_reclaim_secs: u64,
    pub reap_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_reclaim_secs: 300,
            reap_interval_secs: 30,
        }
    }
}

impl PoolConfig {
    pub fn idle_reclaim(&self) -> Duration {
        Duration::from_secs(self.idle_reclaim_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

/// The program run inside the PTY to reach a host.
///
/// `args` may use `{target}` (`user@address`), `{address}`, `{port}` and
/// `{user}` placeholders.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub program: String,
    pub args: Vec<String>,
    pub extra_args: Vec<String>,
    pub rows: u16,
    pub cols: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            args: ["-tt", "-p", "{port}", "{target}"]
                .map(String::from)
                .to_vec(),
            extra_args: Vec::new(),
            rows: 24,
            cols: 200,
        }
    }
}
