use super::pty_reader::spawn_reader;
use super::{Connector, ShellChannel, ShellWriter};
use crate::config::TransportConfig;
use crate::host::HostConfig;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use tracing::debug;

/// Manages a program running inside a PTY
pub struct PtySession {
    #[allow(dead_code)]
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
}

impl PtySession {
    /// Spawn a new program in a PTY, returning the session and reader separately
    pub fn spawn(
        command: &str,
        args: &[String],
        rows: u16,
        cols: u16,
    ) -> Result<(Self, Box<dyn Read + Send>)> {
        let pty_system = portable_pty::native_pty_system();

        let pty_size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(pty_size)
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(command);
        for arg in args {
            cmd.arg(arg);
        }
        // No colour or cursor addressing from the remote side.
        cmd.env("TERM", "dumb");

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {command}"))?;

        let writer = pair
            .master
            .take_writer()
            .context("Failed to get PTY writer")?;

        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to get PTY reader")?;

        let session = PtySession {
            master: pair.master,
            child,
            writer,
        };

        Ok((session, reader))
    }

    /// Check if the child process is still running
    pub fn is_running(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }
}

impl ShellWriter for PtySession {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.is_running() {
            self.child.kill().context("Failed to stop transport process")?;
        }
        Ok(())
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Reaches hosts by running a program (by default `ssh`) inside a PTY.
#[derive(Debug, Clone)]
pub struct PtyConnector {
    config: TransportConfig,
}

impl PtyConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Expand the configured argument template for `host`.
    pub fn command_args(&self, host: &HostConfig) -> Vec<String> {
        let port = host.port.to_string();
        let target = host.target();
        let user = host.username.clone().unwrap_or_default();
        self.config
            .extra_args
            .iter()
            .chain(self.config.args.iter())
            .map(|arg| {
                arg.replace("{target}", &target)
                    .replace("{address}", &host.address)
                    .replace("{port}", &port)
                    .replace("{user}", &user)
            })
            .collect()
    }
}

#[async_trait]
impl Connector for PtyConnector {
    async fn open(&self, host: &HostConfig) -> Result<ShellChannel> {
        let program = self.config.program.clone();
        let args = self.command_args(host);
        let (rows, cols) = (self.config.rows, self.config.cols);
        debug!(host = %host.id(), %program, ?args, "spawning transport");

        let (session, reader) =
            tokio::task::spawn_blocking(move || PtySession::spawn(&program, &args, rows, cols))
                .await
                .map_err(|e| anyhow!("transport spawn task failed: {e}"))??;

        Ok(ShellChannel {
            writer: Box::new(session),
            output: spawn_reader(reader),
        })
    }
}
