//! The byte-stream channel to a remote shell.
//!
//! A [`Connector`] opens a [`ShellChannel`] to a host: a writer for
//! keystrokes and a receiver of raw output chunks. Sessions only ever see
//! this pair, so the PTY-backed [`PtyConnector`] and the in-memory
//! [`ScriptedConnector`] are interchangeable.

mod pty;
mod pty_reader;
pub mod scripted;

pub use pty::{PtyConnector, PtySession};
pub use scripted::{Reply, ScriptedConnector};

use crate::host::HostConfig;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

/// Write half of an open shell.
pub trait ShellWriter: Send {
    /// Write bytes to the remote shell's input.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Tear the channel down. Further writes fail.
    fn close(&mut self) -> Result<()>;
}

/// An open interactive shell.
///
/// The output receiver yields raw chunks exactly as read; it disconnects when
/// the remote side goes away.
pub struct ShellChannel {
    pub writer: Box<dyn ShellWriter>,
    pub output: UnboundedReceiver<Vec<u8>>,
}

/// Opens interactive shells to hosts.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, host: &HostConfig) -> Result<ShellChannel>;
}
