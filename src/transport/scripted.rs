//! A simulated interactive device for tests and dry runs.
//!
//! [`ScriptedConnector`] opens in-memory shells that behave like a terminal
//! session on a network device: they print a banner, echo every line typed,
//! answer known commands from a table, paginate long replies behind
//! `--More--`, and end each reply with a prompt that can change between
//! configuration modes.
//!
//! ```
//! use shelldrive::transport::{Reply, ScriptedConnector};
//!
//! let device = ScriptedConnector::new("router#")
//!     .banner("Authorized access only")
//!     .respond("show version", Reply::text("Version 1.0.3"))
//!     .respond("configure terminal", Reply::text("").switch_prompt("router(config)#"));
//! ```

use super::{Connector, ShellChannel, ShellWriter};
use crate::host::HostConfig;
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

const PAGER_MARKER: &str = "--More--";
/// What a device prints after a pager keystroke to erase the marker.
const PAGER_ERASE: &str = "\r        \r";

/// How the simulated device answers one command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pages: Vec<String>,
    delay: Duration,
    prompt: bool,
    switch_prompt: Option<String>,
    close: bool,
}

impl Reply {
    /// A single-page reply followed by the prompt.
    pub fn text(text: impl Into<String>) -> Self {
        Self::paged(vec![text.into()])
    }

    /// A reply split across pages, each but the last followed by `--More--`.
    pub fn paged(pages: Vec<String>) -> Self {
        Self {
            pages,
            delay: Duration::ZERO,
            prompt: true,
            switch_prompt: None,
            close: false,
        }
    }

    /// Print the reply but never return to a prompt.
    pub fn without_prompt(mut self) -> Self {
        self.prompt = false;
        self
    }

    /// Wait before the reply text is printed (the echo is immediate).
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Change the device prompt from this reply on.
    pub fn switch_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.switch_prompt = Some(prompt.into());
        self
    }

    /// Hang up after printing the reply.
    pub fn hang_up(mut self) -> Self {
        self.close = true;
        self
    }
}

#[derive(Debug, Clone)]
struct DeviceSpec {
    prompt: String,
    banner: Option<String>,
    password: Option<String>,
    responses: HashMap<String, Reply>,
    fallback: Reply,
    refuse: Option<String>,
    mute: bool,
}

/// Opens simulated shells. Every call to [`Connector::open`] gets a fresh
/// device in its initial state.
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    spec: Arc<DeviceSpec>,
}

impl ScriptedConnector {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            spec: Arc::new(DeviceSpec {
                prompt: prompt.into(),
                banner: None,
                password: None,
                responses: HashMap::new(),
                fallback: Reply::text(""),
                refuse: None,
                mute: false,
            }),
        }
    }

    fn edit(mut self, f: impl FnOnce(&mut DeviceSpec)) -> Self {
        f(Arc::make_mut(&mut self.spec));
        self
    }

    /// Text printed on connect, before the first prompt.
    pub fn banner(self, banner: impl Into<String>) -> Self {
        let banner = banner.into();
        self.edit(|s| s.banner = Some(banner))
    }

    /// Ask for this password before the shell starts.
    pub fn password(self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.edit(|s| s.password = Some(password))
    }

    /// Answer `command` (matched after trimming) with `reply`.
    pub fn respond(self, command: impl Into<String>, reply: Reply) -> Self {
        let command = command.into().trim().to_string();
        self.edit(|s| {
            s.responses.insert(command, reply);
        })
    }

    /// Reply for commands without an entry; defaults to empty output.
    pub fn fallback(self, reply: Reply) -> Self {
        self.edit(|s| s.fallback = reply)
    }

    /// Fail every connection attempt with `message`.
    pub fn refuse(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.edit(|s| s.refuse = Some(message))
    }

    /// Never print a prompt, not even on connect.
    pub fn mute(self) -> Self {
        self.edit(|s| s.mute = true)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, host: &HostConfig) -> Result<ShellChannel> {
        if let Some(message) = &self.spec.refuse {
            bail!("{}: {message}", host.address);
        }
        let (tx, rx) = unbounded_channel();
        let mut device = ScriptedShell {
            spec: Arc::clone(&self.spec),
            prompt: self.spec.prompt.clone(),
            tx: Some(tx),
            line: String::new(),
            pending_pages: VecDeque::new(),
            pending_reply: None,
            authenticated: self.spec.password.is_none(),
        };
        device.greet();
        Ok(ShellChannel {
            writer: Box::new(device),
            output: rx,
        })
    }
}

struct ScriptedShell {
    spec: Arc<DeviceSpec>,
    prompt: String,
    tx: Option<UnboundedSender<Vec<u8>>>,
    line: String,
    pending_pages: VecDeque<String>,
    pending_reply: Option<Reply>,
    authenticated: bool,
}

impl ScriptedShell {
    fn greet(&mut self) {
        if let Some(banner) = &self.spec.banner {
            let banner = crlf(banner);
            self.emit(format!("{banner}\r\n"));
        }
        if self.authenticated {
            self.emit_prompt();
        } else {
            self.emit("Password: ".to_string());
        }
    }

    fn emit(&self, text: String) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(text.into_bytes());
        }
    }

    fn emit_prompt(&self) {
        if !self.spec.mute {
            self.emit(self.prompt.clone());
        }
    }

    fn handle_line(&mut self, line: &str) {
        if !self.authenticated {
            // Passwords are not echoed.
            if Some(line) == self.spec.password.as_deref() {
                self.authenticated = true;
                self.emit("\r\n".to_string());
                self.emit_prompt();
            } else {
                self.emit("\r\nPermission denied, please try again.\r\nPassword: ".to_string());
            }
            return;
        }

        self.emit(format!("{line}\r\n"));
        let command = line.trim();
        if command.is_empty() {
            self.emit_prompt();
            return;
        }

        let reply = self
            .spec
            .responses
            .get(command)
            .unwrap_or(&self.spec.fallback)
            .clone();
        if let Some(prompt) = &reply.switch_prompt {
            self.prompt = prompt.clone();
        }

        let mut pages: VecDeque<String> = reply.pages.iter().map(|p| crlf(p)).collect();
        let first = pages.pop_front().unwrap_or_default();
        let text = self.page_text(first, !pages.is_empty(), &reply);
        self.pending_pages = pages;
        self.pending_reply = Some(reply.clone());
        self.send_reply(text, reply.delay, reply.close && self.pending_pages.is_empty());
    }

    fn handle_pager_key(&mut self, key: char) {
        let Some(reply) = self.pending_reply.clone() else {
            return;
        };
        if key == 'q' {
            self.pending_pages.clear();
            self.emit(format!("{PAGER_ERASE}{}", self.prompt_suffix(&reply)));
            return;
        }
        let page = self.pending_pages.pop_front().unwrap_or_default();
        let more = !self.pending_pages.is_empty();
        let text = format!("{PAGER_ERASE}{}", self.page_text(page, more, &reply));
        self.send_reply(text, Duration::ZERO, reply.close && !more);
    }

    fn page_text(&self, page: String, more: bool, reply: &Reply) -> String {
        let mut text = page;
        if !text.is_empty() {
            text.push_str("\r\n");
        }
        if more {
            text.push_str(PAGER_MARKER);
        } else {
            text.push_str(&self.prompt_suffix(reply));
        }
        text
    }

    fn prompt_suffix(&self, reply: &Reply) -> String {
        if reply.prompt && !self.spec.mute {
            self.prompt.clone()
        } else {
            String::new()
        }
    }

    fn send_reply(&mut self, text: String, delay: Duration, hang_up: bool) {
        let tx = if hang_up { self.tx.take() } else { self.tx.clone() };
        let Some(tx) = tx else {
            return;
        };
        if delay.is_zero() {
            let _ = tx.send(text.into_bytes());
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(text.into_bytes());
                });
            }
            Err(_) => {
                let _ = tx.send(text.into_bytes());
            }
        }
    }
}

impl ShellWriter for ScriptedShell {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.tx.is_none() {
            bail!("connection closed");
        }
        for ch in String::from_utf8_lossy(data).chars() {
            if !self.pending_pages.is_empty() {
                self.handle_pager_key(ch);
                continue;
            }
            match ch {
                '\n' | '\r' => {
                    let line = std::mem::take(&mut self.line);
                    self.handle_line(&line);
                }
                c => self.line.push(c),
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

fn crlf(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<Vec<u8>>) -> String {
        let mut out = String::new();
        while let Ok(chunk) = rx.try_recv() {
            out.push_str(&String::from_utf8_lossy(&chunk));
        }
        out
    }

    #[tokio::test]
    async fn test_banner_echo_and_reply() {
        let connector = ScriptedConnector::new("r1#")
            .banner("Welcome")
            .respond("show clock", Reply::text("12:00"));
        let mut channel = connector.open(&HostConfig::new("r1")).await.unwrap();
        assert_eq!(drain(&mut channel.output), "Welcome\r\nr1#");

        channel.writer.write(b"show clock\n").unwrap();
        assert_eq!(drain(&mut channel.output), "show clock\r\n12:00\r\nr1#");
    }

    #[tokio::test]
    async fn test_pagination() {
        let connector = ScriptedConnector::new("r1#").respond(
            "show log",
            Reply::paged(vec!["page1".into(), "page2".into()]),
        );
        let mut channel = connector.open(&HostConfig::new("r1")).await.unwrap();
        drain(&mut channel.output);

        channel.writer.write(b"show log\n").unwrap();
        assert_eq!(drain(&mut channel.output), "show log\r\npage1\r\n--More--");
        channel.writer.write(b" ").unwrap();
        assert_eq!(drain(&mut channel.output), format!("{PAGER_ERASE}page2\r\nr1#"));
    }

    #[tokio::test]
    async fn test_prompt_switch() {
        let connector = ScriptedConnector::new("r1#")
            .respond("conf t", Reply::text("").switch_prompt("r1(config)#"));
        let mut channel = connector.open(&HostConfig::new("r1")).await.unwrap();
        drain(&mut channel.output);
        channel.writer.write(b"conf t\n").unwrap();
        assert_eq!(drain(&mut channel.output), "conf t\r\nr1(config)#");
    }

    #[tokio::test]
    async fn test_password_then_shell() {
        let connector = ScriptedConnector::new("$ ").password("secret");
        let mut channel = connector.open(&HostConfig::new("box")).await.unwrap();
        assert_eq!(drain(&mut channel.output), "Password: ");
        channel.writer.write(b"wrong\n").unwrap();
        assert!(drain(&mut channel.output).contains("Permission denied"));
        channel.writer.write(b"secret\n").unwrap();
        assert_eq!(drain(&mut channel.output), "\r\n$ ");
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let connector = ScriptedConnector::new("#").refuse("Connection refused");
        let err = connector.open(&HostConfig::new("r9")).await.err().unwrap();
        assert!(err.to_string().contains("Connection refused"));
    }

    #[tokio::test]
    async fn test_hang_up_disconnects() {
        let connector = ScriptedConnector::new("r1#").respond("reload", Reply::text("bye").hang_up());
        let mut channel = connector.open(&HostConfig::new("r1")).await.unwrap();
        drain(&mut channel.output);
        channel.writer.write(b"reload\n").unwrap();
        assert!(channel.writer.write(b"x").is_err());
        assert_eq!(drain(&mut channel.output), "reload\r\nbye\r\nr1#");
        assert!(channel.output.recv().await.is_none());
    }
}
