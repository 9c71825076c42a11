//! Host identity: where a session connects and how it is keyed.

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identifier keying sessions and events, `user@address:port`.
pub type HostId = String;

pub const DEFAULT_SSH_PORT: u16 = 22;

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// A remote host to drive.
///
/// Parses from `address`, `address:port`, `user@address:port` or
/// `user@[v6addr]:port`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    /// Per-host script variables (a host table row).
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl HostConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_SSH_PORT,
            username: None,
            password: None,
            label: None,
            vars: BTreeMap::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// `user@address` or plain `address`, as handed to the transport.
    pub fn target(&self) -> String {
        match &self.username {
            Some(user) => format!("{user}@{}", self.address),
            None => self.address.clone(),
        }
    }

    pub fn id(&self) -> HostId {
        if self.address.contains(':') {
            format!("{}[{}]:{}", self.user_prefix(), self.address, self.port)
        } else {
            format!("{}{}:{}", self.user_prefix(), self.address, self.port)
        }
    }

    fn user_prefix(&self) -> String {
        self.username
            .as_ref()
            .map(|u| format!("{u}@"))
            .unwrap_or_default()
    }
}

impl fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostConfig")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("label", &self.label)
            .field("vars", &self.vars)
            .finish()
    }
}

impl fmt::Display for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{label} ({})", self.id()),
            None => f.write_str(&self.id()),
        }
    }
}

impl FromStr for HostConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (username, rest) = match s.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some(_) => bail!("empty username in host: {s}"),
            None => (None, s),
        };

        let (address, port) = if let Some(v6) = rest.strip_prefix('[') {
            let (addr, after) = v6
                .split_once(']')
                .ok_or_else(|| anyhow!("unclosed '[' in host: {s}"))?;
            let port = match after.strip_prefix(':') {
                Some(p) => parse_port(p)?,
                None if after.is_empty() => DEFAULT_SSH_PORT,
                None => bail!("unexpected text after address in host: {s}"),
            };
            (addr.to_string(), port)
        } else {
            match rest.rsplit_once(':') {
                Some((addr, p)) => (addr.to_string(), parse_port(p)?),
                None => (rest.to_string(), DEFAULT_SSH_PORT),
            }
        };

        if address.is_empty() {
            bail!("empty address in host: {s}");
        }

        Ok(Self {
            address,
            port,
            username,
            ..Self::new("")
        })
    }
}

fn parse_port(p: &str) -> Result<u16> {
    p.parse()
        .map_err(|_| anyhow!("invalid port number: {p}"))
}
