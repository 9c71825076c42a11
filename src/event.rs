use crate::host::HostId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Classifies an output line so a front end can style or filter it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Info,
    Command,
    CommandOutput,
    Debug,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Connecting,
    Running,
    Success,
    Error,
    Disconnected,
}

/// Final outcome of one host's run.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionEvent {
    pub host_id: HostId,
    pub run_id: Uuid,
    pub success: bool,
    pub cancelled: bool,
    pub output: String,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration: Option<Duration>,
}

/// Events emitted to the caller, keyed by host.
///
/// Events for one host arrive in the order they were produced; events for
/// different hosts interleave freely.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Output {
        host_id: HostId,
        run_id: Option<Uuid>,
        text: String,
        output_type: OutputType,
    },
    Progress {
        host_id: HostId,
        status: ProgressStatus,
    },
    Completion(CompletionEvent),
    ColumnUpdate {
        host_id: HostId,
        column_name: String,
        value: String,
    },
}

pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

impl Event {
    pub fn output(
        host_id: impl Into<HostId>,
        run_id: Option<Uuid>,
        text: impl Into<String>,
        output_type: OutputType,
    ) -> Self {
        Event::Output {
            host_id: host_id.into(),
            run_id,
            text: text.into(),
            output_type,
        }
    }

    pub fn progress(host_id: impl Into<HostId>, status: ProgressStatus) -> Self {
        Event::Progress {
            host_id: host_id.into(),
            status,
        }
    }

    pub fn column_update(
        host_id: impl Into<HostId>,
        column_name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Event::ColumnUpdate {
            host_id: host_id.into(),
            column_name: column_name.into(),
            value: value.into(),
        }
    }

    pub fn host_id(&self) -> &str {
        match self {
            Event::Output { host_id, .. }
            | Event::Progress { host_id, .. }
            | Event::ColumnUpdate { host_id, .. } => host_id,
            Event::Completion(c) => &c.host_id,
        }
    }
}
