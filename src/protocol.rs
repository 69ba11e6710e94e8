//! Wire types for the newline-delimited event stream.
//!
//! Every line the upstream model produces is one JSON object tagged by
//! `type`. The relay never inspects these; only the client decodes them.

use serde::{Deserialize, Serialize};

/// Kind of a single log line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    /// Agent reasoning, rendered immediately.
    Thought,
    /// Simulated shell output, revealed progressively.
    Shell,
}

/// One line inside a log group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
    #[serde(rename = "type")]
    pub kind: LogType,
    pub content: String,
}

impl LogLine {
    pub fn thought(content: impl Into<String>) -> Self {
        Self {
            kind: LogType::Thought,
            content: content.into(),
        }
    }

    pub fn shell(content: impl Into<String>) -> Self {
        Self {
            kind: LogType::Shell,
            content: content.into(),
        }
    }

    pub fn is_shell(&self) -> bool {
        self.kind == LogType::Shell
    }
}

/// One unit of agent work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogGroup {
    pub title: String,
    pub logs: Vec<LogLine>,
}

impl LogGroup {
    pub fn new(title: impl Into<String>, logs: Vec<LogLine>) -> Self {
        Self {
            title: title.into(),
            logs,
        }
    }

    /// Number of shell lines, i.e. the number of reveal signals the group waits for.
    pub fn shell_count(&self) -> usize {
        self.logs.iter().filter(|l| l.is_shell()).count()
    }
}

/// A single event decoded from the relayed stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Project file/directory listing.
    Architecture { data: Vec<String> },
    /// One log group.
    Log { data: LogGroup },
    /// Progress narration; `completed: true` is terminal success.
    Status {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed: Option<bool>,
    },
    /// Terminal failure.
    Error { message: String },
}

impl StreamEvent {
    pub fn status(message: impl Into<String>) -> Self {
        StreamEvent::Status {
            message: message.into(),
            completed: None,
        }
    }

    pub fn completed(message: impl Into<String>) -> Self {
        StreamEvent::Status {
            message: message.into(),
            completed: Some(true),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    /// Whether this event ends an attempt (success or failure).
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Status { completed, .. } => completed.unwrap_or(false),
            StreamEvent::Error { .. } => true,
            StreamEvent::Architecture { .. } | StreamEvent::Log { .. } => false,
        }
    }

    /// Serialize as one NDJSON line, newline included.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
