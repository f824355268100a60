//! Structured error types shared across xpd crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`XpdError`] family variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (paths, hosts, exit codes, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

/// A single array task that ended in a failed state on a queue-managed cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Array index of the task, equal to the batch index it processed.
    pub index: usize,
    /// Node the task ran on, as reported by the accounting query.
    pub node: String,
    /// Captured remote error log for the task.
    #[serde(default)]
    pub log: String,
}

/// Canonical error type for the xpd dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum XpdError {
    /// Invalid setup detected before any work ran (paths, hosts, registry lookups).
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Local filesystem and process spawning errors.
    #[error("io error: {0}")]
    Io(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
    /// Failures of a batch or of a task inside a batch.
    #[error("execution error: {0}")]
    Execution(ErrorInfo),
    /// Remote command and transfer failures.
    #[error("remote error: {0}")]
    Remote(ErrorInfo),
    /// Aggregate report of every failed task of a cluster job array.
    #[error("cluster job {job_id}: task(s) {} failed", format_indices(.failures))]
    ClusterTasksFailed {
        /// Identifier assigned by the queue manager.
        job_id: u64,
        /// Every failed task, ordered by index.
        failures: Vec<TaskFailure>,
    },
}

fn format_indices(failures: &[TaskFailure]) -> String {
    let indices: Vec<String> = failures.iter().map(|f| f.index.to_string()).collect();
    format!("[{}]", indices.join(", "))
}

impl XpdError {
    /// Returns the payload describing the error, when the variant carries one.
    pub fn info(&self) -> Option<&ErrorInfo> {
        match self {
            XpdError::Config(info)
            | XpdError::Io(info)
            | XpdError::Serde(info)
            | XpdError::Execution(info)
            | XpdError::Remote(info) => Some(info),
            XpdError::ClusterTasksFailed { .. } => None,
        }
    }

    /// Returns the stable error code.
    pub fn code(&self) -> &str {
        match self.info() {
            Some(info) => &info.code,
            None => "cluster_tasks_failed",
        }
    }

    /// Creates an I/O error tagged with the offending path.
    pub fn io(code: &str, path: &std::path::Path, err: impl ToString) -> Self {
        XpdError::Io(
            ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
        )
    }

    /// Refusal to overwrite an existing run directory.
    pub fn path_exists(path: &std::path::Path) -> Self {
        XpdError::Config(
            ErrorInfo::new("path_exists", "run directory already exists")
                .with_context("path", path.display().to_string())
                .with_hint("pass a different tag or remove the directory"),
        )
    }

    /// Refusal to upload a directory that resolves to the home directory.
    pub fn path_too_broad(path: &std::path::Path) -> Self {
        XpdError::Config(
            ErrorInfo::new("path_too_broad", "refusing to sync the entire home directory")
                .with_context("path", path.display().to_string()),
        )
    }

    /// A remote command exited non-zero under strict checking.
    pub fn remote_command_failed(command: &str, exit_code: i32, stderr: &str) -> Self {
        XpdError::Remote(
            ErrorInfo::new("remote_command_failed", "remote command exited with failure")
                .with_context("command", command)
                .with_context("exit_code", exit_code.to_string())
                .with_context("stderr", stderr.trim_end()),
        )
    }
}
