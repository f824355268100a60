//! Command runner abstraction for executing local programs.
//!
//! `CommandRunner` is the seam every process spawn goes through, whether it
//! is `ssh`, `rsync` or a local batch runner. `SystemRunner` is the production
//! implementation. `MockRunner` is the test double that records invocations
//! and returns preset responses.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use xpd_core::{ErrorInfo, XpdError};

/// A program, its arguments and how to treat its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable name or path.
    pub program: String,
    /// Arguments, passed verbatim (no shell).
    pub args: Vec<String>,
    /// Working directory; inherits the caller's when `None`.
    pub cwd: Option<PathBuf>,
    /// Capture stdout/stderr instead of streaming them to the console.
    pub capture: bool,
}

impl Invocation {
    /// Starts an invocation that captures its output.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            capture: true,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Streams output to the console instead of capturing it.
    pub fn streamed(mut self) -> Self {
        self.capture = false;
        self
    }

    /// Space separated rendering for logs and dry runs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Captured standard output (empty when streamed).
    pub stdout: String,
    /// Captured standard error (empty when streamed).
    pub stderr: String,
    /// Exit code; `-1` when the process was killed by a signal.
    pub exit_code: i32,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Self::default()
        }
    }

    /// True for exit code zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes invocations. Returns `Err` only when the process could not be
/// started; a non-zero exit is reported through [`CommandOutput::exit_code`].
pub trait CommandRunner: Send + Sync {
    /// Runs the invocation to completion.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, XpdError>;
}

/// Production runner backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, XpdError> {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }
        let spawn_error = |err: std::io::Error| {
            XpdError::Io(
                ErrorInfo::new("spawn_failed", err.to_string())
                    .with_context("program", invocation.program.clone()),
            )
        };
        if invocation.capture {
            let output = command.stdin(Stdio::null()).output().map_err(spawn_error)?;
            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code().unwrap_or(-1),
            })
        } else {
            let status = command.status().map_err(spawn_error)?;
            Ok(CommandOutput {
                exit_code: status.code().unwrap_or(-1),
                ..CommandOutput::default()
            })
        }
    }
}

type Handler = Box<dyn Fn(&Invocation) -> Option<Result<CommandOutput, XpdError>> + Send + Sync>;

/// Test-double runner that records invocations and returns pre-configured responses.
///
/// A handler, when installed, is consulted first; queued responses are used
/// next; anything else succeeds with empty output.
#[derive(Default)]
pub struct MockRunner {
    responses: Mutex<VecDeque<Result<CommandOutput, XpdError>>>,
    invocations: Mutex<Vec<Invocation>>,
    handler: Option<Handler>,
}

impl MockRunner {
    /// Runner that succeeds with empty output for every invocation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner that replays `responses` in order.
    pub fn with_responses(responses: Vec<Result<CommandOutput, XpdError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// Runner that answers through `handler`, falling back to queued responses
    /// when it returns `None`.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&Invocation) -> Option<Result<CommandOutput, XpdError>> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::default()
        }
    }

    /// Queues one more response.
    pub fn push_response(&self, response: Result<CommandOutput, XpdError>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    /// Every invocation seen so far, in order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Rendered command lines of every invocation, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(Invocation::command_line)
            .collect()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, XpdError> {
        if let Ok(mut seen) = self.invocations.lock() {
            seen.push(invocation.clone());
        }
        if let Some(handler) = &self.handler {
            if let Some(response) = handler(invocation) {
                return response;
            }
        }
        let queued = self
            .responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        queued.unwrap_or_else(|| Ok(CommandOutput::default()))
    }
}
