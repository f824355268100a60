//! Multiplexed connection to one remote host.
//!
//! All commands and transfers of a session share one ssh control master
//! (`ControlMaster=auto`), kept alive for `control_persist` after the last
//! use so repeated commands skip the handshake.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use xpd_core::{ErrorInfo, XpdError};

use crate::paths::{home_dir, remote_join};
use crate::runner::{CommandOutput, CommandRunner, Invocation};

/// Session-wide options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkOpts {
    /// Multiplex commands over one control master.
    pub multiplex: bool,
    /// Socket path pattern, expanded by ssh.
    pub control_path: String,
    /// Idle window the master stays alive for, e.g. `1m`.
    pub control_persist: String,
    /// Ask rsync for whole-transfer progress when it supports it.
    pub progress: bool,
    /// Render rsync command lines instead of transferring.
    pub dry: bool,
}

impl Default for UplinkOpts {
    fn default() -> Self {
        Self {
            multiplex: true,
            control_path: "~/.ssh/%r@%h:%p.socket".to_string(),
            control_persist: "1m".to_string(),
            progress: false,
            dry: false,
        }
    }
}

/// Per-command options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOpts {
    /// Turn a non-zero exit into [`XpdError::Remote`].
    pub check: bool,
    /// Capture output; when false it streams to the console.
    pub capture: bool,
    /// Run inside `bash -l` so the remote profile is sourced.
    pub login_shell: bool,
}

impl Default for RunOpts {
    fn default() -> Self {
        Self {
            check: true,
            capture: true,
            login_shell: true,
        }
    }
}

impl RunOpts {
    /// Same as default but tolerates failures.
    pub fn unchecked() -> Self {
        Self {
            check: false,
            ..Self::default()
        }
    }

    /// Same as default but streams output (long installs, batch runners).
    pub fn streamed() -> Self {
        Self {
            capture: false,
            ..Self::default()
        }
    }
}

/// Session bound to one host.
pub struct Uplink {
    host: String,
    opts: UplinkOpts,
    runner: Arc<dyn CommandRunner>,
    progress2: OnceLock<bool>,
}

impl std::fmt::Debug for Uplink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uplink")
            .field("host", &self.host)
            .field("opts", &self.opts)
            .finish()
    }
}

impl Uplink {
    /// Creates a session without touching the network.
    pub fn new(host: impl Into<String>, runner: Arc<dyn CommandRunner>, opts: UplinkOpts) -> Self {
        Self {
            host: host.into(),
            opts,
            runner,
            progress2: OnceLock::new(),
        }
    }

    /// Creates a session and opens (or reuses) the control master.
    pub fn connect(
        host: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
        opts: UplinkOpts,
    ) -> Result<Self, XpdError> {
        let uplink = Self::new(host, runner, opts);
        if !uplink.opts.dry {
            uplink.run(
                "true",
                &RunOpts {
                    login_shell: false,
                    ..RunOpts::default()
                },
            )?;
        }
        info!(host = %uplink.host, "uplink ready");
        Ok(uplink)
    }

    /// Host alias the session is bound to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// `-o` options that route ssh through the control master.
    pub fn ssh_options(&self) -> Vec<String> {
        if !self.opts.multiplex {
            return Vec::new();
        }
        vec![
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.opts.control_path),
            "-o".to_string(),
            format!("ControlPersist={}", self.opts.control_persist),
        ]
    }

    /// Runs a shell command on the host.
    pub fn run(&self, command: &str, opts: &RunOpts) -> Result<CommandOutput, XpdError> {
        let remote_command = if opts.login_shell {
            format!("bash -l -c {}", shell_quote(command))
        } else {
            command.to_string()
        };
        let mut invocation = Invocation::new("ssh")
            .args(self.ssh_options())
            .arg(self.host.clone())
            .arg(remote_command);
        if !opts.capture {
            invocation = invocation.streamed();
        }
        debug!(host = %self.host, command, "remote command");
        let output = self.runner.run(&invocation)?;
        if opts.check && !output.success() {
            if opts.capture && !output.stderr.is_empty() {
                error!(host = %self.host, stderr = %output.stderr.trim_end(), "remote command failed");
            }
            return Err(XpdError::remote_command_failed(
                command,
                output.exit_code,
                &output.stderr,
            ));
        }
        Ok(output)
    }

    /// Uploads the contents of `local` into `remote`.
    pub fn sync_up(&self, local: &Path, remote: &str) -> Result<Option<String>, XpdError> {
        let source = format!("{}/", local.display());
        let target = format!("{}:{}", self.host, remote);
        self.rsync(&source, &target)
    }

    /// Downloads the contents of `remote` into `local`.
    pub fn sync_down(&self, remote: &str, local: &Path) -> Result<Option<String>, XpdError> {
        let source = format!("{}:{}/", self.host, remote.trim_end_matches('/'));
        let target = local.display().to_string();
        self.rsync(&source, &target)
    }

    /// Delta transfer from `source` to `target` over the control master.
    ///
    /// Returns the rendered command line on dry runs.
    fn rsync(&self, source: &str, target: &str) -> Result<Option<String>, XpdError> {
        let mut invocation = Invocation::new("rsync").arg("-azhL");
        if self.opts.progress && self.supports_progress2()? {
            invocation = invocation.args(["--info=progress2", "--no-inc-recursive"]);
        }
        if self.opts.multiplex {
            let ssh = std::iter::once("ssh".to_string())
                .chain(self.ssh_options())
                .collect::<Vec<_>>()
                .join(" ");
            invocation = invocation.arg("-e").arg(ssh);
        }
        invocation = invocation.arg(source).arg(target).streamed();
        if self.opts.dry {
            return Ok(Some(invocation.command_line()));
        }
        debug!(source, target, "rsync");
        let output = self.runner.run(&invocation)?;
        if !output.success() {
            return Err(XpdError::Remote(
                ErrorInfo::new("sync_failed", "rsync exited with failure")
                    .with_context("source", source)
                    .with_context("target", target)
                    .with_context("exit_code", output.exit_code.to_string()),
            ));
        }
        Ok(None)
    }

    /// Whether the local rsync understands `--info=progress2` (3.1 and later).
    fn supports_progress2(&self) -> Result<bool, XpdError> {
        if let Some(known) = self.progress2.get() {
            return Ok(*known);
        }
        let output = self.runner.run(&Invocation::new("rsync").arg("--version"))?;
        let supported = parse_rsync_version(&output.stdout)
            .map(|(major, minor, _)| (major, minor) >= (3, 1))
            .unwrap_or(false);
        Ok(*self.progress2.get_or_init(|| supported))
    }

    /// Uploads `source` (and each of `extras`) to `target`, runs `body`, then
    /// downloads `target` back into `source`.
    ///
    /// The download is attempted whether `body` succeeds, fails or panics.
    /// When `body` fails its error is returned and a download failure is only
    /// logged; a panic is resumed after the download.
    pub fn scoped_sync<T, F>(
        &self,
        target: &str,
        source: &Path,
        extras: &[PathBuf],
        body: F,
    ) -> Result<T, XpdError>
    where
        F: FnOnce(&Self) -> Result<T, XpdError>,
    {
        let extras = extras
            .iter()
            .map(|extra| guard_upload_root(extra))
            .collect::<Result<Vec<_>, _>>()?;

        self.run(&format!("mkdir -p {target}"), &RunOpts::default())?;
        info!(host = %self.host, target, "uploading");
        self.sync_up(source, target)?;
        for extra in &extras {
            let name = extra
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            self.sync_up(extra, &remote_join(target, name))?;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(self)));
        info!(host = %self.host, target, "downloading results");
        let download = self.sync_down(target, source);
        match outcome {
            Ok(Ok(value)) => download.map(|_| value),
            Ok(Err(err)) => {
                if let Err(download_err) = download {
                    warn!(error = %download_err, "result download failed after remote error");
                }
                Err(err)
            }
            Err(payload) => {
                if let Err(download_err) = download {
                    warn!(error = %download_err, "result download failed after panic");
                }
                panic::resume_unwind(payload)
            }
        }
    }
}

/// Resolves an extra upload directory, refusing the home directory itself.
fn guard_upload_root(path: &Path) -> Result<PathBuf, XpdError> {
    let resolved = fs::canonicalize(crate::paths::expand_tilde(path)?)
        .map_err(|err| XpdError::io("upload_root", path, err))?;
    let home = home_dir()?;
    let home = fs::canonicalize(&home).unwrap_or(home);
    if resolved == home {
        return Err(XpdError::path_too_broad(&resolved));
    }
    Ok(resolved)
}

/// Wraps `text` in single quotes for a POSIX shell.
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Extracts `(major, minor, patch)` from `rsync --version` output.
pub fn parse_rsync_version(text: &str) -> Option<(u32, u32, u32)> {
    let first = text.lines().next()?;
    let mut words = first.split_whitespace();
    words.find(|word| *word == "version")?;
    let mut parts = words.next()?.split('.').map(|p| p.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some((major, minor, patch))
}
