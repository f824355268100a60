//! One dispatch: partition the tasks, pick the target and run every batch.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};
use xpd_core::{
    batch_paths, create_run, partition, stable_hash_string, write_batch, ErrorInfo, RunDirectory,
    RunIdentity, RunManifest, Task, XpdError,
};
use xpd_pool::{map, progress_bar, NullProgress, Workers};
use xpd_remote::{
    expand_tilde, remote_join, shell_quote, CommandRunner, Invocation, RunOpts, SystemRunner,
    Uplink,
};

use crate::cluster::{render_job_script, QueueMonitor};
use crate::config::{render, DispatchConfig};
use crate::project::{mirrored_cwd, project_name, remote_program, validate_project_dir};
use crate::target::{resolve_target, ExecutionTarget};

/// File name of the rendered job array script inside a cluster run.
pub const JOB_SCRIPT_FILE: &str = "job_script.sbatch";

/// Everything a caller specifies for one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    /// Namespace of the experiment function; also names the run's parent directory.
    pub script: String,
    /// Experiment function name.
    pub function: String,
    /// Parameter records in caller order.
    pub tasks: Vec<Task>,
    /// ssh alias, `prefix*` glob, or `None` for this machine.
    pub host: Option<String>,
    /// Workers per batch runner.
    pub workers: Workers,
    /// Batch count; defaults depend on the target.
    pub n_batch: Option<usize>,
    /// Project root, uploaded with remote runs.
    pub project_dir: PathBuf,
    /// Run directory name; a timestamp when absent.
    pub tag: Option<String>,
    /// Working directory of the batch runners (mirrored on remote hosts).
    pub cwd: PathBuf,
}

impl DispatchRequest {
    /// Request with default settings that runs locally from `project_dir`.
    pub fn new(
        script: impl Into<String>,
        function: impl Into<String>,
        tasks: Vec<Task>,
        project_dir: impl Into<PathBuf>,
    ) -> Self {
        let project_dir = project_dir.into();
        Self {
            script: script.into(),
            function: function.into(),
            tasks,
            host: None,
            workers: Workers::All,
            n_batch: None,
            cwd: project_dir.clone(),
            project_dir,
            tag: None,
        }
    }
}

/// Runs experiment sweeps on the configured targets.
pub struct Dispatcher {
    config: DispatchConfig,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish()
    }
}

impl Dispatcher {
    /// Dispatcher spawning processes through `runner`.
    pub fn new(config: DispatchConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Dispatcher spawning real processes.
    pub fn system(config: DispatchConfig) -> Self {
        Self::new(config, Arc::new(SystemRunner))
    }

    /// Active configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Writes the batches of `request` and runs them on the resolved target.
    ///
    /// Returns the local run directory, which holds every result on success.
    pub fn dispatch(&self, request: &DispatchRequest) -> Result<RunDirectory, XpdError> {
        let project = validate_project_dir(&request.project_dir)?;
        let target = resolve_target(
            request.host.as_deref(),
            &self.config.ssh_config,
            &self.config.cluster,
        )?;
        let n_batch = request
            .n_batch
            .unwrap_or_else(|| target.default_batches(&self.config.cluster));
        info!(
            execution = %target,
            tasks = request.tasks.len(),
            n_batch,
            "dispatching {}/{}",
            request.script,
            request.function
        );

        let run = self.prepare(request, &project, &target, n_batch)?;
        let paths = batch_paths(&run)?;
        if paths.is_empty() {
            return Err(XpdError::Config(
                ErrorInfo::new("empty_dispatch", "no batch files were written")
                    .with_context("path", run.xps.display().to_string())
                    .with_hint("request at least one batch"),
            ));
        }

        match &target {
            ExecutionTarget::Local => self.run_local(request, &paths)?,
            ExecutionTarget::PlainRemote { host } => {
                self.run_remote(request, host, &project, &run, &paths)?
            }
            ExecutionTarget::QueuedCluster { host } => {
                self.run_cluster(request, host, &project, &run, paths.len())?
            }
        }
        info!(path = %run.root.display(), "dispatch finished");
        Ok(run)
    }

    /// Creates the run directory and writes batches and manifest.
    fn prepare(
        &self,
        request: &DispatchRequest,
        project: &Path,
        target: &ExecutionTarget,
        n_batch: usize,
    ) -> Result<RunDirectory, XpdError> {
        let parent = expand_tilde(&self.config.data_root)?
            .join(project_name(project))
            .join(&request.script);
        let run = create_run(&parent, &RunIdentity::from_tag(request.tag.as_deref()))?;

        let batches = partition(&request.tasks, n_batch);
        info!(tasks = request.tasks.len(), path = %run.root.display(), "saving batches");
        map(
            |batch| write_batch(&run, batch),
            &batches,
            Workers::All,
            &NullProgress,
        )?;

        RunManifest {
            identity: run.identity.clone(),
            created_at: Local::now().to_rfc3339(),
            host: target.host().unwrap_or("local").to_string(),
            target: target.kind().to_string(),
            script: request.script.clone(),
            function: request.function.clone(),
            workers: request.workers.to_string(),
            tasks: request.tasks.len(),
            batches: batches.len(),
            tasks_hash: stable_hash_string(&request.tasks)?,
        }
        .write(&run.root)?;
        Ok(run)
    }

    /// Wire arguments of one batch runner invocation.
    fn batch_args(&self, request: &DispatchRequest, xps: String) -> Vec<String> {
        let mut args = self.config.runner.args.clone();
        args.extend([
            request.script.clone(),
            request.function.clone(),
            xps,
            request.workers.to_string(),
        ]);
        args
    }

    fn run_local(&self, request: &DispatchRequest, paths: &[PathBuf]) -> Result<(), XpdError> {
        for xps in paths {
            let invocation = Invocation::new(self.config.runner.program.clone())
                .args(self.batch_args(request, xps.display().to_string()))
                .cwd(&request.cwd)
                .streamed();
            info!(batch = %xps.display(), "running batch");
            let output = self.runner.run(&invocation)?;
            if !output.success() {
                return Err(XpdError::Execution(
                    ErrorInfo::new("batch_failed", "batch runner exited with failure")
                        .with_context("batch", xps.display().to_string())
                        .with_context("exit_code", output.exit_code.to_string()),
                ));
            }
        }
        Ok(())
    }

    /// Remote counterparts of the run directory and project copy.
    fn remote_layout(&self, project: &Path, run: &RunDirectory) -> Result<(String, String), XpdError> {
        let data_root = expand_tilde(&self.config.data_root)?;
        let relative = run.root.strip_prefix(&data_root).map_err(|err| {
            XpdError::Config(
                ErrorInfo::new("run_dir_outside_data_root", err.to_string())
                    .with_context("path", run.root.display().to_string()),
            )
        })?;
        let remote_run = remote_join(&self.config.remote_data_root, relative.to_string_lossy());
        let remote_project = remote_join(&remote_run, project_name(project));
        Ok((remote_run, remote_project))
    }

    fn connect(&self, host: &str) -> Result<Uplink, XpdError> {
        Uplink::connect(host, self.runner.clone(), self.config.uplink_opts())
    }

    /// Runs the environment setup command inside the remote project copy.
    fn setup(&self, uplink: &Uplink, project: &Path, remote_project: &str) -> Result<(), XpdError> {
        let Some(command) = setup_command(&self.config.setup_command, project, remote_project)
        else {
            return Ok(());
        };
        info!(host = uplink.host(), "preparing remote environment");
        uplink.run(&command, &RunOpts::streamed())?;
        Ok(())
    }

    fn remote_command(&self, program: &str, args: Vec<String>) -> String {
        std::iter::once(program.to_string())
            .chain(args.into_iter().map(|arg| quote_arg(&arg)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn run_remote(
        &self,
        request: &DispatchRequest,
        host: &str,
        project: &Path,
        run: &RunDirectory,
        paths: &[PathBuf],
    ) -> Result<(), XpdError> {
        let (remote_run, remote_project) = self.remote_layout(project, run)?;
        let cwd = mirrored_cwd(&request.cwd, project, &remote_project);
        let program = remote_program(&self.config.runner, project, &remote_project)?;
        let remote_paths = paths
            .iter()
            .map(|xps| remote_batch_path(&remote_run, run, xps))
            .collect::<Vec<_>>();

        let uplink = self.connect(host)?;
        uplink.scoped_sync(&remote_run, &run.root, &[project.to_path_buf()], |up| {
            self.setup(up, project, &remote_project)?;
            for xps in &remote_paths {
                let command = format!(
                    "cd {cwd} && {}",
                    self.remote_command(&program, self.batch_args(request, xps.clone()))
                );
                info!(host, batch = %xps, "running batch");
                up.run(&command, &RunOpts::streamed())?;
            }
            Ok(())
        })
    }

    fn run_cluster(
        &self,
        request: &DispatchRequest,
        host: &str,
        project: &Path,
        run: &RunDirectory,
        n_batch: usize,
    ) -> Result<(), XpdError> {
        let (remote_run, remote_project) = self.remote_layout(project, run)?;
        let cwd = mirrored_cwd(&request.cwd, project, &remote_project);
        let program = remote_program(&self.config.runner, project, &remote_project)?;

        let xps = remote_join(&remote_run, "xps/$SLURM_ARRAY_TASK_ID");
        let command = self.remote_command(&program, self.batch_args(request, xps));
        let script = render_job_script(
            &self.config.cluster,
            &request.script,
            n_batch,
            &remote_run,
            &cwd,
            &command,
        );
        let script_path = run.root.join(JOB_SCRIPT_FILE);
        fs::write(&script_path, script)
            .map_err(|err| XpdError::io("job_script_write", &script_path, err))?;
        for dir in ["error", "output"] {
            let path = run.root.join(dir);
            fs::create_dir_all(&path).map_err(|err| XpdError::io("run_dir_create", &path, err))?;
        }

        let uplink = self.connect(host)?;
        uplink.scoped_sync(&remote_run, &run.root, &[project.to_path_buf()], |up| {
            self.setup(up, project, &remote_project)?;
            let monitor = QueueMonitor::new(up, &self.config.cluster, &remote_run)?;
            let bar = progress_bar(n_batch as u64, "jobs");
            match monitor.run(n_batch, &bar) {
                Ok(_) => Ok(()),
                Err(err) => {
                    warn!(error = %err, "cluster job did not complete cleanly");
                    Err(err)
                }
            }
        })
    }
}

/// Setup command rendered for `project`, run from its remote copy.
fn setup_command(template: &str, project: &Path, remote_project: &str) -> Option<String> {
    if template.trim().is_empty() {
        return None;
    }
    let name = project_name(project);
    let command = render(template, &[("project", &name)]);
    Some(format!("cd {remote_project} && {command}"))
}

/// `<remote_run>/xps/<i>` for the local batch file `xps`.
fn remote_batch_path(remote_run: &str, run: &RunDirectory, xps: &Path) -> String {
    let relative = xps.strip_prefix(&run.root).unwrap_or(xps);
    remote_join(remote_run, relative.to_string_lossy())
}

/// Quotes an argument for the remote shell unless it is a plain word, a `~/`
/// path that needs tilde expansion or a `$VAR` reference.
fn quote_arg(arg: &str) -> String {
    let plain = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./~:=$".contains(c));
    if plain && !arg.is_empty() {
        arg.to_string()
    } else {
        shell_quote(arg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_arguments_stay_unquoted() {
        assert_eq!(quote_arg("~/data/p/xps/0"), "~/data/p/xps/0");
        assert_eq!(quote_arg("None"), "None");
        assert_eq!(quote_arg("my script"), "'my script'");
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn default_setup_builds_outside_the_run_directory() {
        let config = DispatchConfig::default();
        let command = setup_command(
            &config.setup_command,
            Path::new("/srv/code/proj"),
            "~/data/proj/s/v1/proj",
        );
        assert_eq!(
            command.as_deref(),
            Some(
                "cd ~/data/proj/s/v1/proj && \
                 CARGO_TARGET_DIR=~/.cache/xpd/proj cargo build --release --quiet"
            )
        );
        assert_eq!(setup_command("  ", Path::new("/srv/proj"), "~/r/proj"), None);
    }

    #[test]
    fn remote_batch_paths_mirror_the_run() {
        let run = RunDirectory::at("/home/u/data/p/s/v1");
        assert_eq!(
            remote_batch_path("~/data/p/s/v1", &run, Path::new("/home/u/data/p/s/v1/xps/3")),
            "~/data/p/s/v1/xps/3"
        );
    }
}
