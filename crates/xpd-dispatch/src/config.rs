use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use xpd_core::serde::from_yaml_slice;
use xpd_core::{ErrorInfo, XpdError};
use xpd_remote::UplinkOpts;

/// SLURM array script used when no custom template is configured.
///
/// Placeholders: `{job_name}`, `{last_index}`, `{run_dir}`, `{cwd}`, `{command}`.
/// Log paths are relative to the run directory, where the script is submitted.
pub const DEFAULT_JOB_SCRIPT: &str = "#!/bin/bash
#SBATCH --job-name={job_name}
#SBATCH --array=0-{last_index}
#SBATCH --output=output/%a
#SBATCH --error=error/%a

cd {cwd}
{command}
";

/// YAML configuration of the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Local root under which run directories are created.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Remote root mirroring `data_root`; `~` is left for the remote shell.
    #[serde(default = "default_remote_data_root")]
    pub remote_data_root: String,
    /// OpenSSH client configuration used for alias globs.
    #[serde(default = "default_ssh_config")]
    pub ssh_config: PathBuf,
    /// Idle window of the ssh control master.
    #[serde(default = "default_control_persist")]
    pub control_persist: String,
    /// Whole-transfer rsync progress.
    #[serde(default)]
    pub progress: bool,
    /// Environment setup run once per remote session inside the project copy.
    /// `{project}` expands to the project name. Empty disables it.
    ///
    /// The default keeps cargo's build tree under `~/.cache/xpd/{project}` on
    /// the remote host, so it outlives the run and is never downloaded with
    /// the results.
    #[serde(default = "default_setup_command")]
    pub setup_command: String,
    /// How batch runners are launched.
    #[serde(default)]
    pub runner: RunnerSpec,
    /// Queue-managed cluster policy.
    #[serde(default)]
    pub cluster: ClusterConfig,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("~/data")
}

fn default_remote_data_root() -> String {
    "~/data".to_string()
}

fn default_ssh_config() -> PathBuf {
    PathBuf::from("~/.ssh/config")
}

fn default_control_persist() -> String {
    "1m".to_string()
}

fn default_setup_command() -> String {
    "CARGO_TARGET_DIR=~/.cache/xpd/{project} cargo build --release --quiet".to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            remote_data_root: default_remote_data_root(),
            ssh_config: default_ssh_config(),
            control_persist: default_control_persist(),
            progress: false,
            setup_command: default_setup_command(),
            runner: RunnerSpec::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

impl DispatchConfig {
    /// Uplink options derived from this configuration.
    pub fn uplink_opts(&self) -> UplinkOpts {
        UplinkOpts {
            control_persist: self.control_persist.clone(),
            progress: self.progress,
            ..UplinkOpts::default()
        }
    }
}

/// Batch runner program and the arguments placed before
/// `<script> <function> <xps> <workers>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSpec {
    /// Local program; a bare name is looked up on `PATH`.
    #[serde(default = "default_program")]
    pub program: String,
    /// Argument prefix.
    #[serde(default = "default_runner_args")]
    pub args: Vec<String>,
    /// Program on remote hosts. When unset, `program` is used if it is a bare
    /// name or lies inside the project.
    #[serde(default)]
    pub remote_program: Option<String>,
}

fn default_program() -> String {
    "xpd".to_string()
}

fn default_runner_args() -> Vec<String> {
    vec!["run-batch".to_string()]
}

impl Default for RunnerSpec {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_runner_args(),
            remote_program: None,
        }
    }
}

/// Queue policy. Commands are templates over `{job_id}`, `{run_dir}` and
/// `{index}`; only the shape of their output matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Host alias prefixes that denote queue login nodes.
    #[serde(default = "default_login_prefixes")]
    pub login_prefixes: Vec<String>,
    /// Batches written for cluster dispatches without an explicit count.
    #[serde(default = "default_batches")]
    pub default_batches: usize,
    /// Sleep between status queries.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Job array script template, see [`DEFAULT_JOB_SCRIPT`].
    #[serde(default = "default_job_script")]
    pub job_script: String,
    /// Submission command, run inside the remote run directory.
    #[serde(default = "default_submit_command")]
    pub submit_command: String,
    /// Regex whose first group is the job id in the submission response.
    #[serde(default = "default_job_id_pattern")]
    pub job_id_pattern: String,
    /// Prints the number of pending or running array tasks.
    #[serde(default = "default_status_command")]
    pub status_command: String,
    /// Lists failed array tasks, one per line.
    #[serde(default = "default_accounting_command")]
    pub accounting_command: String,
    /// Regex capturing `(index, node)` from an accounting line.
    #[serde(default = "default_failure_pattern")]
    pub failure_pattern: String,
    /// Prints the captured error log of one task.
    #[serde(default = "default_error_log_command")]
    pub error_log_command: String,
}

fn default_login_prefixes() -> Vec<String> {
    vec!["login-".to_string()]
}

fn default_batches() -> usize {
    40
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_job_script() -> String {
    DEFAULT_JOB_SCRIPT.to_string()
}

fn default_submit_command() -> String {
    "sbatch job_script.sbatch".to_string()
}

fn default_job_id_pattern() -> String {
    r"job (\d+)".to_string()
}

fn default_status_command() -> String {
    "squeue -j {job_id} -h -t pending,running -r | wc -l".to_string()
}

fn default_accounting_command() -> String {
    "sacct -j {job_id} --format=JobID,State,ExitCode,NodeList | grep -E FAILED".to_string()
}

fn default_failure_pattern() -> String {
    r"_(\d+)\s.*\s(\S+)\s*$".to_string()
}

fn default_error_log_command() -> String {
    "cat {run_dir}/error/{index}".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            login_prefixes: default_login_prefixes(),
            default_batches: default_batches(),
            poll_interval_ms: default_poll_interval_ms(),
            job_script: default_job_script(),
            submit_command: default_submit_command(),
            job_id_pattern: default_job_id_pattern(),
            status_command: default_status_command(),
            accounting_command: default_accounting_command(),
            failure_pattern: default_failure_pattern(),
            error_log_command: default_error_log_command(),
        }
    }
}

impl ClusterConfig {
    /// True when `host` names a queue login node.
    pub fn is_login_node(&self, host: &str) -> bool {
        self.login_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && host.starts_with(prefix.as_str()))
    }
}

/// Loads the configuration at `path`; a missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<DispatchConfig, XpdError> {
    if !path.exists() {
        return Ok(DispatchConfig::default());
    }
    let bytes = fs::read(path).map_err(|err| {
        XpdError::Config(
            ErrorInfo::new("config_read", err.to_string())
                .with_context("path", path.display().to_string()),
        )
    })?;
    from_yaml_slice(&bytes)
}

/// Substitutes `{key}` placeholders in `template`.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |text, (key, value)| {
        text.replace(&format!("{{{key}}}"), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = "remote_data_root: /scratch/me\ncluster:\n  poll_interval_ms: 0\n";
        let config: DispatchConfig = from_yaml_slice(yaml.as_bytes()).unwrap();
        assert_eq!(config.remote_data_root, "/scratch/me");
        assert_eq!(config.cluster.poll_interval_ms, 0);
        assert_eq!(config.cluster.default_batches, 40);
        assert_eq!(config.runner, RunnerSpec::default());
        assert_eq!(config.data_root, PathBuf::from("~/data"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/xpd.yaml")).unwrap();
        assert_eq!(config, DispatchConfig::default());
    }

    #[test]
    fn login_nodes_match_by_prefix() {
        let cluster = ClusterConfig::default();
        assert!(cluster.is_login_node("login-hpc"));
        assert!(!cluster.is_login_node("my-gcp-worker1"));
    }

    #[test]
    fn render_replaces_every_occurrence() {
        let text = render("{a}-{b}-{a}", &[("a", "1"), ("b", "2")]);
        assert_eq!(text, "1-2-1");
    }
}
