//! Queue job monitor for job-array submissions on SLURM-style clusters.
//!
//! A job moves `Submitted -> Polling -> AllTerminal`. Polling advances a
//! progress indicator by however many array tasks left the pending/running
//! set since the previous query; once none remain the accounting query is
//! scanned for failed tasks and their error logs are fetched.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use regex::Regex;
use tracing::{error, info};
use xpd_core::{ErrorInfo, TaskFailure, XpdError};
use xpd_pool::Progress;
use xpd_remote::{RunOpts, Uplink};

use crate::config::{render, ClusterConfig};

/// Lifecycle of a submitted job array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Accepted by the queue, not yet queried.
    Submitted,
    /// Some tasks are still pending or running.
    Polling,
    /// No task is pending or running.
    AllTerminal,
}

/// A submitted job array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterJob {
    /// Identifier assigned by the queue manager.
    pub job_id: u64,
    /// Array size, one task per batch.
    pub total_tasks: usize,
    /// Tasks still pending or running as of the last query.
    pub remaining: usize,
    /// Current state.
    pub state: JobState,
}

impl ClusterJob {
    /// A freshly submitted job with every task outstanding.
    pub fn submitted(job_id: u64, total_tasks: usize) -> Self {
        Self {
            job_id,
            total_tasks,
            remaining: total_tasks,
            state: JobState::Submitted,
        }
    }
}

/// Drives one job array through its lifecycle over an [`Uplink`].
#[derive(Debug)]
pub struct QueueMonitor<'a> {
    uplink: &'a Uplink,
    config: &'a ClusterConfig,
    run_dir: String,
    job_id_pattern: Regex,
    failure_pattern: Regex,
}

impl<'a> QueueMonitor<'a> {
    /// Monitor for jobs whose run directory on the login node is `run_dir`.
    pub fn new(uplink: &'a Uplink, config: &'a ClusterConfig, run_dir: &str) -> Result<Self, XpdError> {
        Ok(Self {
            uplink,
            config,
            run_dir: run_dir.to_string(),
            job_id_pattern: compile("job_id_pattern", &config.job_id_pattern)?,
            failure_pattern: compile("failure_pattern", &config.failure_pattern)?,
        })
    }

    /// Submits the job script from inside the run directory.
    pub fn submit(&self, total_tasks: usize) -> Result<ClusterJob, XpdError> {
        let command = format!("cd {} && {}", self.run_dir, self.config.submit_command);
        let output = self.uplink.run(&command, &RunOpts::default())?;
        let job_id = self
            .job_id_pattern
            .captures(&output.stdout)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .ok_or_else(|| {
                XpdError::Remote(
                    ErrorInfo::new("submit_unparsed", "no job id in the submission response")
                        .with_context("stdout", output.stdout.trim_end()),
                )
            })?;
        info!(job_id, tasks = total_tasks, "job array submitted");
        Ok(ClusterJob::submitted(job_id, total_tasks))
    }

    /// Sleeps one interval, queries the outstanding task count and advances
    /// `progress` by the decrease. Returns true once the job is terminal.
    pub fn poll_once(&self, job: &mut ClusterJob, progress: &dyn Progress) -> Result<bool, XpdError> {
        thread::sleep(Duration::from_millis(self.config.poll_interval_ms));
        let job_id = job.job_id.to_string();
        let command = render(
            &self.config.status_command,
            &[("job_id", &job_id), ("run_dir", &self.run_dir)],
        );
        let output = self.uplink.run(&command, &RunOpts::default())?;
        let count = output.stdout.trim().parse::<usize>().map_err(|err| {
            XpdError::Remote(
                ErrorInfo::new("status_unparsed", err.to_string())
                    .with_context("job_id", job_id.clone())
                    .with_context("stdout", output.stdout.trim_end()),
            )
        })?;
        progress.inc(job.remaining.saturating_sub(count) as u64);
        job.remaining = count;
        job.state = if count == 0 {
            JobState::AllTerminal
        } else {
            JobState::Polling
        };
        Ok(job.state == JobState::AllTerminal)
    }

    /// Polls until no task is pending or running.
    pub fn wait(&self, job: &mut ClusterJob, progress: &dyn Progress) -> Result<(), XpdError> {
        while !self.poll_once(job, progress)? {}
        progress.finish();
        Ok(())
    }

    /// Failed tasks of a terminal job, each with its error log.
    pub fn failures(&self, job: &ClusterJob) -> Result<Vec<TaskFailure>, XpdError> {
        let job_id = job.job_id.to_string();
        let command = render(
            &self.config.accounting_command,
            &[("job_id", &job_id), ("run_dir", &self.run_dir)],
        );
        let output = self.uplink.run(&command, &RunOpts::unchecked())?;
        let nodes = self.parse_failures(&output.stdout);

        let mut failures = Vec::with_capacity(nodes.len());
        for (index, node) in nodes {
            let index_text = index.to_string();
            let command = render(
                &self.config.error_log_command,
                &[
                    ("job_id", &job_id),
                    ("run_dir", &self.run_dir),
                    ("index", &index_text),
                ],
            );
            let log = self.uplink.run(&command, &RunOpts::unchecked())?.stdout;
            error!(job_id = job.job_id, index, node = %node, "task failed\n{}", log.trim_end());
            failures.push(TaskFailure { index, node, log });
        }
        Ok(failures)
    }

    /// `index -> node` for every accounting line the failure pattern matches.
    ///
    /// Indices repeat across job steps; the first node seen wins.
    pub fn parse_failures(&self, accounting: &str) -> BTreeMap<usize, String> {
        let mut nodes = BTreeMap::new();
        for line in accounting.lines() {
            let Some(caps) = self.failure_pattern.captures(line) else {
                continue;
            };
            let index = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok());
            let node = caps.get(2).map(|m| m.as_str().to_string());
            if let (Some(index), Some(node)) = (index, node) {
                nodes.entry(index).or_insert(node);
            }
        }
        nodes
    }

    /// Submits, waits for every task and reports failures.
    pub fn run(&self, total_tasks: usize, progress: &dyn Progress) -> Result<ClusterJob, XpdError> {
        let mut job = self.submit(total_tasks)?;
        self.wait(&mut job, progress)?;
        let failures = self.failures(&job)?;
        if !failures.is_empty() {
            return Err(XpdError::ClusterTasksFailed {
                job_id: job.job_id,
                failures,
            });
        }
        info!(job_id = job.job_id, "all array tasks completed");
        Ok(job)
    }
}

fn compile(field: &str, pattern: &str) -> Result<Regex, XpdError> {
    Regex::new(pattern).map_err(|err| {
        XpdError::Config(
            ErrorInfo::new("invalid_pattern", err.to_string())
                .with_context("field", field)
                .with_context("pattern", pattern),
        )
    })
}

/// Fills the job script template.
pub fn render_job_script(
    config: &ClusterConfig,
    job_name: &str,
    n_batch: usize,
    run_dir: &str,
    cwd: &str,
    command: &str,
) -> String {
    let last_index = n_batch.saturating_sub(1).to_string();
    render(
        &config.job_script,
        &[
            ("job_name", job_name),
            ("last_index", &last_index),
            ("run_dir", run_dir),
            ("cwd", cwd),
            ("command", command),
        ],
    )
}
