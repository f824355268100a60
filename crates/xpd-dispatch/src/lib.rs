#![deny(missing_docs)]
#![doc = "Dispatch of experiment sweeps to local, remote and queue-managed targets."]

/// Queue job monitor.
pub mod cluster;
/// YAML configuration.
pub mod config;
pub mod dispatch;
pub mod project;
pub mod registry;
/// Batch runner entry point.
pub mod runner;
/// Execution target resolution.
pub mod target;
pub mod telemetry;

pub use cluster::{render_job_script, ClusterJob, JobState, QueueMonitor};
pub use config::{load_config, render, ClusterConfig, DispatchConfig, RunnerSpec, DEFAULT_JOB_SCRIPT};
pub use dispatch::{DispatchRequest, Dispatcher, JOB_SCRIPT_FILE};
pub use registry::{ExperimentFn, FunctionRegistry};
pub use runner::{batch_main, run_batch, BatchArgs};
pub use target::{resolve_target, target_for_alias, ExecutionTarget};
pub use telemetry::init_logging;
