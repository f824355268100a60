use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use tracing::debug;
use xpd_core::serde::from_yaml_slice;
use xpd_core::Task;
use xpd_dispatch::{load_config, DispatchConfig, DispatchRequest, Dispatcher, RunnerSpec};
use xpd_pool::Workers;

#[derive(Args, Debug)]
pub struct DispatchArgs {
    /// Task records: a JSON or YAML list of maps.
    #[arg(long)]
    pub tasks: PathBuf,
    /// Namespace of the experiment function.
    #[arg(long, default_value = "demo")]
    pub script: String,
    /// Experiment function name.
    #[arg(long, default_value = "integrate")]
    pub function: String,
    /// ssh alias or `prefix*` glob; runs locally when omitted.
    #[arg(long)]
    pub host: Option<String>,
    /// Workers per batch runner, or `None` for every CPU.
    #[arg(long, default_value = "None")]
    pub workers: Workers,
    /// Number of batches (default: 40 on queue login nodes, else 1).
    #[arg(long = "n-batch")]
    pub n_batch: Option<usize>,
    /// Project directory uploaded with remote runs (default: current directory).
    #[arg(long)]
    pub project: Option<PathBuf>,
    /// Run directory name instead of a timestamp.
    #[arg(long)]
    pub tag: Option<String>,
    /// YAML configuration (default: `<config dir>/xpd/config.yaml`).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Overrides `data_root`.
    #[arg(long)]
    pub data_root: Option<PathBuf>,
    /// Overrides the batch runner program.
    #[arg(long)]
    pub runner: Option<String>,
    /// Show rsync transfer progress.
    #[arg(long)]
    pub progress: bool,
}

fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| dirs::config_dir().map(|dir| dir.join("xpd").join("config.yaml")))
}

fn apply_overrides(config: &mut DispatchConfig, args: &DispatchArgs) -> Result<(), Box<dyn Error>> {
    if let Some(root) = &args.data_root {
        config.data_root = root.clone();
    }
    if let Some(program) = &args.runner {
        config.runner.program = program.clone();
    }
    if args.progress {
        config.progress = true;
    }
    // Local runs of the bundled runner use this very binary.
    if args.host.is_none() && config.runner == RunnerSpec::default() {
        config.runner.program = std::env::current_exe()?.display().to_string();
    }
    Ok(())
}

pub fn run(args: &DispatchArgs) -> Result<(), Box<dyn Error>> {
    let mut config = match config_path(args.config.as_deref()) {
        Some(path) => load_config(&path)?,
        None => DispatchConfig::default(),
    };
    apply_overrides(&mut config, args)?;
    debug!(?config, "configuration loaded");

    let tasks: Vec<Task> = from_yaml_slice(&fs::read(&args.tasks)?)?;
    let cwd = std::env::current_dir()?;
    let request = DispatchRequest {
        script: args.script.clone(),
        function: args.function.clone(),
        tasks,
        host: args.host.clone(),
        workers: args.workers,
        n_batch: args.n_batch,
        project_dir: args.project.clone().unwrap_or_else(|| cwd.clone()),
        tag: args.tag.clone(),
        cwd,
    };
    let run = Dispatcher::system(config).dispatch(&request)?;
    println!("{}", run.root.display());
    Ok(())
}
