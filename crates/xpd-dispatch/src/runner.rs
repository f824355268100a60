//! Batch runner: the subprocess entry point that evaluates one batch file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser};
use tracing::{error, info};
use xpd_core::{read_batch, res_path, write_results, XpdError};
use xpd_pool::{map, progress_bar, Workers};
use xpd_remote::expand_tilde;

use crate::registry::FunctionRegistry;
use crate::telemetry::init_logging;

/// Positional arguments of a batch runner invocation.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct BatchArgs {
    /// Namespace the function is registered under.
    pub script: String,
    /// Function name inside the namespace.
    pub function: String,
    /// Batch file, `.../xps/<index>`.
    pub xps: PathBuf,
    /// Worker count, or `None` for every CPU.
    pub workers: Workers,
}

#[derive(Parser, Debug)]
#[command(about = "Evaluate one batch of experiments and store its results")]
struct BatchCli {
    #[command(flatten)]
    args: BatchArgs,
}

/// Evaluates the batch at `args.xps` and writes the results next to it.
///
/// Returns the result path.
pub fn run_batch(registry: &FunctionRegistry, args: &BatchArgs) -> Result<PathBuf, XpdError> {
    let f = registry.resolve(&args.script, &args.function)?;
    let xps = expand_tilde(&args.xps)?;
    let res = res_path(&xps)?;
    let batch = read_batch(&xps)?;
    info!(
        batch = batch.index,
        tasks = batch.len(),
        workers = %args.workers,
        "running batch"
    );
    let bar = progress_bar(batch.len() as u64, &args.function);
    let results = map(|task| f(task), &batch.tasks, args.workers, &bar)?;
    write_results(&res, &results)?;
    info!(path = %res.display(), "results written");
    Ok(res)
}

/// `main` for binaries that embed experiment functions.
///
/// Parses `<script> <function> <xps> <workers>` from the process arguments and
/// exits non-zero on any failure.
pub fn batch_main(registry: &FunctionRegistry) -> ExitCode {
    init_logging();
    let cli = BatchCli::parse();
    match run_batch(registry, &cli.args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "batch failed");
            ExitCode::FAILURE
        }
    }
}
