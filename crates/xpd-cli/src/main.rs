use std::error::Error;

use clap::{Parser, Subcommand};
use commands::{
    dispatch::{self, DispatchArgs},
    latest::{self, LatestArgs},
    results::{self, ResultsArgs},
};
use xpd_dispatch::{init_logging, run_batch, BatchArgs};

mod commands;
mod demo;

#[derive(Parser, Debug)]
#[command(
    name = "xpd",
    about = "Dispatch experiment sweeps locally, over ssh or to a SLURM cluster"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Partition a task list into batches and run them on a target.
    Dispatch(DispatchArgs),
    /// Evaluate one batch file with a built-in experiment (runner entry point).
    RunBatch(BatchArgs),
    /// Print the newest timestamped run below a directory.
    Latest(LatestArgs),
    /// Print the collected results of a run as JSON.
    Results(ResultsArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Command::Dispatch(args) => dispatch::run(&args),
        Command::RunBatch(args) => {
            run_batch(&demo::registry(), &args)?;
            Ok(())
        }
        Command::Latest(args) => latest::run(&args),
        Command::Results(args) => results::run(&args),
    }
}
