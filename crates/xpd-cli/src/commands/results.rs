use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use xpd_core::RunDirectory;

#[derive(Args, Debug)]
pub struct ResultsArgs {
    /// Run directory produced by `xpd dispatch`.
    pub run: PathBuf,
    /// Emit one compact line instead of pretty JSON.
    #[arg(long)]
    pub compact: bool,
}

pub fn run(args: &ResultsArgs) -> Result<(), Box<dyn Error>> {
    let run = RunDirectory::at(xpd_remote::expand_tilde(&args.run)?);
    let results = run.collect_results()?;
    let body = if args.compact {
        serde_json::to_string(&results)?
    } else {
        serde_json::to_string_pretty(&results)?
    };
    println!("{body}");
    Ok(())
}
