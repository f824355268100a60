use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use xpd_core::find_latest_run;

#[derive(Args, Debug)]
pub struct LatestArgs {
    /// Directory holding run directories, e.g. `~/data/<project>/<script>`.
    pub root: PathBuf,
}

pub fn run(args: &LatestArgs) -> Result<(), Box<dyn Error>> {
    let root = xpd_remote::expand_tilde(&args.root)?;
    let run = find_latest_run(&root)?;
    println!("{}", run.root.display());
    Ok(())
}
