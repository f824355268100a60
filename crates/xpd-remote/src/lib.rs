//! Remote plumbing for xpd.
//!
//! Everything that touches another machine goes through a [`CommandRunner`]:
//! the production [`SystemRunner`] spawns `ssh` and `rsync`, while
//! [`MockRunner`] records invocations and replays scripted output.

mod paths;
mod runner;
mod ssh_config;
mod uplink;

pub use paths::{expand_tilde, home_dir, remote_join};
pub use runner::{CommandOutput, CommandRunner, Invocation, MockRunner, SystemRunner};
pub use ssh_config::{HostEntry, SshConfig};
pub use uplink::{parse_rsync_version, shell_quote, RunOpts, Uplink, UplinkOpts};
