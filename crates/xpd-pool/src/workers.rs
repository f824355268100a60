use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use xpd_core::{ErrorInfo, XpdError};

/// How many workers a batch runner engages.
///
/// The textual form is what travels on the batch runner's command line:
/// `None` (or `all`) for every logical CPU, otherwise an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum Workers {
    /// One worker per logical CPU.
    #[default]
    All,
    /// Exactly this many workers; `0` and `1` run sequentially in-process.
    Count(usize),
}

impl Workers {
    /// Number of worker threads this setting resolves to on the current machine.
    pub fn threads(self) -> usize {
        match self {
            Workers::All => num_cpus::get(),
            Workers::Count(n) => n,
        }
    }

    /// True when items run on the calling thread.
    pub fn is_sequential(self) -> bool {
        self.threads() <= 1
    }
}

impl fmt::Display for Workers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Workers::All => write!(f, "None"),
            Workers::Count(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for Workers {
    type Err = XpdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "None" | "none" | "all" => Ok(Workers::All),
            other => other.parse::<usize>().map(Workers::Count).map_err(|err| {
                XpdError::Config(
                    ErrorInfo::new("invalid_workers", err.to_string())
                        .with_context("value", other)
                        .with_hint("use an integer or `None`"),
                )
            }),
        }
    }
}

impl TryFrom<String> for Workers {
    type Error = XpdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Workers> for String {
    fn from(value: Workers) -> Self {
        value.to_string()
    }
}

/// Items per hand-out: `1 + len / workers / 10`.
///
/// Large enough to amortise dispatch overhead, small enough that progress
/// keeps moving.
pub fn chunk_size(len: usize, workers: usize) -> usize {
    1 + len / workers.max(1) / 10
}
