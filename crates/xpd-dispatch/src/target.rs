use std::fmt;
use std::path::Path;

use xpd_core::XpdError;
use xpd_remote::{expand_tilde, SshConfig};

use crate::config::ClusterConfig;

/// Where the batches of a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionTarget {
    /// Subprocesses on this machine.
    Local,
    /// A host reached over ssh that runs batches directly.
    PlainRemote {
        /// Resolved ssh alias.
        host: String,
    },
    /// A queue login node that submits batches as a job array.
    QueuedCluster {
        /// Resolved ssh alias.
        host: String,
    },
}

impl ExecutionTarget {
    /// Host alias for remote targets.
    pub fn host(&self) -> Option<&str> {
        match self {
            ExecutionTarget::Local => None,
            ExecutionTarget::PlainRemote { host } | ExecutionTarget::QueuedCluster { host } => {
                Some(host.as_str())
            }
        }
    }

    /// Short label recorded in run manifests.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionTarget::Local => "local",
            ExecutionTarget::PlainRemote { .. } => "remote",
            ExecutionTarget::QueuedCluster { .. } => "cluster",
        }
    }

    /// Batches written when the caller gives no count.
    pub fn default_batches(&self, cluster: &ClusterConfig) -> usize {
        match self {
            ExecutionTarget::QueuedCluster { .. } => cluster.default_batches,
            _ => 1,
        }
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host() {
            Some(host) => write!(f, "{} ({host})", self.kind()),
            None => write!(f, "{}", self.kind()),
        }
    }
}

/// Resolves a requested host into an execution target.
///
/// `None` runs locally. A request ending in `*` is matched against the aliases
/// of the ssh config at `ssh_config`, which is only read in that case.
pub fn resolve_target(
    host: Option<&str>,
    ssh_config: &Path,
    cluster: &ClusterConfig,
) -> Result<ExecutionTarget, XpdError> {
    let Some(request) = host else {
        return Ok(ExecutionTarget::Local);
    };
    let host = if request.ends_with('*') {
        SshConfig::load(&expand_tilde(ssh_config)?)?.resolve(request)?
    } else {
        request.to_string()
    };
    Ok(target_for_alias(host, cluster))
}

/// Classifies an already resolved alias.
pub fn target_for_alias(host: String, cluster: &ClusterConfig) -> ExecutionTarget {
    if cluster.is_login_node(&host) {
        ExecutionTarget::QueuedCluster { host }
    } else {
        ExecutionTarget::PlainRemote { host }
    }
}
