//! Provenance record written next to every run's batches.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::XpdError;
use crate::serde::{from_json_slice, to_canonical_json_bytes};

/// File name of the manifest inside a run directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Describes what a dispatch submitted and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunManifest {
    /// Run directory name (tag or timestamp).
    pub identity: String,
    /// RFC-3339 timestamp recording when the run was created.
    pub created_at: String,
    /// Host alias as resolved, or `local`.
    pub host: String,
    /// Execution strategy label (`local`, `remote`, `cluster`).
    pub target: String,
    /// Namespace of the experiment function.
    pub script: String,
    /// Experiment function name.
    pub function: String,
    /// Worker count handed to each batch runner.
    pub workers: String,
    /// Number of tasks submitted.
    pub tasks: usize,
    /// Number of batches written.
    pub batches: usize,
    /// SHA-256 of the canonical task list.
    pub tasks_hash: String,
}

impl RunManifest {
    /// Writes the manifest into `run_root`.
    pub fn write(&self, run_root: &Path) -> Result<(), XpdError> {
        let path = run_root.join(MANIFEST_FILE);
        let bytes = to_canonical_json_bytes(self)?;
        fs::write(&path, bytes).map_err(|err| XpdError::io("manifest_write", &path, err))
    }

    /// Loads the manifest of an existing run.
    pub fn read(run_root: &Path) -> Result<Self, XpdError> {
        let path = run_root.join(MANIFEST_FILE);
        let bytes = fs::read(&path).map_err(|err| XpdError::io("manifest_read", &path, err))?;
        from_json_slice(&bytes)
    }
}
