//! Run-directory layout and the batch partitioner.
//!
//! A run lives under `<root>/<identity>/` with one serialized [`Batch`] per
//! index in `xps/` and the matching result sequence in `res/`. The two trees
//! are linked purely by file name.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde_json::Value;

use crate::errors::{ErrorInfo, XpdError};
use crate::serde::{from_json_slice, to_canonical_json_bytes};
use crate::task::{Batch, Task};

/// Format of generated run identities, e.g. `2024-03-01_at_13-05-59`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_at_%H-%M-%S";

/// Name of the batch input directory.
pub const XPS_DIR: &str = "xps";
/// Name of the batch result directory.
pub const RES_DIR: &str = "res";

/// How a run directory is named below its root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunIdentity {
    /// Caller supplied tag, e.g. `v1`.
    Tag(String),
    /// Local wall-clock time at creation.
    Timestamp,
}

impl RunIdentity {
    /// Builds an identity from an optional tag, falling back to a timestamp.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some(tag) if !tag.is_empty() => RunIdentity::Tag(tag.to_string()),
            _ => RunIdentity::Timestamp,
        }
    }

    /// Resolves the identity to a directory name.
    pub fn resolve(&self) -> String {
        match self {
            RunIdentity::Tag(tag) => tag.clone(),
            RunIdentity::Timestamp => Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

/// Handle on one dispatch's data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    /// `<root>/<identity>`.
    pub root: PathBuf,
    /// Directory name below the parent root.
    pub identity: String,
    /// Batch inputs.
    pub xps: PathBuf,
    /// Batch results.
    pub res: PathBuf,
}

impl RunDirectory {
    /// Describes an existing (or yet to be created) run directory without touching disk.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let identity = root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            xps: root.join(XPS_DIR),
            res: root.join(RES_DIR),
            root,
            identity,
        }
    }

    /// Path of the serialized batch with the given index.
    pub fn xps_path(&self, index: usize) -> PathBuf {
        self.xps.join(index.to_string())
    }

    /// Path of the result file with the given index.
    pub fn res_path(&self, index: usize) -> PathBuf {
        self.res.join(index.to_string())
    }

    /// Reads every result file in batch order and concatenates them.
    ///
    /// The result of task `k` of the original task list ends up at position `k`.
    pub fn collect_results(&self) -> Result<Vec<Value>, XpdError> {
        let mut all = Vec::new();
        for xps in batch_paths(self)? {
            let res = res_path(&xps)?;
            if !res.exists() {
                return Err(XpdError::Io(
                    ErrorInfo::new("missing_results", "batch has no result file")
                        .with_context("path", res.display().to_string()),
                ));
            }
            all.extend(read_results(&res)?);
        }
        Ok(all)
    }
}

/// Creates `root/identity/{xps,res}`, refusing to reuse an existing directory.
pub fn create_run(root: &Path, identity: &RunIdentity) -> Result<RunDirectory, XpdError> {
    let run = RunDirectory::at(root.join(identity.resolve()));
    if run.root.exists() {
        return Err(XpdError::path_exists(&run.root));
    }
    fs::create_dir_all(&run.root).map_err(|err| XpdError::io("run_dir_create", &run.root, err))?;
    fs::create_dir(&run.xps).map_err(|err| XpdError::io("run_dir_create", &run.xps, err))?;
    fs::create_dir(&run.res).map_err(|err| XpdError::io("run_dir_create", &run.res, err))?;
    Ok(run)
}

/// Number of tasks per batch: `ceil(len / n_batch)`.
pub fn batch_size(len: usize, n_batch: usize) -> usize {
    if n_batch == 0 {
        return 0;
    }
    len.div_ceil(n_batch)
}

/// Splits `tasks` into exactly `n_batch` contiguous, possibly empty batches.
pub fn partition(tasks: &[Task], n_batch: usize) -> Vec<Batch> {
    let size = batch_size(tasks.len(), n_batch);
    (0..n_batch)
        .map(|index| {
            let start = (index * size).min(tasks.len());
            let end = (start + size).min(tasks.len());
            Batch {
                index,
                tasks: tasks[start..end].to_vec(),
            }
        })
        .collect()
}

/// Serializes `batch` to `run.xps/<index>`.
pub fn write_batch(run: &RunDirectory, batch: &Batch) -> Result<PathBuf, XpdError> {
    let path = run.xps_path(batch.index);
    let bytes = to_canonical_json_bytes(batch)?;
    fs::write(&path, bytes).map_err(|err| XpdError::io("batch_write", &path, err))?;
    Ok(path)
}

/// Reads a batch written by [`write_batch`].
pub fn read_batch(path: &Path) -> Result<Batch, XpdError> {
    let bytes = fs::read(path).map_err(|err| XpdError::io("batch_read", path, err))?;
    from_json_slice(&bytes)
}

/// Maps `.../xps/<i>` to `.../res/<i>`; no other component changes.
pub fn res_path(xps_path: &Path) -> Result<PathBuf, XpdError> {
    let not_a_batch = || {
        XpdError::Config(
            ErrorInfo::new("not_a_batch_path", "expected a path of the form .../xps/<index>")
                .with_context("path", xps_path.display().to_string()),
        )
    };
    let name = xps_path.file_name().ok_or_else(not_a_batch)?;
    let parent = xps_path.parent().ok_or_else(not_a_batch)?;
    if parent.file_name().and_then(|n| n.to_str()) != Some(XPS_DIR) {
        return Err(not_a_batch());
    }
    Ok(parent.with_file_name(RES_DIR).join(name))
}

/// Lists the batch files of a run in ascending index order.
pub fn batch_paths(run: &RunDirectory) -> Result<Vec<PathBuf>, XpdError> {
    let entries = fs::read_dir(&run.xps).map_err(|err| XpdError::io("batch_read", &run.xps, err))?;
    let mut indexed = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| XpdError::io("batch_read", &run.xps, err))?;
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(|n| n.parse::<usize>().ok()) {
            indexed.push((index, entry.path()));
        }
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, path)| path).collect())
}

/// Writes the result sequence of one batch.
pub fn write_results(path: &Path, results: &[Value]) -> Result<(), XpdError> {
    let bytes = to_canonical_json_bytes(&results)?;
    fs::write(path, bytes).map_err(|err| XpdError::io("results_write", path, err))
}

/// Reads the result sequence of one batch.
pub fn read_results(path: &Path) -> Result<Vec<Value>, XpdError> {
    let bytes = fs::read(path).map_err(|err| XpdError::io("results_read", path, err))?;
    from_json_slice(&bytes)
}

/// Returns the most recent timestamp-named run below `root`.
///
/// Tagged runs are ignored since their names carry no ordering.
pub fn find_latest_run(root: &Path) -> Result<RunDirectory, XpdError> {
    let entries = fs::read_dir(root).map_err(|err| XpdError::io("run_dir_read", root, err))?;
    let mut latest: Option<(NaiveDateTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|err| XpdError::io("run_dir_read", root, err))?;
        let name = entry.file_name();
        let Some(stamp) = name
            .to_str()
            .and_then(|n| NaiveDateTime::parse_from_str(n, TIMESTAMP_FORMAT).ok())
        else {
            continue;
        };
        if latest.as_ref().map_or(true, |(best, _)| stamp > *best) {
            latest = Some((stamp, entry.path()));
        }
    }
    latest.map(|(_, path)| RunDirectory::at(path)).ok_or_else(|| {
        XpdError::Io(
            ErrorInfo::new("no_runs", "no timestamped run directories found")
                .with_context("path", root.display().to_string()),
        )
    })
}
