#![deny(missing_docs)]
#![doc = "Core error, task and run-directory types shared by the xpd crates."]

pub mod errors;
/// Canonical hashing helpers.
pub mod hash;
pub mod layout;
pub mod provenance;
/// Canonical JSON and YAML serde helpers.
pub mod serde;
/// Task records and batches.
pub mod task;

pub use errors::{ErrorInfo, TaskFailure, XpdError};
pub use hash::stable_hash_string;
pub use layout::{
    batch_paths, batch_size, create_run, find_latest_run, partition, read_batch, read_results,
    res_path, write_batch, write_results, RunDirectory, RunIdentity, TIMESTAMP_FORMAT,
};
pub use provenance::RunManifest;
pub use task::{task, Batch, Task};
