use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One parameter record handed to an experiment function.
///
/// Keys name the function's parameters; the record is otherwise opaque to the
/// dispatcher. Key order carries no meaning.
pub type Task = BTreeMap<String, Value>;

/// A contiguous shard of the task list, persisted as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Position of the shard, `0..n_batch`.
    pub index: usize,
    /// Tasks in caller order.
    pub tasks: Vec<Task>,
}

impl Batch {
    /// Number of tasks in the shard.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when the shard carries no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Builds a task from `(key, value)` pairs.
pub fn task<K, I>(pairs: I) -> Task
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
