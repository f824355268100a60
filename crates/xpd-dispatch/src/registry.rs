//! Named experiment functions.
//!
//! Batch runners look functions up by `(script, name)` instead of importing
//! code at runtime; every binary that runs batches registers its experiments
//! up front.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use xpd_core::{ErrorInfo, Task, XpdError};

/// Experiment function operating on a whole task record.
pub type ExperimentFn = Arc<dyn Fn(&Task) -> Result<Value, XpdError> + Send + Sync>;

/// Experiment functions keyed by script namespace and name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<(String, String), ExperimentFn>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}

impl FunctionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function that receives the raw task record.
    pub fn register<F>(&mut self, script: &str, name: &str, f: F) -> &mut Self
    where
        F: Fn(&Task) -> Result<Value, XpdError> + Send + Sync + 'static,
    {
        self.functions
            .insert((script.to_string(), name.to_string()), Arc::new(f));
        self
    }

    /// Registers a function taking a typed parameter struct.
    ///
    /// Task keys map onto the struct's fields; the return value is stored as JSON.
    pub fn register_typed<P, R, F>(&mut self, script: &str, name: &str, f: F) -> &mut Self
    where
        P: DeserializeOwned,
        R: Serialize,
        F: Fn(P) -> Result<R, XpdError> + Send + Sync + 'static,
    {
        let label = format!("{script}/{name}");
        self.register(script, name, move |task: &Task| {
            let record = Value::Object(task.clone().into_iter().collect());
            let params: P = serde_json::from_value(record).map_err(|err| {
                XpdError::Serde(
                    ErrorInfo::new("json_deserialize", err.to_string())
                        .with_context("function", label.clone()),
                )
            })?;
            let result = f(params)?;
            serde_json::to_value(result).map_err(|err| {
                XpdError::Serde(
                    ErrorInfo::new("json_serialize", err.to_string())
                        .with_context("function", label.clone()),
                )
            })
        })
    }

    /// Looks up a function.
    pub fn resolve(&self, script: &str, name: &str) -> Result<ExperimentFn, XpdError> {
        self.functions
            .get(&(script.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                let known = self
                    .names()
                    .into_iter()
                    .map(|(script, name)| format!("{script}/{name}"))
                    .collect::<Vec<_>>();
                let hint = if known.is_empty() {
                    "no experiment functions are registered".to_string()
                } else {
                    format!("registered: {}", known.join(", "))
                };
                XpdError::Config(
                    ErrorInfo::new("function_not_found", "experiment function is not registered")
                        .with_context("script", script)
                        .with_context("function", name)
                        .with_hint(hint),
                )
            })
    }

    /// Registered `(script, name)` pairs in sorted order.
    pub fn names(&self) -> Vec<(String, String)> {
        self.functions.keys().cloned().collect()
    }
}
