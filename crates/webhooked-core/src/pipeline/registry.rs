//! Step registry
//!
//! Maps step names to their [`StepKind`]. Lookups ignore ASCII case and hand
//! out a fresh [`Step`] every time.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::pipeline::step::{Step, StepKind};
use crate::pipeline::steps;

/// Registry of available step kinds
#[derive(Debug, Default, Clone)]
pub struct StepRegistry {
    kinds: HashMap<String, Arc<dyn StepKind>>,
}

impl StepRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in step
    pub fn with_builtins() -> Self {
        let kinds = steps::builtins()
            .into_iter()
            .map(|kind| (kind.name().to_ascii_lowercase(), kind))
            .collect();
        Self { kinds }
    }

    /// Add a step kind. A kind whose name is already taken is rejected.
    pub fn register(&mut self, kind: Arc<dyn StepKind>) -> Result<()> {
        let key = kind.name().to_ascii_lowercase();
        if self.kinds.contains_key(&key) {
            return Err(Error::DuplicateStep {
                name: kind.name().to_string(),
            });
        }

        debug!(step = kind.name(), "Registered step");
        self.kinds.insert(key, kind);
        Ok(())
    }

    /// New instance of the step named `name`
    pub fn get(&self, name: &str) -> Result<Step> {
        self.kinds
            .get(&name.to_ascii_lowercase())
            .map(|kind| Step::new(Arc::clone(kind)))
            .ok_or_else(|| Error::UnknownStep {
                name: name.to_string(),
            })
    }

    /// Whether a step is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kinds.values().map(|k| k.name()).collect();
        names.sort_unstable();
        names
    }
}
