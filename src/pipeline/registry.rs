use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::step::ExecutionType;
use crate::collaborators::StepExecutor;

/// Step executors hosted by this replica, keyed by execution type
///
/// Built once at startup; the set of types is fixed for the process lifetime.
#[derive(Clone, Default)]
pub struct StepExecutorRegistry {
    executors: BTreeMap<ExecutionType, Arc<dyn StepExecutor>>,
}

impl StepExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an executor; replaces one already registered for the same type
    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executors.insert(executor.execution_type(), executor);
        self
    }

    pub fn get(&self, execution_type: &ExecutionType) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(execution_type).cloned()
    }

    pub fn contains(&self, execution_type: &ExecutionType) -> bool {
        self.executors.contains_key(execution_type)
    }

    pub fn execution_types(&self) -> Vec<ExecutionType> {
        self.executors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl fmt::Debug for StepExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepExecutorRegistry")
            .field("execution_types", &self.execution_types())
            .finish()
    }
}
