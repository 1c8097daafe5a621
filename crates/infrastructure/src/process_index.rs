use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use orchestrator_domain::{ProcessId, ProcessIndex, WorkId};

/// 进程到工作单元的内存索引
#[derive(Debug, Default)]
pub struct InMemoryProcessIndex {
    entries: RwLock<HashMap<ProcessId, WorkId>>,
}

impl InMemoryProcessIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessIndex for InMemoryProcessIndex {
    fn add_process(&self, process_id: ProcessId, work_id: WorkId) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(process_id, work_id);
    }

    fn remove_process(&self, process_id: &ProcessId) -> Option<WorkId> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(process_id)
    }

    fn work_id_of(&self, process_id: &ProcessId) -> Option<WorkId> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(process_id)
            .copied()
    }

    fn process_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
