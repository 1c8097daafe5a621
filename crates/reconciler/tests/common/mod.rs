#![allow(dead_code)]

use std::sync::Arc;

use orchestrator_core::config::{EngineConfig, PruningConfig};
use orchestrator_domain::{ManagedWork, WorkId, WorkMap, WorkRecord};
use orchestrator_reconciler::{Pruner, ReconciliationEngine};
use orchestrator_testing_utils::{
    MockCheckpoint, MockHistoryStore, MockProcessIndex, MockUserLogSink, TestEnv,
};

pub struct Harness {
    pub engine: Arc<ReconciliationEngine>,
    pub checkpoint: MockCheckpoint,
    pub history: MockHistoryStore,
    pub index: MockProcessIndex,
    pub user_log: MockUserLogSink,
}

impl Harness {
    pub fn new() -> Self {
        TestEnv::init_logging();
        let checkpoint = MockCheckpoint::new();
        let history = MockHistoryStore::new();
        let index = MockProcessIndex::new();
        let user_log = MockUserLogSink::new();
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::new(WorkMap::new()),
            Arc::new(index.clone()),
            Arc::new(checkpoint.clone()),
            Arc::new(user_log.clone()),
            EngineConfig::default(),
        ));
        Self {
            engine,
            checkpoint,
            history,
            index,
            user_log,
        }
    }

    pub async fn with_records(records: Vec<WorkRecord>) -> Self {
        let harness = Self::new();
        for record in records {
            harness.engine.submit(record).await.unwrap();
        }
        harness
    }

    pub fn pruner(&self, minimum_age_seconds: u64) -> Pruner {
        Pruner::new(
            self.engine.clone(),
            Arc::new(self.history.clone()),
            PruningConfig {
                enabled: true,
                interval_seconds: 1,
                minimum_age_seconds,
            },
        )
    }

    pub async fn record(&self, id: u64) -> WorkRecord {
        self.engine.get(&WorkId(id)).await.unwrap()
    }

    pub async fn managed(&self, id: u64) -> ManagedWork {
        self.record(id).await.managed().cloned().unwrap()
    }
}
