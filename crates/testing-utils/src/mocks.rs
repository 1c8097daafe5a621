//! 协作者的内存实现
//!
//! 所有 mock 都可以克隆，克隆体共享内部状态，测试可以在交给引擎之后继续检查调用记录。

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    CheckpointTrigger, HistoryStore, ManagedWork, ProcessId, ProcessIndex, ReservationWork,
    UserLogEntry, UserLogSink, WorkId, WorkKind,
};

/// 记录保存次数的检查点
#[derive(Debug, Clone, Default)]
pub struct MockCheckpoint {
    saves: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl MockCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointTrigger for MockCheckpoint {
    async fn save_state(&self) -> OrchestratorResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OrchestratorError::persistence("mock checkpoint failure"));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 内存历史归档，可以按工作单元注入失败
#[derive(Debug, Clone, Default)]
pub struct MockHistoryStore {
    saved: Arc<Mutex<Vec<(WorkKind, WorkId)>>>,
    failing: Arc<Mutex<Vec<WorkId>>>,
}

impl MockHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 对指定工作单元的归档返回错误
    pub fn fail_for(&self, id: WorkId) {
        self.failing.lock().unwrap().push(id);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn saved(&self) -> Vec<(WorkKind, WorkId)> {
        self.saved.lock().unwrap().clone()
    }

    pub fn saved_ids(&self) -> Vec<WorkId> {
        self.saved().into_iter().map(|(_, id)| id).collect()
    }

    fn store(&self, kind: WorkKind, id: WorkId) -> OrchestratorResult<()> {
        if self.failing.lock().unwrap().contains(&id) {
            return Err(OrchestratorError::persistence(format!(
                "mock history failure for {id}"
            )));
        }
        self.saved.lock().unwrap().push((kind, id));
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MockHistoryStore {
    async fn job_save(&self, job: &ManagedWork) -> OrchestratorResult<()> {
        self.store(WorkKind::Job, job.id)
    }

    async fn service_save(&self, service: &ManagedWork) -> OrchestratorResult<()> {
        self.store(WorkKind::Service, service.id)
    }

    async fn reservation_save(&self, reservation: &ReservationWork) -> OrchestratorResult<()> {
        self.store(WorkKind::Reservation, reservation.id)
    }
}

/// 收集用户日志条目
#[derive(Debug, Clone, Default)]
pub struct MockUserLogSink {
    entries: Arc<Mutex<Vec<UserLogEntry>>>,
}

impl MockUserLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<UserLogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl UserLogSink for MockUserLogSink {
    async fn record(&self, user: &str, log_dir: &Path, text: &str) -> OrchestratorResult<()> {
        self.entries
            .lock()
            .unwrap()
            .push(UserLogEntry::new(user, log_dir, text));
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockProcessIndex {
    entries: Arc<Mutex<HashMap<ProcessId, WorkId>>>,
}

impl MockProcessIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, process_id: &ProcessId) -> bool {
        self.entries.lock().unwrap().contains_key(process_id)
    }
}

impl ProcessIndex for MockProcessIndex {
    fn add_process(&self, process_id: ProcessId, work_id: WorkId) {
        self.entries.lock().unwrap().insert(process_id, work_id);
    }

    fn remove_process(&self, process_id: &ProcessId) -> Option<WorkId> {
        self.entries.lock().unwrap().remove(process_id)
    }

    fn work_id_of(&self, process_id: &ProcessId) -> Option<WorkId> {
        self.entries.lock().unwrap().get(process_id).copied()
    }

    fn process_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_history_store_failure_injection() {
        let store = MockHistoryStore::new();
        let reservation = ReservationWork::new(
            WorkId(5),
            orchestrator_domain::StandardInfo::new("u", "/tmp"),
            orchestrator_domain::SchedulingInfo::default(),
        );
        store.fail_for(WorkId(5));
        assert!(store.reservation_save(&reservation).await.is_err());
        store.clear_failures();
        assert!(store.reservation_save(&reservation).await.is_ok());
        assert_eq!(store.saved(), vec![(WorkKind::Reservation, WorkId(5))]);
    }

    #[tokio::test]
    async fn test_mock_checkpoint_counts_saves() {
        let checkpoint = MockCheckpoint::new();
        checkpoint.save_state().await.unwrap();
        checkpoint.set_fail(true);
        assert!(checkpoint.save_state().await.is_err());
        assert_eq!(checkpoint.save_count(), 1);
    }
}
