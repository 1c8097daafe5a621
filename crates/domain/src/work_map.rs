//! 权威的工作记录表
//!
//! 记录和作业的最新驱动报告共用一把互斥锁，任何读改写都必须在同一次加锁内完成。

use std::collections::BTreeMap;

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use tokio::sync::{Mutex, MutexGuard};

use crate::entities::WorkRecord;
use crate::reports::DriverStatusReport;
use crate::value_objects::WorkId;

#[derive(Debug, Default)]
pub struct WorkMapState {
    records: BTreeMap<WorkId, WorkRecord>,
    driver_reports: BTreeMap<WorkId, DriverStatusReport>,
}

impl WorkMapState {
    pub fn get(&self, id: &WorkId) -> Option<&WorkRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &WorkId) -> Option<&mut WorkRecord> {
        self.records.get_mut(id)
    }

    pub fn contains(&self, id: &WorkId) -> bool {
        self.records.contains_key(id)
    }

    /// 插入新记录，标识已存在时拒绝
    pub fn insert(&mut self, record: WorkRecord) -> OrchestratorResult<()> {
        let id = record.id();
        if self.records.contains_key(&id) {
            return Err(OrchestratorError::duplicate_work(id));
        }
        self.records.insert(id, record);
        Ok(())
    }

    /// 删除记录及其驱动报告
    pub fn remove(&mut self, id: &WorkId) -> Option<WorkRecord> {
        self.driver_reports.remove(id);
        self.records.remove(id)
    }

    pub fn ids(&self) -> Vec<WorkId> {
        self.records.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &WorkRecord> {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut WorkRecord> {
        self.records.values_mut()
    }

    pub fn latest_driver_report(&self, id: &WorkId) -> Option<&DriverStatusReport> {
        self.driver_reports.get(id)
    }

    pub fn remember_driver_report(&mut self, report: DriverStatusReport) {
        self.driver_reports.insert(report.work_id, report);
    }

    /// 同时借出可变记录和该作业的最新驱动报告
    pub fn record_with_report_mut(
        &mut self,
        id: &WorkId,
    ) -> Option<(&mut WorkRecord, Option<&DriverStatusReport>)> {
        let report = self.driver_reports.get(id);
        self.records.get_mut(id).map(|record| (record, report))
    }
}

/// 工作记录表
#[derive(Debug, Default)]
pub struct WorkMap {
    state: Mutex<WorkMapState>,
}

impl WorkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, WorkMapState> {
        self.state.lock().await
    }

    /// 提交新的工作单元
    pub async fn submit(&self, record: WorkRecord) -> OrchestratorResult<()> {
        self.state.lock().await.insert(record)
    }

    pub async fn get(&self, id: &WorkId) -> Option<WorkRecord> {
        self.state.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.is_empty()
    }

    /// 全部记录的副本，用于检查点
    pub async fn snapshot(&self) -> Vec<WorkRecord> {
        self.state.lock().await.records().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ManagedWork, SchedulingInfo, StandardInfo};
    use crate::reports::DriverState;

    fn job(id: u64) -> WorkRecord {
        WorkRecord::Job(ManagedWork::new(
            WorkId(id),
            StandardInfo::new("alice", "/tmp/logs"),
            SchedulingInfo::default(),
        ))
    }

    #[tokio::test]
    async fn test_submit_refuses_duplicates() {
        let map = WorkMap::new();
        map.submit(job(1)).await.unwrap();
        let err = map.submit(job(1)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateWork { .. }));
        assert_eq!(map.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_drops_driver_report() {
        let map = WorkMap::new();
        map.submit(job(1)).await.unwrap();
        {
            let mut state = map.lock().await;
            state.remember_driver_report(DriverStatusReport::new(WorkId(1), DriverState::Running));
            let (record, report) = state.record_with_report_mut(&WorkId(1)).unwrap();
            assert_eq!(record.id(), WorkId(1));
            assert!(report.is_some());
            assert!(state.remove(&WorkId(1)).is_some());
            assert!(state.latest_driver_report(&WorkId(1)).is_none());
        }
        assert!(map.is_empty().await);
    }
}
