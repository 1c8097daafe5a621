//! 已完成工作单元的归档与清理
//!
//! 一次清理分三步：持锁挑选候选并补齐完成/关闭时间；释放锁后逐个归档；
//! 再次持锁，只删除归档成功且仍满足条件的记录。归档失败的记录保留到下一轮。

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use orchestrator_core::config::PruningConfig;
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{HistoryStore, JobState, ReservationState, WorkId, WorkRecord};

use crate::completion::advance_to_completed;
use crate::engine::{Pass, PassSource, ReconciliationEngine};

/// 清理统计信息
#[derive(Debug, Default)]
pub struct PruneStats {
    /// 满足条件的候选数
    pub candidates: usize,
    /// 已删除的记录数
    pub pruned: usize,
    /// 归档失败的记录数
    pub archive_failures: usize,
    /// 本轮对工作表的修改数（时间戳补齐、状态推进、记录与进程索引删除）
    pub changes: usize,
    /// 清理耗时
    pub duration: std::time::Duration,
}

impl PruneStats {
    pub fn has_pruned(&self) -> bool {
        self.pruned > 0
    }
}

/// 已完成、进程已全部结束且超过最短保留时间
fn is_prunable(record: &WorkRecord, now: DateTime<Utc>, minimum_age: Duration) -> bool {
    if !record.is_completed() {
        return false;
    }
    let aged = |date: Option<DateTime<Utc>>| date.is_some_and(|date| now - date >= minimum_age);
    let info = record.standard_info();
    if !aged(info.date_of_completion) {
        return false;
    }
    match record.managed() {
        Some(work) => work.live_process_count() == 0 && aged(info.date_of_shutdown_processes),
        None => true,
    }
}

#[derive(Clone)]
pub struct Pruner {
    engine: Arc<ReconciliationEngine>,
    history: Arc<dyn HistoryStore>,
    config: PruningConfig,
}

impl Pruner {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        history: Arc<dyn HistoryStore>,
        config: PruningConfig,
    ) -> Self {
        Self {
            engine,
            history,
            config,
        }
    }

    pub async fn prune(&self) -> PruneStats {
        let start_time = Instant::now();
        let mut stats = PruneStats::default();
        let mut pass = Pass::new(PassSource::Pruning);
        let minimum_age = Duration::seconds(i64::try_from(self.config.minimum_age_seconds).unwrap_or(i64::MAX));

        let candidates = self.select_candidates(&mut pass, minimum_age).await;
        stats.candidates = candidates.len();

        let mut archived: Vec<WorkId> = Vec::with_capacity(candidates.len());
        for record in &candidates {
            match self.history.save(record).await {
                Ok(()) => {
                    debug!(work_id = %record.id(), kind = %record.kind(), "工作单元已归档");
                    archived.push(record.id());
                }
                Err(e) => {
                    stats.archive_failures += 1;
                    error!(work_id = %record.id(), kind = %record.kind(), "归档失败, 保留记录: {}", e);
                }
            }
        }

        if !archived.is_empty() {
            let mut state = self.engine.work_map.lock().await;
            for id in archived {
                let still_prunable = state
                    .get(&id)
                    .is_some_and(|record| is_prunable(record, pass.now, minimum_age));
                if !still_prunable {
                    warn!(work_id = %id, "归档期间记录发生变化, 暂不删除");
                    continue;
                }
                let Some(record) = state.remove(&id) else {
                    continue;
                };
                let process_ids = record.process_ids();
                for process_id in &process_ids {
                    self.engine.process_index.remove_process(process_id);
                }
                pass.changes += 1 + process_ids.len();
                stats.pruned += 1;
                info!(work_id = %id, kind = %record.kind(), processes = process_ids.len(), "工作单元已清理");
            }
        }

        if stats.pruned > 0 {
            counter!("orchestrator_pruned_records_total").increment(stats.pruned as u64);
        }
        if stats.archive_failures > 0 {
            counter!("orchestrator_archive_failures_total").increment(stats.archive_failures as u64);
        }
        stats.changes = pass.changes;
        self.engine.finish_pass(pass).await;

        stats.duration = start_time.elapsed();
        debug!(
            "清理完成: 候选 {}, 删除 {}, 归档失败 {}, 修改 {}, 耗时 {:?}",
            stats.candidates, stats.pruned, stats.archive_failures, stats.changes, stats.duration
        );
        stats
    }

    /// 持锁推进已排空的 Completing 记录、补齐缺失的时间戳并挑选候选
    async fn select_candidates(&self, pass: &mut Pass, minimum_age: Duration) -> Vec<WorkRecord> {
        let mut state = self.engine.work_map.lock().await;
        let mut candidates = Vec::new();
        for record in state.records_mut() {
            let kind = record.kind();
            match record {
                WorkRecord::Job(work) | WorkRecord::Service(work) => {
                    advance_to_completed(work, kind, pass);
                    if work.state == JobState::Completed {
                        pass.changed_if(work.standard_info.stamp_completion(pass.now));
                        pass.changed_if(work.stamp_shutdown_if_drained(pass.now));
                    }
                }
                WorkRecord::Reservation(reservation) => {
                    if reservation.state == ReservationState::Completed {
                        pass.changed_if(reservation.standard_info.stamp_completion(pass.now));
                    }
                }
            }
            if is_prunable(record, pass.now, minimum_age) {
                candidates.push(record.clone());
            }
        }
        candidates
    }
}

/// 周期清理服务
pub struct PruningSweep {
    pruner: Pruner,
    config: PruningConfig,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    sweep_handle: Option<tokio::task::JoinHandle<()>>,
}

impl PruningSweep {
    pub fn new(pruner: Pruner, config: PruningConfig) -> Self {
        Self {
            pruner,
            config,
            shutdown_tx: None,
            sweep_handle: None,
        }
    }

    /// 启动周期清理
    pub async fn start(&mut self) -> OrchestratorResult<()> {
        if !self.config.enabled {
            info!("周期清理已禁用");
            return Ok(());
        }

        info!(
            interval_seconds = self.config.interval_seconds,
            minimum_age_seconds = self.config.minimum_age_seconds,
            "启动周期清理"
        );

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let pruner = self.pruner.clone();
        let period = std::time::Duration::from_secs(self.config.interval_seconds.max(1));

        let handle = tokio::spawn(async move {
            let mut sweep_interval = interval(period);

            loop {
                tokio::select! {
                    _ = sweep_interval.tick() => {
                        let stats = pruner.prune().await;
                        if stats.has_pruned() {
                            info!(pruned = stats.pruned, changes = stats.changes, "周期清理完成");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("收到周期清理停止请求");
                        break;
                    }
                }
            }

            info!("周期清理已停止");
        });

        self.sweep_handle = Some(handle);
        Ok(())
    }

    /// 停止周期清理并等待后台任务退出
    pub async fn stop(&mut self) -> OrchestratorResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.sweep_handle.take() {
            if let Err(e) = handle.await {
                warn!("等待周期清理任务退出时出错: {}", e);
            }
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.sweep_handle.is_some()
    }

    /// 立即执行一次清理
    pub async fn prune_once(&self) -> PruneStats {
        self.pruner.prune().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_domain::{ReservationWork, SchedulingInfo, StandardInfo};

    fn completed_reservation(completed_at: Option<DateTime<Utc>>) -> WorkRecord {
        let mut reservation = ReservationWork::new(
            WorkId(9),
            StandardInfo::new("bob", "/tmp/logs"),
            SchedulingInfo::default(),
        );
        reservation.state = ReservationState::Completed;
        reservation.standard_info.date_of_completion = completed_at;
        WorkRecord::Reservation(reservation)
    }

    #[test]
    fn test_prunable_requires_minimum_age() {
        let now = Utc::now();
        let record = completed_reservation(Some(now - Duration::seconds(30)));
        assert!(!is_prunable(&record, now, Duration::seconds(60)));
        assert!(is_prunable(&record, now, Duration::seconds(10)));
    }

    #[test]
    fn test_prunable_requires_completion_date() {
        let record = completed_reservation(None);
        assert!(!is_prunable(&record, Utc::now(), Duration::zero()));
    }

    #[test]
    fn test_prune_stats_default() {
        let stats = PruneStats::default();
        assert_eq!(stats.pruned, 0);
        assert_eq!(stats.changes, 0);
        assert!(!stats.has_pruned());
    }
}
