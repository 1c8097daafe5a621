//! 协调引擎
//!
//! 每个入口对应一种外部报告。一次协调在工作记录表锁内完成全部读改写，
//! 锁释放后再写用户日志并触发检查点。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tracing::{error, info, warn};

use orchestrator_core::config::EngineConfig;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    CheckpointTrigger, Effect, JobEvent, JobMachine, JobState, ManagedWork, ProcessIndex,
    Transition, UserLogEntry, UserLogSink, WorkId, WorkKind, WorkMap, WorkRecord,
};

/// 报告来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassSource {
    Driver,
    ResourceManager,
    ServiceManager,
    NodeInventory,
    Pruning,
}

impl PassSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassSource::Driver => "driver",
            PassSource::ResourceManager => "resource_manager",
            PassSource::ServiceManager => "service_manager",
            PassSource::NodeInventory => "node_inventory",
            PassSource::Pruning => "pruning",
        }
    }
}

/// 单次协调的累积结果
#[derive(Debug)]
pub(crate) struct Pass {
    pub source: PassSource,
    pub now: DateTime<Utc>,
    pub changes: usize,
    pub entry_errors: usize,
    pub user_logs: Vec<UserLogEntry>,
}

impl Pass {
    pub fn new(source: PassSource) -> Self {
        Self {
            source,
            now: Utc::now(),
            changes: 0,
            entry_errors: 0,
            user_logs: Vec::new(),
        }
    }

    pub fn changed(&mut self) {
        self.changes += 1;
    }

    pub fn changed_if(&mut self, changed: bool) {
        if changed {
            self.changes += 1;
        }
    }

    pub fn user_log(&mut self, work: &ManagedWork, text: impl Into<String>) {
        self.user_logs.push(UserLogEntry::new(
            work.standard_info.user.clone(),
            work.standard_info.user_log_dir(work.id),
            text,
        ));
    }

    /// 单个条目失败只记录日志，批次继续
    pub fn entry_failed(&mut self, id: impl std::fmt::Display, err: &OrchestratorError) {
        match err {
            OrchestratorError::WorkNotFound { .. } => {
                warn!(work_id = %id, source = self.source.as_str(), "{}", err);
            }
            _ => {
                self.entry_errors += 1;
                error!(work_id = %id, source = self.source.as_str(), "协调条目失败: {}", err);
            }
        }
    }
}

/// 对作业/服务应用一次状态机事件
///
/// 状态改变和完成时间戳计入变更；其他副作用由调用方根据返回的转换执行。
pub(crate) fn apply_job_event(
    work: &mut ManagedWork,
    kind: WorkKind,
    event: JobEvent,
    pass: &mut Pass,
) -> Option<Transition<JobState>> {
    let machine = JobMachine::new(kind, work.has_service_dependencies());
    let transition = machine.transition(work.state, event)?;
    if transition.next != work.state {
        info!(
            work_id = %work.id,
            kind = %kind,
            "状态变更: {:?} -> {:?} ({:?})",
            work.state,
            transition.next,
            event
        );
        work.state = transition.next;
        pass.changed();
    }
    if transition.has_effect(Effect::StampCompletionDate) {
        pass.changed_if(work.standard_info.stamp_completion(pass.now));
    }
    Some(transition)
}

/// 协调引擎
pub struct ReconciliationEngine {
    pub(crate) work_map: Arc<WorkMap>,
    pub(crate) process_index: Arc<dyn ProcessIndex>,
    checkpoint: Arc<dyn CheckpointTrigger>,
    user_log: Arc<dyn UserLogSink>,
    pub(crate) config: EngineConfig,
    refusal_logged: AtomicBool,
}

impl ReconciliationEngine {
    pub fn new(
        work_map: Arc<WorkMap>,
        process_index: Arc<dyn ProcessIndex>,
        checkpoint: Arc<dyn CheckpointTrigger>,
        user_log: Arc<dyn UserLogSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            work_map,
            process_index,
            checkpoint,
            user_log,
            config,
            refusal_logged: AtomicBool::new(false),
        }
    }

    pub fn work_map(&self) -> &Arc<WorkMap> {
        &self.work_map
    }

    /// 接收新提交的工作单元，并登记其已有进程
    pub async fn submit(&self, record: WorkRecord) -> OrchestratorResult<()> {
        let id = record.id();
        let process_ids = record.process_ids();
        self.work_map.submit(record).await?;
        for process_id in process_ids {
            self.process_index.add_process(process_id, id);
        }
        info!(work_id = %id, "工作单元已接收");
        Ok(())
    }

    pub async fn get(&self, id: &WorkId) -> Option<WorkRecord> {
        self.work_map.get(id).await
    }

    /// 作业驱动预留的拒绝在进程生命周期内只记录一次，返回本次是否需要记录
    pub(crate) fn first_ignored_refusal(&self) -> bool {
        !self.refusal_logged.swap(true, Ordering::SeqCst)
    }

    pub fn ignored_refusal_logged(&self) -> bool {
        self.refusal_logged.load(Ordering::SeqCst)
    }

    /// 释放锁之后：记录指标、写出用户日志、按需触发检查点
    pub(crate) async fn finish_pass(&self, pass: Pass) {
        let source = pass.source.as_str();
        counter!("orchestrator_reconcile_passes_total", "source" => source).increment(1);
        counter!("orchestrator_reconcile_changes_total", "source" => source)
            .increment(pass.changes as u64);
        if pass.entry_errors > 0 {
            counter!("orchestrator_reconcile_entry_errors_total", "source" => source)
                .increment(pass.entry_errors as u64);
        }
        gauge!("orchestrator_work_map_records").set(self.work_map.len().await as f64);

        for entry in &pass.user_logs {
            if let Err(e) = self
                .user_log
                .record(&entry.user, &entry.log_dir, &entry.text)
                .await
            {
                warn!(user = %entry.user, log_dir = %entry.log_dir.display(), "写入用户日志失败: {}", e);
            }
        }

        if pass.changes > 0 {
            if let Err(e) = self.checkpoint.save_state().await {
                error!(source, changes = pass.changes, "保存检查点失败: {}", e);
            }
        }
    }
}
