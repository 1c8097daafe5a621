//! 协调引擎的外部协作者抽象
//!
//! 做 I/O 的协作者使用 `async_trait`，由构造函数以 `Arc<dyn ...>` 注入。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use orchestrator_core::OrchestratorResult;

use crate::entities::{ManagedWork, ReservationWork, WorkRecord};
use crate::value_objects::{ProcessId, WorkId};

/// 检查点触发器：一次协调产生持久变更后调用
#[async_trait]
pub trait CheckpointTrigger: Send + Sync {
    async fn save_state(&self) -> OrchestratorResult<()>;
}

/// 历史归档
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn job_save(&self, job: &ManagedWork) -> OrchestratorResult<()>;
    async fn service_save(&self, service: &ManagedWork) -> OrchestratorResult<()>;
    async fn reservation_save(&self, reservation: &ReservationWork) -> OrchestratorResult<()>;

    /// 按记录类型分派
    async fn save(&self, record: &WorkRecord) -> OrchestratorResult<()> {
        match record {
            WorkRecord::Job(job) => self.job_save(job).await,
            WorkRecord::Service(service) => self.service_save(service).await,
            WorkRecord::Reservation(reservation) => self.reservation_save(reservation).await,
        }
    }
}

/// 进程到工作单元的索引
pub trait ProcessIndex: Send + Sync {
    fn add_process(&self, process_id: ProcessId, work_id: WorkId);
    fn remove_process(&self, process_id: &ProcessId) -> Option<WorkId>;
    fn work_id_of(&self, process_id: &ProcessId) -> Option<WorkId>;
    fn process_count(&self) -> usize;
}

/// 面向用户的日志
#[async_trait]
pub trait UserLogSink: Send + Sync {
    async fn record(&self, user: &str, log_dir: &Path, text: &str) -> OrchestratorResult<()>;
}

/// 协调过程中收集、释放锁后再写出的用户日志
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLogEntry {
    pub user: String,
    pub log_dir: PathBuf,
    pub text: String,
}

impl UserLogEntry {
    pub fn new(user: impl Into<String>, log_dir: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            log_dir: log_dir.into(),
            text: text.into(),
        }
    }
}
