use std::path::{Path, PathBuf};

use async_trait::async_trait;
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{HistoryStore, ManagedWork, ReservationWork, WorkId, WorkKind};
use serde::Serialize;
use tracing::debug;

use crate::write_atomically;

/// 历史归档：每条记录一个 JSON 文件
///
/// 目录布局为 `<root>/{jobs,services,reservations}/<id>.json`。同一记录重复归档会覆盖旧文件。
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    root: PathBuf,
}

impl FileHistoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, kind: WorkKind, id: WorkId) -> PathBuf {
        let directory = match kind {
            WorkKind::Job => "jobs",
            WorkKind::Service => "services",
            WorkKind::Reservation => "reservations",
        };
        self.root.join(directory).join(format!("{id}.json"))
    }

    async fn archive<T: Serialize>(&self, kind: WorkKind, id: WorkId, record: &T) -> OrchestratorResult<()> {
        let path = self.record_path(kind, id);
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomically(&path, &bytes).await?;
        debug!(work_id = %id, kind = %kind, path = %path.display(), "记录已归档");
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn job_save(&self, job: &ManagedWork) -> OrchestratorResult<()> {
        self.archive(WorkKind::Job, job.id, job).await
    }

    async fn service_save(&self, service: &ManagedWork) -> OrchestratorResult<()> {
        self.archive(WorkKind::Service, service.id, service).await
    }

    async fn reservation_save(&self, reservation: &ReservationWork) -> OrchestratorResult<()> {
        self.archive(WorkKind::Reservation, reservation.id, reservation)
            .await
    }
}
