use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{CheckpointTrigger, ProcessIndex, WorkMap, WorkRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::write_atomically;

const SNAPSHOT_VERSION: u32 = 1;

/// 检查点文件内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub records: Vec<WorkRecord>,
}

/// 以 JSON 文件保存工作映射的检查点
pub struct JsonFileCheckpoint {
    path: PathBuf,
    work_map: Arc<WorkMap>,
    write_lock: Mutex<()>,
}

impl JsonFileCheckpoint {
    pub fn new(path: impl Into<PathBuf>, work_map: Arc<WorkMap>) -> Self {
        Self {
            path: path.into(),
            work_map,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取检查点，重建工作映射和进程索引
    ///
    /// 文件不存在视为全新启动，返回 0。
    pub async fn restore(&self, index: &dyn ProcessIndex) -> OrchestratorResult<usize> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "检查点文件不存在，以空状态启动");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: CheckpointSnapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(OrchestratorError::persistence(format!(
                "不支持的检查点版本 {} (期望 {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        let mut restored = 0;
        for record in snapshot.records {
            let work_id = record.id();
            let process_ids = record.process_ids();
            match self.work_map.submit(record).await {
                Ok(()) => {
                    for process_id in process_ids {
                        index.add_process(process_id, work_id);
                    }
                    restored += 1;
                }
                Err(e) => warn!(work_id = %work_id, error = %e, "跳过无法恢复的检查点记录"),
            }
        }

        info!(
            path = %self.path.display(),
            restored,
            saved_at = %snapshot.saved_at,
            "检查点恢复完成"
        );
        Ok(restored)
    }

    async fn write_snapshot(&self) -> OrchestratorResult<()> {
        let _guard = self.write_lock.lock().await;

        let snapshot = CheckpointSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            records: self.work_map.snapshot().await,
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        write_atomically(&self.path, &bytes).await?;

        counter!("orchestrator_checkpoint_saves_total").increment(1);
        debug!(
            path = %self.path.display(),
            records = snapshot.records.len(),
            "检查点已写入"
        );
        Ok(())
    }
}

#[async_trait]
impl CheckpointTrigger for JsonFileCheckpoint {
    async fn save_state(&self) -> OrchestratorResult<()> {
        self.write_snapshot().await.map_err(|e| {
            counter!("orchestrator_checkpoint_failures_total").increment(1);
            OrchestratorError::persistence(format!(
                "写入检查点 {} 失败: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// 关闭检查点时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCheckpoint;

#[async_trait]
impl CheckpointTrigger for DisabledCheckpoint {
    async fn save_state(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}
