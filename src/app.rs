use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use orchestrator_core::AppConfig;
use orchestrator_domain::{CheckpointTrigger, WorkMap};
use orchestrator_infrastructure::{
    DisabledCheckpoint, FileHistoryStore, FileUserLogSink, InMemoryProcessIndex,
    JsonFileCheckpoint,
};
use orchestrator_reconciler::{Pruner, PruningSweep, ReconciliationEngine};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::replay::{replay_file, ReplayStats};

/// 主应用程序：装配协调引擎及其协作者
pub struct Application {
    config: AppConfig,
    engine: Arc<ReconciliationEngine>,
    process_index: Arc<InMemoryProcessIndex>,
    checkpoint: Option<Arc<JsonFileCheckpoint>>,
    pruner: Pruner,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        let work_map = Arc::new(WorkMap::new());
        let process_index = Arc::new(InMemoryProcessIndex::new());

        let checkpoint = config
            .checkpoint
            .enabled
            .then(|| Arc::new(JsonFileCheckpoint::new(&config.checkpoint.path, work_map.clone())));
        let trigger: Arc<dyn CheckpointTrigger> = match &checkpoint {
            Some(checkpoint) => checkpoint.clone(),
            None => Arc::new(DisabledCheckpoint),
        };

        let engine = Arc::new(ReconciliationEngine::new(
            work_map,
            process_index.clone(),
            trigger,
            Arc::new(FileUserLogSink::new()),
            config.engine.clone(),
        ));
        let pruner = Pruner::new(
            engine.clone(),
            Arc::new(FileHistoryStore::new(&config.history.directory)),
            config.pruning.clone(),
        );

        Self {
            config,
            engine,
            process_index,
            checkpoint,
            pruner,
        }
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// 从检查点恢复，返回恢复的记录数
    pub async fn restore(&self) -> Result<usize> {
        let Some(checkpoint) = &self.checkpoint else {
            info!("检查点已禁用，以空状态启动");
            return Ok(0);
        };

        checkpoint
            .restore(self.process_index.as_ref())
            .await
            .with_context(|| format!("恢复检查点失败: {}", checkpoint.path().display()))
    }

    /// 运行清理任务直到收到关闭信号，退出前写一次检查点
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut sweep = PruningSweep::new(self.pruner.clone(), self.config.pruning.clone());
        sweep.start().await.context("启动清理任务失败")?;
        let records = self.engine.work_map().len().await;
        info!(records, "编排器已启动，等待关闭信号");

        let _ = shutdown_rx.recv().await;
        info!("编排器收到关闭信号");

        sweep.stop().await.context("停止清理任务失败")?;
        self.save_checkpoint().await;
        Ok(())
    }

    /// 回放事件文件，结束后写一次检查点
    pub async fn replay(&self, path: &Path) -> Result<ReplayStats> {
        let stats = replay_file(&self.engine, &self.pruner, path).await?;
        self.save_checkpoint().await;
        Ok(stats)
    }

    async fn save_checkpoint(&self) {
        if let Some(checkpoint) = &self.checkpoint {
            if let Err(e) = checkpoint.save_state().await {
                error!("保存最终检查点失败: {}", e);
            }
        }
    }
}
