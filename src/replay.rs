//! 报告回放
//!
//! 输入为 JSON Lines，每行一个事件，按顺序施加到协调引擎上。空行和以 `#` 开头的行被忽略。
//!
//! ```text
//! {"submit":{"kind":"Job","record":{...}}}
//! {"driver":{...}}
//! {"resources":{"1":{...}}}
//! "prune"
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use orchestrator_domain::{
    DriverStatusReport, InventoryReport, ResourceStateReport, ServiceDependencyReport, WorkRecord,
};
use orchestrator_reconciler::{Pruner, ReconciliationEngine};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayEvent {
    Submit(WorkRecord),
    Driver(DriverStatusReport),
    Resources(ResourceStateReport),
    Services(ServiceDependencyReport),
    Inventory(InventoryReport),
    Prune,
}

impl ReplayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ReplayEvent::Submit(_) => "submit",
            ReplayEvent::Driver(_) => "driver",
            ReplayEvent::Resources(_) => "resources",
            ReplayEvent::Services(_) => "services",
            ReplayEvent::Inventory(_) => "inventory",
            ReplayEvent::Prune => "prune",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: usize,
    pub rejected: usize,
    pub pruned: usize,
}

/// 把事件施加到引擎上
///
/// 重复提交等单条失败只记录日志，不中断回放。
pub async fn apply_event(
    engine: &ReconciliationEngine,
    pruner: &Pruner,
    event: ReplayEvent,
    stats: &mut ReplayStats,
) {
    match event {
        ReplayEvent::Submit(record) => {
            let work_id = record.id();
            if let Err(e) = engine.submit(record).await {
                warn!(work_id = %work_id, "提交工作单元失败: {}", e);
                stats.rejected += 1;
                return;
            }
        }
        ReplayEvent::Driver(report) => engine.reconcile_driver_status(&report).await,
        ReplayEvent::Resources(report) => engine.reconcile_resources(&report).await,
        ReplayEvent::Services(report) => engine.reconcile_service_dependencies(&report).await,
        ReplayEvent::Inventory(report) => engine.reconcile_inventory(&report).await,
        ReplayEvent::Prune => stats.pruned += pruner.prune().await.pruned,
    }
    stats.applied += 1;
}

/// 逐行读取并回放事件文件
pub async fn replay_file(
    engine: &ReconciliationEngine,
    pruner: &Pruner,
    path: &Path,
) -> Result<ReplayStats> {
    let file = File::open(path)
        .await
        .with_context(|| format!("打开回放文件失败: {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut stats = ReplayStats::default();
    let mut line_number = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("读取回放文件失败: {}", path.display()))?
    {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event: ReplayEvent = serde_json::from_str(line)
            .with_context(|| format!("{}:{} 不是有效的回放事件", path.display(), line_number))?;
        debug!(line = line_number, event = event.name(), "回放事件");
        apply_event(engine, pruner, event, &mut stats).await;
    }

    info!(
        path = %path.display(),
        applied = stats.applied,
        rejected = stats.rejected,
        pruned = stats.pruned,
        "回放完成"
    );
    Ok(stats)
}
