//! 协调引擎协作者的文件实现
//!
//! 检查点、历史归档和用户日志都落在本地文件系统上；进程索引常驻内存，
//! 启动时由检查点恢复重建。

pub mod checkpoint;
pub mod history;
pub mod process_index;
pub mod user_log;

pub use checkpoint::{CheckpointSnapshot, DisabledCheckpoint, JsonFileCheckpoint};
pub use history::FileHistoryStore;
pub use process_index::InMemoryProcessIndex;
pub use user_log::FileUserLogSink;

use std::path::Path;

use orchestrator_core::OrchestratorResult;

/// 先写临时文件再重命名，读者不会看到写了一半的内容
pub(crate) async fn write_atomically(path: &Path, contents: &[u8]) -> OrchestratorResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, contents).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}
