use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::UserLogSink;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const DEFAULT_USER_LOG_FILE: &str = "orchestrator.log";

/// 把面向用户的消息追加到工作单元日志目录下的文件
#[derive(Debug, Clone)]
pub struct FileUserLogSink {
    file_name: String,
}

impl FileUserLogSink {
    pub fn new() -> Self {
        Self::with_file_name(DEFAULT_USER_LOG_FILE)
    }

    pub fn with_file_name(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    pub fn log_path(&self, log_dir: &Path) -> PathBuf {
        log_dir.join(&self.file_name)
    }
}

impl Default for FileUserLogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserLogSink for FileUserLogSink {
    async fn record(&self, user: &str, log_dir: &Path, text: &str) -> OrchestratorResult<()> {
        tokio::fs::create_dir_all(log_dir).await?;

        let path = self.log_path(log_dir);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let line = format!("{} {} {}\n", Utc::now().to_rfc3339(), user, text);
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(user, path = %path.display(), "用户日志已追加");
        Ok(())
    }
}
