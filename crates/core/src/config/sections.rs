use serde::{Deserialize, Serialize};

/// 协调引擎配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// 作业驱动预留所使用的调度类，该类预留被拒绝时不终止
    pub job_driver_scheduling_class: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            job_driver_scheduling_class: "JobDriver".to_string(),
        }
    }
}

/// 清理（剪枝）配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PruningConfig {
    /// 是否启用周期清理
    pub enabled: bool,
    /// 清理间隔（秒）
    pub interval_seconds: u64,
    /// 完成后至少保留的时间（秒）
    pub minimum_age_seconds: u64,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            minimum_age_seconds: 60, // 1分钟
        }
    }
}

/// 检查点配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    /// 检查点文件路径
    pub path: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "state/orchestrator.ckpt.json".to_string(),
        }
    }
}

/// 历史归档配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    /// 归档根目录
    pub directory: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            directory: "state/history".to_string(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// json 或 pretty
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
