pub mod log_level;

use std::str::FromStr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::{OrchestratorError, OrchestratorResult};

pub use log_level::LogLevel;

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = OrchestratorError;

    fn from_str(format: &str) -> Result<Self, Self::Err> {
        match format.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(OrchestratorError::Configuration(format!(
                "不支持的日志格式: {format}"
            ))),
        }
    }
}

/// 初始化日志系统
///
/// `RUST_LOG` 存在时优先使用，否则使用传入的级别。
pub fn init_logging(level: LogLevel, format: LogFormat) -> OrchestratorResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| OrchestratorError::Internal(format!("初始化JSON日志格式失败: {e}"))),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| OrchestratorError::Internal(format!("初始化Pretty日志格式失败: {e}"))),
    }
}
