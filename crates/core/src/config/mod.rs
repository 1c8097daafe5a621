//! 编排器配置
//!
//! 配置来源按优先级从低到高：内置默认值、TOML 配置文件、`ORCHESTRATOR__` 前缀的环境变量。
//! 例如 `ORCHESTRATOR__PRUNING__INTERVAL_SECONDS=30` 覆盖 `pruning.interval_seconds`。

mod sections;

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::logging::LogFormat;

pub use sections::{CheckpointConfig, EngineConfig, HistoryConfig, LoggingConfig, PruningConfig};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/orchestrator.toml", "orchestrator.toml"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub pruning: PruningConfig,
    pub checkpoint: CheckpointConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 加载配置；指定的文件不存在时报错，未指定时依次尝试默认路径
    pub fn load(config_path: Option<&str>) -> OrchestratorResult<Self> {
        let defaults = AppConfig::default();
        let mut builder = ConfigBuilder::builder()
            .set_default(
                "engine.job_driver_scheduling_class",
                defaults.engine.job_driver_scheduling_class,
            )?
            .set_default("pruning.enabled", defaults.pruning.enabled)?
            .set_default("pruning.interval_seconds", defaults.pruning.interval_seconds)?
            .set_default(
                "pruning.minimum_age_seconds",
                defaults.pruning.minimum_age_seconds,
            )?
            .set_default("checkpoint.enabled", defaults.checkpoint.enabled)?
            .set_default("checkpoint.path", defaults.checkpoint.path)?
            .set_default("history.directory", defaults.history.directory)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format)?;

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(OrchestratorError::config_error(format!(
                        "配置文件不存在: {path}"
                    )));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                if let Some(path) = DEFAULT_CONFIG_PATHS
                    .iter()
                    .find(|path| Path::new(path).exists())
                {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ORCHESTRATOR")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 字符串解析，缺省字段使用默认值
    pub fn from_toml_str(content: &str) -> OrchestratorResult<Self> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| OrchestratorError::config_error(format!("TOML 解析失败: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.engine.job_driver_scheduling_class.trim().is_empty() {
            return Err(OrchestratorError::config_error(
                "engine.job_driver_scheduling_class 不能为空",
            ));
        }
        if self.pruning.enabled && self.pruning.interval_seconds == 0 {
            return Err(OrchestratorError::config_error(
                "pruning.interval_seconds 必须大于0",
            ));
        }
        if self.checkpoint.enabled && self.checkpoint.path.trim().is_empty() {
            return Err(OrchestratorError::config_error("checkpoint.path 不能为空"));
        }
        if self.history.directory.trim().is_empty() {
            return Err(OrchestratorError::config_error("history.directory 不能为空"));
        }
        self.logging.level.parse::<crate::logging::LogLevel>()?;
        self.logging.format.parse::<LogFormat>()?;
        Ok(())
    }
}
