//! # Orchestrator Testing Utils
//!
//! 协调引擎测试共用的工具：
//!
//! - **Mocks**: 检查点、历史归档、用户日志、进程索引的内存实现，可记录调用并注入失败
//! - **Builders**: 作业、服务、预留以及各类外部报告的构建器
//! - **Helpers**: 等待条件、测试节点等通用工具
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
