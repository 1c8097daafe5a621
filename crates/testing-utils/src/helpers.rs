//! 测试辅助工具

use std::time::Duration;

use chrono::{DateTime, Utc};
use orchestrator_domain::{NodeIdentity, ProcessId, RemoteLocation};
use tokio::time::sleep;

pub struct TestEnv;

impl TestEnv {
    /// 在超时前轮询条件，条件成立返回 true
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        false
    }

    pub fn timestamp_with_offset(offset_seconds: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(offset_seconds)
    }

    /// 测试日志，每个测试二进制调用一次即可
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    }
}

/// 第 n 号测试节点
pub fn test_node(n: u64) -> NodeIdentity {
    NodeIdentity::new(format!("node{n}"), format!("10.0.0.{n}"))
}

/// 测试进程在节点上的位置，与构建器生成的 pid 一致
pub fn test_location(id: &ProcessId) -> RemoteLocation {
    RemoteLocation::new(test_node(id.friendly).ip, format!("{}", 1000 + id.friendly))
}

/// 连续编号的进程标识
pub fn process_ids(start: u64, count: u64) -> Vec<ProcessId> {
    (start..start + count).map(ProcessId::new).collect()
}
