use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 工作单元标识（作业、服务或预留），全局唯一且全序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkId(pub u64);

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for WorkId {
    fn from(value: u64) -> Self {
        WorkId(value)
    }
}

/// 进程标识
///
/// `friendly` 是所属工作单元内的序号，主驱动进程的序号为 0；`unique` 保证全局唯一。
/// 序列化为 `"<friendly>:<unique>"`，因此可以直接作为 JSON 映射的键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ProcessId {
    pub friendly: u64,
    pub unique: Uuid,
}

impl ProcessId {
    pub fn new(friendly: u64) -> Self {
        Self {
            friendly,
            unique: Uuid::new_v4(),
        }
    }

    pub fn is_primary_driver(&self) -> bool {
        self.friendly == 0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.friendly)
    }
}

impl From<ProcessId> for String {
    fn from(id: ProcessId) -> Self {
        format!("{}:{}", id.friendly, id.unique)
    }
}

impl TryFrom<String> for ProcessId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (friendly, unique) = value
            .split_once(':')
            .ok_or_else(|| format!("无效的进程标识: {value}"))?;
        let friendly = friendly
            .parse::<u64>()
            .map_err(|e| format!("无效的进程序号 {friendly}: {e}"))?;
        let unique = Uuid::parse_str(unique).map_err(|e| format!("无效的进程UUID {unique}: {e}"))?;
        Ok(Self { friendly, unique })
    }
}

/// 节点身份
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub name: String,
    pub ip: String,
}

impl NodeIdentity {
    pub fn new(name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
        }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.ip)
    }
}

/// 进程在集群中的位置：节点 IP + PID
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemoteLocation {
    pub ip: String,
    pub pid: String,
}

impl RemoteLocation {
    pub fn new(ip: impl Into<String>, pid: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            pid: pid.into(),
        }
    }
}
