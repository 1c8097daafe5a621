//! 四类外部子系统的状态报告
//!
//! 报告都是部分的、可能过期的快照，协调引擎负责合并。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entities::{CompletionType, Rationale, WorkItemTiming};
use crate::process::{DeallocationReason, ProcessState, ProcessType, ProcessWorkItems, ResourceState};
use crate::value_objects::{NodeIdentity, ProcessId, RemoteLocation, WorkId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DriverState {
    #[default]
    Undefined,
    NotRunning,
    Initializing,
    Running,
    Idle,
    Completing,
    Completed,
    Failed,
}

/// 单个进程的工作项投入（毫秒）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInvestment {
    pub location: RemoteLocation,
    pub millis: u64,
}

/// 作业驱动状态报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverStatusReport {
    pub work_id: WorkId,
    pub driver_state: DriverState,
    /// 驱动回调地址所在节点
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub management_url: Option<String>,
    #[serde(default)]
    pub deployment_descriptor: Option<String>,
    #[serde(default)]
    pub analysis_engine: Option<String>,
    #[serde(default)]
    pub work_items_total: u64,
    #[serde(default)]
    pub work_items_done: u64,
    #[serde(default)]
    pub work_items_error: u64,
    #[serde(default)]
    pub work_items_lost: u64,
    #[serde(default)]
    pub work_items_dispatched: u64,
    /// 等待分配进程的工作项数
    #[serde(default)]
    pub work_items_pending_assignment: u64,
    /// 驱动尚未开始分发
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub kill_job: bool,
    #[serde(default)]
    pub completion_type: CompletionType,
    #[serde(default)]
    pub completion_rationale: Rationale,
    #[serde(default)]
    pub investments: Vec<ProcessInvestment>,
    /// 正在处理工作项的进程
    #[serde(default)]
    pub operating: Vec<RemoteLocation>,
    #[serde(default)]
    pub process_work_items: BTreeMap<ProcessId, ProcessWorkItems>,
    #[serde(default)]
    pub totals: ProcessWorkItems,
    /// 需要以 Exception 原因释放的进程
    #[serde(default)]
    pub kill_list: Vec<ProcessId>,
    #[serde(default)]
    pub timing: WorkItemTiming,
}

impl DriverStatusReport {
    pub fn new(work_id: WorkId, driver_state: DriverState) -> Self {
        Self {
            work_id,
            driver_state,
            node: String::new(),
            port: 0,
            management_url: None,
            deployment_descriptor: None,
            analysis_engine: None,
            work_items_total: 0,
            work_items_done: 0,
            work_items_error: 0,
            work_items_lost: 0,
            work_items_dispatched: 0,
            work_items_pending_assignment: 0,
            pending: false,
            kill_job: false,
            completion_type: CompletionType::Undefined,
            completion_rationale: Rationale::unspecified(),
            investments: Vec::new(),
            operating: Vec::new(),
            process_work_items: BTreeMap::new(),
            totals: ProcessWorkItems::default(),
            kill_list: Vec::new(),
            timing: WorkItemTiming::default(),
        }
    }

    pub fn is_operating(&self, location: &RemoteLocation) -> bool {
        self.operating.contains(location)
    }

    pub fn investment_of(&self, location: &RemoteLocation) -> u64 {
        self.investments
            .iter()
            .find(|investment| &investment.location == location)
            .map(|investment| investment.millis)
            .unwrap_or(0)
    }

    /// 驱动已开始分发且没有等待分配进程的工作项时，才可以释放空闲进程
    pub fn is_deallocatable(&self) -> bool {
        !self.pending && self.work_items_pending_assignment == 0
    }

    /// 尚未处理的工作项：total - done - error - lost
    pub fn work_items_todo(&self) -> u64 {
        self.work_items_total
            .saturating_sub(self.work_items_done)
            .saturating_sub(self.work_items_error)
            .saturating_sub(self.work_items_lost)
    }
}

/// 资源管理器分配的一份资源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ProcessId,
    pub node: NodeIdentity,
    #[serde(default = "default_shares")]
    pub shares: u32,
    #[serde(default)]
    pub purged: bool,
}

fn default_shares() -> u32 {
    1
}

impl Resource {
    pub fn new(id: ProcessId, node: NodeIdentity) -> Self {
        Self {
            id,
            node,
            shares: 1,
            purged: false,
        }
    }
}

pub type ResourceMap = BTreeMap<ProcessId, Resource>;

/// 资源管理器对单个工作单元的视图
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RmJobState {
    pub resources: Option<ResourceMap>,
    pub pending_additions: Option<ResourceMap>,
    pub pending_removals: Option<ResourceMap>,
    pub refused: bool,
    pub reason: Option<String>,
}

impl RmJobState {
    pub fn reason_text(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceState {
    Waiting,
    Starting,
    Initializing,
    Available,
    NotAvailable,
    Stopped,
    Stopping,
    #[default]
    Undefined,
}

/// 服务管理器报告的依赖状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDependency {
    pub state: ServiceState,
    /// endpoint -> 诊断消息
    #[serde(default)]
    pub messages: Option<BTreeMap<String, String>>,
}

impl ServiceDependency {
    pub fn new(state: ServiceState) -> Self {
        Self {
            state,
            messages: None,
        }
    }

    /// 拼接为 `endpoint:msg;endpoint:msg;`，没有消息时返回 None
    pub fn joined_messages(&self) -> Option<String> {
        let messages = self.messages.as_ref().filter(|messages| !messages.is_empty())?;
        Some(
            messages
                .iter()
                .map(|(endpoint, message)| format!("{endpoint}:{message};"))
                .collect(),
        )
    }
}

/// 节点代理观察到的进程快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedProcess {
    pub id: ProcessId,
    pub node: NodeIdentity,
    #[serde(default)]
    pub pid: Option<String>,
    #[serde(default)]
    pub process_type: Option<ProcessType>,
    pub process_state: ProcessState,
    #[serde(default)]
    pub resource_state: Option<ResourceState>,
    #[serde(default)]
    pub deallocation_reason: DeallocationReason,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub reason_for_stopping: Option<String>,
}

impl ObservedProcess {
    pub fn new(id: ProcessId, node: NodeIdentity, process_state: ProcessState) -> Self {
        Self {
            id,
            node,
            pid: None,
            process_type: None,
            process_state,
            resource_state: None,
            deallocation_reason: DeallocationReason::Undefined,
            exit_code: None,
            reason_for_stopping: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.process_state.is_terminal()
    }
}

pub type ResourceStateReport = BTreeMap<WorkId, RmJobState>;
pub type ServiceDependencyReport = BTreeMap<WorkId, ServiceDependency>;
pub type InventoryReport = BTreeMap<ProcessId, ObservedProcess>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_todo_and_deallocatable() {
        let mut report = DriverStatusReport::new(WorkId(1), DriverState::Running);
        report.work_items_total = 100;
        report.work_items_done = 90;
        report.work_items_error = 3;
        report.work_items_lost = 2;
        assert_eq!(report.work_items_todo(), 5);
        assert!(report.is_deallocatable());

        report.work_items_pending_assignment = 1;
        assert!(!report.is_deallocatable());
        report.work_items_pending_assignment = 0;
        report.pending = true;
        assert!(!report.is_deallocatable());
    }

    #[test]
    fn test_investment_lookup() {
        let mut report = DriverStatusReport::new(WorkId(1), DriverState::Running);
        let location = RemoteLocation::new("10.0.0.1", "4242");
        report.investments.push(ProcessInvestment {
            location: location.clone(),
            millis: 1500,
        });
        report.operating.push(location.clone());
        assert_eq!(report.investment_of(&location), 1500);
        assert_eq!(report.investment_of(&RemoteLocation::new("10.0.0.2", "1")), 0);
        assert!(report.is_operating(&location));
    }

    #[test]
    fn test_dependency_messages() {
        let mut dependency = ServiceDependency::new(ServiceState::NotAvailable);
        assert_eq!(dependency.joined_messages(), None);
        dependency.messages = Some(BTreeMap::from([
            ("ep-a".to_string(), "down".to_string()),
            ("ep-b".to_string(), "timeout".to_string()),
        ]));
        assert_eq!(
            dependency.joined_messages().as_deref(),
            Some("ep-a:down;ep-b:timeout;")
        );
    }

    #[test]
    fn test_resource_report_from_json() {
        let id = ProcessId::new(1);
        let key = String::from(id);
        let json = format!(
            r#"{{"42": {{"pending_additions": {{"{key}": {{"id": "{key}", "node": {{"name": "n1", "ip": "10.0.0.1"}}}}}}, "refused": false}}}}"#
        );
        let report: ResourceStateReport = serde_json::from_str(&json).unwrap();
        let state = report.get(&WorkId(42)).unwrap();
        let additions = state.pending_additions.as_ref().unwrap();
        assert_eq!(additions.get(&id).unwrap().shares, 1);
        assert!(state.resources.is_none());
    }
}
