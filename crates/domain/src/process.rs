//! 进程模型
//!
//! 资源状态只能从 `Allocated` 变为 `Deallocated` 一次；生命周期状态由节点代理报告驱动。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::reports::ObservedProcess;
use crate::value_objects::{NodeIdentity, ProcessId, RemoteLocation, WorkId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    Allocated,
    Deallocated,
}

/// 释放原因，仅用于记录，不影响后续状态转换
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeallocationReason {
    #[default]
    Undefined,
    Voluntary,
    Forced,
    Exception,
    Purged,
    Stopped,
    JobCanceled,
    JobFailure,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessState {
    #[default]
    Undefined,
    Starting,
    Initializing,
    Running,
    Stopping,
    Stopped,
    Failed,
    FailedInitialization,
    InitializationTimeout,
    Killed,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::Stopped
                | ProcessState::Failed
                | ProcessState::FailedInitialization
                | ProcessState::InitializationTimeout
                | ProcessState::Killed
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ProcessState::Failed | ProcessState::Killed)
    }

    pub fn is_initialization_failure(&self) -> bool {
        matches!(
            self,
            ProcessState::FailedInitialization | ProcessState::InitializationTimeout
        )
    }

    fn rank(&self) -> u8 {
        match self {
            ProcessState::Undefined => 0,
            ProcessState::Starting => 1,
            ProcessState::Initializing => 2,
            ProcessState::Running => 3,
            ProcessState::Stopping => 4,
            _ => 5,
        }
    }

    /// 生命周期只能向前推进，终态之间不互相覆盖
    pub fn can_advance_to(&self, next: ProcessState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessType {
    /// 普通进程（作业驱动或托管预留）
    Pop,
    Service,
    JobUimaAsProcess,
}

/// 单个进程的工作项计数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessWorkItems {
    pub dispatch: u64,
    pub done: u64,
    pub error: u64,
    pub retry: u64,
    pub lost: u64,
    pub unassigned: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    /// 所属工作单元（反向引用）
    pub work_id: WorkId,
    pub node: NodeIdentity,
    pub pid: Option<String>,
    pub process_type: ProcessType,
    pub shares: u32,
    pub resource_state: ResourceState,
    pub deallocation_reason: DeallocationReason,
    pub process_state: ProcessState,
    pub exit_code: Option<i32>,
    pub reason_for_stopping: Option<String>,
    pub jmx_url: Option<String>,
    pub wi_millis_investment: u64,
    pub work_items: ProcessWorkItems,
}

impl Process {
    pub fn new(id: ProcessId, work_id: WorkId, node: NodeIdentity, process_type: ProcessType) -> Self {
        Self {
            id,
            work_id,
            node,
            pid: None,
            process_type,
            shares: 1,
            resource_state: ResourceState::Allocated,
            deallocation_reason: DeallocationReason::Undefined,
            process_state: ProcessState::Undefined,
            exit_code: None,
            reason_for_stopping: None,
            jmx_url: None,
            wi_millis_investment: 0,
            work_items: ProcessWorkItems::default(),
        }
    }

    pub fn is_deallocated(&self) -> bool {
        self.resource_state == ResourceState::Deallocated
    }

    /// 释放资源；已释放时不做任何修改并返回 false
    pub fn deallocate(&mut self, reason: DeallocationReason) -> bool {
        if self.is_deallocated() {
            return false;
        }
        self.resource_state = ResourceState::Deallocated;
        self.deallocation_reason = reason;
        true
    }

    pub fn advance_state(&mut self, next: ProcessState) -> bool {
        if self.process_state.can_advance_to(next) {
            self.process_state = next;
            true
        } else {
            false
        }
    }

    pub fn is_complete(&self) -> bool {
        self.process_state.is_terminal()
    }

    /// 资源已释放且生命周期已结束
    pub fn is_defunct(&self) -> bool {
        self.is_deallocated() && self.is_complete()
    }

    pub fn is_alive(&self) -> bool {
        !self.is_defunct()
    }

    pub fn location(&self) -> Option<RemoteLocation> {
        self.pid
            .as_ref()
            .map(|pid| RemoteLocation::new(self.node.ip.clone(), pid.clone()))
    }

    /// 应用节点代理观察到的快照，生命周期字段以最后一次报告为准
    pub fn apply_observation(&mut self, observed: &ObservedProcess) -> bool {
        let mut changed = false;
        if self.process_state != observed.process_state {
            self.process_state = observed.process_state;
            changed = true;
        }
        if observed.pid.is_some() && self.pid != observed.pid {
            self.pid = observed.pid.clone();
            changed = true;
        }
        if observed.exit_code.is_some() && self.exit_code != observed.exit_code {
            self.exit_code = observed.exit_code;
            changed = true;
        }
        if observed.reason_for_stopping.is_some()
            && self.reason_for_stopping != observed.reason_for_stopping
        {
            self.reason_for_stopping = observed.reason_for_stopping.clone();
            changed = true;
        }
        if observed.resource_state == Some(ResourceState::Deallocated) {
            changed |= self.deallocate(observed.deallocation_reason);
        }
        changed
    }
}

/// 进程表：按进程标识索引，拒绝重复添加，条目在释放后仍保留用于统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Process>", into = "Vec<Process>")]
pub struct ProcessMap {
    processes: BTreeMap<ProcessId, Process>,
}

impl ProcessMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加进程；标识已存在时拒绝并返回 false
    pub fn add(&mut self, process: Process) -> bool {
        if self.processes.contains_key(&process.id) {
            return false;
        }
        self.processes.insert(process.id, process);
        true
    }

    pub fn contains(&self, id: &ProcessId) -> bool {
        self.processes.contains_key(id)
    }

    pub fn get(&self, id: &ProcessId) -> Option<&Process> {
        self.processes.get(id)
    }

    pub fn get_mut(&mut self, id: &ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn ids(&self) -> Vec<ProcessId> {
        self.processes.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Process> {
        self.processes.values_mut()
    }

    pub fn alive_count(&self) -> usize {
        self.iter().filter(|p| p.is_alive()).count()
    }

    pub fn allocated_count(&self) -> usize {
        self.iter().filter(|p| !p.is_deallocated()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.iter().filter(|p| p.process_state.is_failure()).count()
    }

    pub fn init_failure_count(&self) -> usize {
        self.iter()
            .filter(|p| p.process_state.is_initialization_failure())
            .count()
    }

    /// 释放全部进程，返回本次实际释放的数量
    pub fn deallocate_all(&mut self, reason: DeallocationReason) -> usize {
        let mut released = 0;
        for process in self.iter_mut() {
            if process.deallocate(reason) {
                released += 1;
            }
        }
        released
    }
}

impl From<Vec<Process>> for ProcessMap {
    fn from(processes: Vec<Process>) -> Self {
        let mut map = ProcessMap::new();
        for process in processes {
            map.add(process);
        }
        map
    }
}

impl From<ProcessMap> for Vec<Process> {
    fn from(map: ProcessMap) -> Self {
        map.processes.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(friendly: u64) -> Process {
        Process::new(
            ProcessId::new(friendly),
            WorkId(1),
            NodeIdentity::new("node-a", "10.0.0.1"),
            ProcessType::JobUimaAsProcess,
        )
    }

    #[test]
    fn test_deallocate_is_once_only() {
        let mut p = process(1);
        assert!(p.deallocate(DeallocationReason::Forced));
        assert!(!p.deallocate(DeallocationReason::Purged));
        assert_eq!(p.deallocation_reason, DeallocationReason::Forced);
        assert_eq!(p.resource_state, ResourceState::Deallocated);
    }

    #[test]
    fn test_advance_state_only_moves_forward() {
        let mut p = process(1);
        assert!(p.advance_state(ProcessState::Running));
        assert!(!p.advance_state(ProcessState::Starting));
        assert!(p.advance_state(ProcessState::Stopped));
        assert!(!p.advance_state(ProcessState::Failed));
        assert_eq!(p.process_state, ProcessState::Stopped);
    }

    #[test]
    fn test_defunct_requires_deallocation_and_terminal_state() {
        let mut p = process(1);
        p.process_state = ProcessState::Stopped;
        assert!(p.is_alive());
        p.deallocate(DeallocationReason::Stopped);
        assert!(p.is_defunct());

        let mut q = process(2);
        q.deallocate(DeallocationReason::Voluntary);
        assert!(q.is_alive(), "仍在运行的进程即使已释放也视为存活");
    }

    #[test]
    fn test_process_map_refuses_duplicates() {
        let mut map = ProcessMap::new();
        let p = process(1);
        assert!(map.add(p.clone()));
        assert!(!map.add(p));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_process_map_counts() {
        let mut map = ProcessMap::new();
        let mut failed = process(1);
        failed.process_state = ProcessState::Failed;
        failed.deallocate(DeallocationReason::Exception);
        let mut init_failed = process(2);
        init_failed.process_state = ProcessState::FailedInitialization;
        map.add(failed);
        map.add(init_failed);
        map.add(process(3));

        assert_eq!(map.failure_count(), 1);
        assert_eq!(map.init_failure_count(), 1);
        assert_eq!(map.alive_count(), 2);
        assert_eq!(map.allocated_count(), 2);
        assert_eq!(map.deallocate_all(DeallocationReason::JobCanceled), 2);
        assert_eq!(map.allocated_count(), 0);
    }

    #[test]
    fn test_deallocate_all_releases_each_process_once() {
        let mut map = ProcessMap::new();
        let mut released = process(1);
        released.deallocate(DeallocationReason::Forced);
        map.add(released);
        map.add(process(2));

        assert_eq!(map.deallocate_all(DeallocationReason::Voluntary), 1);
        assert_eq!(map.deallocate_all(DeallocationReason::JobCanceled), 0);
        let reasons: Vec<DeallocationReason> = map.iter().map(|p| p.deallocation_reason).collect();
        assert_eq!(
            reasons,
            vec![DeallocationReason::Forced, DeallocationReason::Voluntary]
        );
    }

    #[test]
    fn test_process_map_serializes_as_list() {
        let mut map = ProcessMap::new();
        map.add(process(1));
        map.add(process(2));
        let json = serde_json::to_value(&map).unwrap();
        assert!(json.is_array());
        let back: ProcessMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }
}
