use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::process::{ProcessMap, ProcessType};
use crate::value_objects::{NodeIdentity, ProcessId, WorkId};

/// 工作单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkKind {
    Job,
    Service,
    Reservation,
}

impl std::fmt::Display for WorkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkKind::Job => write!(f, "job"),
            WorkKind::Service => write!(f, "service"),
            WorkKind::Reservation => write!(f, "reservation"),
        }
    }
}

/// 作业/服务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Received,
    WaitingForDriver,
    WaitingForServices,
    WaitingForResources,
    Assigned,
    Initializing,
    Running,
    Completing,
    Completed,
}

impl JobState {
    /// 正在完成或已完成
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completing | JobState::Completed)
    }

    pub fn is_completed(&self) -> bool {
        *self == JobState::Completed
    }
}

/// 预留状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationState {
    Received,
    WaitingForResources,
    Assigned,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CompletionType {
    #[default]
    Undefined,
    EndOfJob,
    Error,
    Lost,
    Warning,
    NoWorkItemsFound,
    CanceledByDriver,
    CanceledByUser,
    DriverProcessFailed,
    ProcessFailure,
    ResourcesUnavailable,
    ServicesUnavailable,
    ProgramExit,
}

/// 完成原因说明
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rationale(Option<String>);

impl Rationale {
    pub fn new(text: impl Into<String>) -> Self {
        Self(Some(text.into()))
    }

    pub fn unspecified() -> Self {
        Self(None)
    }

    pub fn is_specified(&self) -> bool {
        self.0.as_deref().is_some_and(|text| !text.is_empty())
    }

    pub fn text(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<Option<String>> for Rationale {
    fn from(text: Option<String>) -> Self {
        Self(text)
    }
}

/// 完成类型与原因，只能从 `Undefined` 设置一次
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    completion_type: CompletionType,
    rationale: Rationale,
}

impl Completion {
    pub fn completion_type(&self) -> CompletionType {
        self.completion_type
    }

    pub fn rationale(&self) -> &Rationale {
        &self.rationale
    }

    pub fn is_undefined(&self) -> bool {
        self.completion_type == CompletionType::Undefined
    }

    /// 仅在尚未设置时写入，返回是否写入
    pub fn set_if_undefined(&mut self, completion_type: CompletionType, rationale: Rationale) -> bool {
        if !self.is_undefined() || completion_type == CompletionType::Undefined {
            return false;
        }
        self.completion_type = completion_type;
        self.rationale = rationale;
        true
    }
}

/// 提交与生命周期时间戳、所属用户和日志目录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardInfo {
    pub user: String,
    pub log_directory: PathBuf,
    pub date_of_submission: Option<DateTime<Utc>>,
    pub date_of_completion: Option<DateTime<Utc>>,
    pub date_of_shutdown_processes: Option<DateTime<Utc>>,
}

impl StandardInfo {
    pub fn new(user: impl Into<String>, log_directory: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            log_directory: log_directory.into(),
            date_of_submission: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn stamp_completion(&mut self, now: DateTime<Utc>) -> bool {
        if self.date_of_completion.is_some() {
            return false;
        }
        self.date_of_completion = Some(now);
        true
    }

    pub fn stamp_shutdown_processes(&mut self, now: DateTime<Utc>) -> bool {
        if self.date_of_shutdown_processes.is_some() {
            return false;
        }
        self.date_of_shutdown_processes = Some(now);
        true
    }

    /// 用户日志目录：`<log_directory>/<work id>`
    pub fn user_log_dir(&self, id: WorkId) -> PathBuf {
        self.log_directory.join(id.to_string())
    }
}

/// 调度信息与工作项统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingInfo {
    pub scheduling_class: String,
    pub threads_per_share: u32,
    pub work_items_total: u64,
    pub work_items_done: u64,
    pub work_items_error: u64,
    pub work_items_lost: u64,
    pub work_items_dispatched: u64,
    pub work_items_pending_assignment: u64,
}

impl Default for SchedulingInfo {
    fn default() -> Self {
        Self {
            scheduling_class: "normal".to_string(),
            threads_per_share: 1,
            work_items_total: 0,
            work_items_done: 0,
            work_items_error: 0,
            work_items_lost: 0,
            work_items_dispatched: 0,
            work_items_pending_assignment: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub executable: String,
    pub options: Vec<String>,
    pub arguments: Vec<String>,
}

/// 部署类型，决定新进程的进程类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeploymentKind {
    Uima,
    Custom,
    Other,
    #[default]
    Unspecified,
}

impl DeploymentKind {
    pub fn process_type(&self) -> ProcessType {
        match self {
            DeploymentKind::Custom | DeploymentKind::Other => ProcessType::Pop,
            DeploymentKind::Uima | DeploymentKind::Unspecified => ProcessType::JobUimaAsProcess,
        }
    }
}

/// 工作项耗时统计（毫秒）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemTiming {
    pub min_millis: u64,
    pub max_millis: u64,
    pub avg_millis: u64,
    pub operating_least_millis: u64,
    pub completed_most_millis: u64,
}

/// 作业驱动子记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub processes: ProcessMap,
    pub management_url: Option<String>,
}

/// 带进程的工作单元（作业或服务）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedWork {
    pub id: WorkId,
    pub state: JobState,
    pub completion: Completion,
    pub standard_info: StandardInfo,
    pub scheduling_info: SchedulingInfo,
    pub processes: ProcessMap,
    /// 仅作业拥有驱动
    pub driver: Option<DriverInfo>,
    pub command_line: CommandLine,
    pub jd_url_specified: bool,
    pub dd_specified: bool,
    pub deployment_descriptor: Option<String>,
    pub deployment: DeploymentKind,
    pub service_dependencies: Option<Vec<String>>,
    pub timing: WorkItemTiming,
}

impl ManagedWork {
    pub fn new(id: WorkId, standard_info: StandardInfo, scheduling_info: SchedulingInfo) -> Self {
        Self {
            id,
            state: JobState::Received,
            completion: Completion::default(),
            standard_info,
            scheduling_info,
            processes: ProcessMap::new(),
            driver: None,
            command_line: CommandLine::default(),
            jd_url_specified: false,
            dd_specified: false,
            deployment_descriptor: None,
            deployment: DeploymentKind::default(),
            service_dependencies: None,
            timing: WorkItemTiming::default(),
        }
    }

    pub fn has_service_dependencies(&self) -> bool {
        self.service_dependencies.is_some()
    }

    pub fn driver_alive_count(&self) -> usize {
        self.driver
            .as_ref()
            .map(|driver| driver.processes.alive_count())
            .unwrap_or(0)
    }

    /// 存活进程数：工作进程加驱动进程
    pub fn live_process_count(&self) -> usize {
        self.processes.alive_count() + self.driver_alive_count()
    }

    /// 已经设置了完成类型或处于 Completing
    pub fn is_terminating(&self) -> bool {
        !self.completion.is_undefined() || self.state == JobState::Completing
    }

    /// 工作项处理能力：未释放的工作进程数乘以每份额线程数
    pub fn work_item_capacity(&self) -> u64 {
        self.processes.allocated_count() as u64 * u64::from(self.scheduling_info.threads_per_share)
    }

    pub fn process_failure_count(&self) -> usize {
        self.processes.failure_count()
    }

    pub fn process_init_failure_count(&self) -> usize {
        self.processes.init_failure_count()
    }

    pub fn is_driver_process(&self, id: &ProcessId) -> bool {
        self.driver
            .as_ref()
            .is_some_and(|driver| driver.processes.contains(id))
    }

    /// 所有进程标识（工作进程和驱动进程）
    pub fn all_process_ids(&self) -> Vec<ProcessId> {
        let mut ids = self.processes.ids();
        if let Some(driver) = &self.driver {
            ids.extend(driver.processes.ids());
        }
        ids
    }

    pub fn process_mut(&mut self, id: &ProcessId) -> Option<&mut crate::process::Process> {
        if self.processes.contains(id) {
            return self.processes.get_mut(id);
        }
        self.driver
            .as_mut()
            .and_then(|driver| driver.processes.get_mut(id))
    }

    /// 所有进程均已结束时记录一次关闭时间
    pub fn stamp_shutdown_if_drained(&mut self, now: DateTime<Utc>) -> bool {
        self.live_process_count() == 0 && self.standard_info.stamp_shutdown_processes(now)
    }
}

/// 预留中的一份原始资源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedShare {
    pub id: ProcessId,
    pub node: NodeIdentity,
    pub shares: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationWork {
    pub id: WorkId,
    pub state: ReservationState,
    pub completion: Completion,
    pub standard_info: StandardInfo,
    pub scheduling_info: SchedulingInfo,
    pub reservations: BTreeMap<ProcessId, ReservedShare>,
}

impl ReservationWork {
    pub fn new(id: WorkId, standard_info: StandardInfo, scheduling_info: SchedulingInfo) -> Self {
        Self {
            id,
            state: ReservationState::Received,
            completion: Completion::default(),
            standard_info,
            scheduling_info,
            reservations: BTreeMap::new(),
        }
    }
}

/// 工作记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record")]
pub enum WorkRecord {
    Job(ManagedWork),
    Service(ManagedWork),
    Reservation(ReservationWork),
}

impl WorkRecord {
    pub fn id(&self) -> WorkId {
        match self {
            WorkRecord::Job(work) | WorkRecord::Service(work) => work.id,
            WorkRecord::Reservation(reservation) => reservation.id,
        }
    }

    pub fn kind(&self) -> WorkKind {
        match self {
            WorkRecord::Job(_) => WorkKind::Job,
            WorkRecord::Service(_) => WorkKind::Service,
            WorkRecord::Reservation(_) => WorkKind::Reservation,
        }
    }

    pub fn standard_info(&self) -> &StandardInfo {
        match self {
            WorkRecord::Job(work) | WorkRecord::Service(work) => &work.standard_info,
            WorkRecord::Reservation(reservation) => &reservation.standard_info,
        }
    }

    pub fn completion(&self) -> &Completion {
        match self {
            WorkRecord::Job(work) | WorkRecord::Service(work) => &work.completion,
            WorkRecord::Reservation(reservation) => &reservation.completion,
        }
    }

    pub fn managed(&self) -> Option<&ManagedWork> {
        match self {
            WorkRecord::Job(work) | WorkRecord::Service(work) => Some(work),
            WorkRecord::Reservation(_) => None,
        }
    }

    pub fn managed_mut(&mut self) -> Option<&mut ManagedWork> {
        match self {
            WorkRecord::Job(work) | WorkRecord::Service(work) => Some(work),
            WorkRecord::Reservation(_) => None,
        }
    }

    /// 处于终态（Completed）
    pub fn is_completed(&self) -> bool {
        match self {
            WorkRecord::Job(work) | WorkRecord::Service(work) => work.state.is_completed(),
            WorkRecord::Reservation(reservation) => {
                reservation.state == ReservationState::Completed
            }
        }
    }

    /// 需要登记到进程索引的进程标识
    pub fn process_ids(&self) -> Vec<ProcessId> {
        self.managed()
            .map(ManagedWork::all_process_ids)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{DeallocationReason, Process, ProcessState};

    fn job() -> ManagedWork {
        let mut work = ManagedWork::new(
            WorkId(7),
            StandardInfo::new("alice", "/tmp/logs"),
            SchedulingInfo {
                threads_per_share: 4,
                ..Default::default()
            },
        );
        work.driver = Some(DriverInfo::default());
        work
    }

    fn worker(work: &ManagedWork, friendly: u64) -> Process {
        Process::new(
            ProcessId::new(friendly),
            work.id,
            NodeIdentity::new("node-a", "10.0.0.1"),
            ProcessType::JobUimaAsProcess,
        )
    }

    #[test]
    fn test_completion_is_write_once() {
        let mut completion = Completion::default();
        assert!(!completion.set_if_undefined(CompletionType::Undefined, Rationale::unspecified()));
        assert!(completion.set_if_undefined(CompletionType::Error, Rationale::new("errors=2")));
        assert!(!completion.set_if_undefined(CompletionType::EndOfJob, Rationale::new("normal")));
        assert_eq!(completion.completion_type(), CompletionType::Error);
        assert_eq!(completion.rationale().text(), Some("errors=2"));
    }

    #[test]
    fn test_live_count_includes_driver() {
        let mut work = job();
        let p = worker(&work, 1);
        work.processes.add(p);
        let driver = worker(&work, 0);
        work.driver.as_mut().unwrap().processes.add(driver);
        assert_eq!(work.live_process_count(), 2);
        assert_eq!(work.all_process_ids().len(), 2);
    }

    #[test]
    fn test_capacity_counts_allocated_workers() {
        let mut work = job();
        for friendly in 1..=3 {
            let p = worker(&work, friendly);
            work.processes.add(p);
        }
        assert_eq!(work.work_item_capacity(), 12);
        let id = work.processes.ids()[0];
        work.processes
            .get_mut(&id)
            .unwrap()
            .deallocate(DeallocationReason::Voluntary);
        assert_eq!(work.work_item_capacity(), 8);
    }

    #[test]
    fn test_shutdown_stamped_once_when_drained() {
        let mut work = job();
        let mut p = worker(&work, 1);
        p.process_state = ProcessState::Stopped;
        work.processes.add(p);
        assert!(!work.stamp_shutdown_if_drained(Utc::now()));

        work.processes.deallocate_all(DeallocationReason::Stopped);
        assert!(work.stamp_shutdown_if_drained(Utc::now()));
        assert!(!work.stamp_shutdown_if_drained(Utc::now()));
    }

    #[test]
    fn test_deployment_kind_process_type() {
        assert_eq!(DeploymentKind::Custom.process_type(), ProcessType::Pop);
        assert_eq!(DeploymentKind::Other.process_type(), ProcessType::Pop);
        assert_eq!(
            DeploymentKind::Unspecified.process_type(),
            ProcessType::JobUimaAsProcess
        );
    }

    #[test]
    fn test_work_record_serde_tagged() {
        let record = WorkRecord::Job(job());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "Job");
        let back: WorkRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.id(), WorkId(7));
        assert_eq!(back.kind(), WorkKind::Job);
    }
}
