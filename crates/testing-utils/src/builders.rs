//! 测试数据构建器
//!
//! 提供带合理默认值的工作单元与外部报告构建器。

use orchestrator_domain::{
    CompletionType, DeploymentKind, DriverInfo, DriverState, DriverStatusReport, JobState,
    ManagedWork, ObservedProcess, Process, ProcessId, ProcessState, ProcessType, Rationale,
    RemoteLocation, ReservationState, ReservationWork, Resource, RmJobState, SchedulingInfo,
    ServiceDependency, ServiceState, StandardInfo, WorkId, WorkRecord,
};

use crate::helpers::test_node;

pub const TEST_USER: &str = "alice";
pub const TEST_LOG_DIR: &str = "/tmp/orchestrator-test-logs";

/// 作业或服务的构建器
pub struct ManagedWorkBuilder {
    work: ManagedWork,
}

impl ManagedWorkBuilder {
    pub fn new(id: u64) -> Self {
        Self {
            work: ManagedWork::new(
                WorkId(id),
                StandardInfo::new(TEST_USER, TEST_LOG_DIR),
                SchedulingInfo::default(),
            ),
        }
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.work.state = state;
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.work.standard_info.user = user.to_string();
        self
    }

    pub fn with_service_dependencies(mut self, endpoints: &[&str]) -> Self {
        self.work.service_dependencies = Some(endpoints.iter().map(|e| e.to_string()).collect());
        self
    }

    pub fn with_threads_per_share(mut self, threads_per_share: u32) -> Self {
        self.work.scheduling_info.threads_per_share = threads_per_share;
        self
    }

    pub fn with_scheduling_class(mut self, class: &str) -> Self {
        self.work.scheduling_info.scheduling_class = class.to_string();
        self
    }

    pub fn with_deployment(mut self, deployment: DeploymentKind) -> Self {
        self.work.deployment = deployment;
        self
    }

    pub fn with_completion(mut self, completion_type: CompletionType, rationale: &str) -> Self {
        self.work
            .completion
            .set_if_undefined(completion_type, Rationale::new(rationale));
        self
    }

    /// 添加一个已分配、正在运行的工作进程
    pub fn with_worker(mut self, id: ProcessId) -> Self {
        let process = running_process(id, self.work.id, self.work.deployment.process_type());
        self.work.processes.add(process);
        self
    }

    /// 添加一个已分配、正在运行的驱动进程
    pub fn with_driver_process(mut self, id: ProcessId) -> Self {
        let process = running_process(id, self.work.id, ProcessType::Pop);
        self.work
            .driver
            .get_or_insert_with(DriverInfo::default)
            .processes
            .add(process);
        self
    }

    pub fn build(self) -> ManagedWork {
        self.work
    }

    pub fn build_job(self) -> WorkRecord {
        WorkRecord::Job(self.work)
    }

    pub fn build_service(self) -> WorkRecord {
        WorkRecord::Service(self.work)
    }
}

fn running_process(id: ProcessId, work_id: WorkId, process_type: ProcessType) -> Process {
    let mut process = Process::new(id, work_id, test_node(id.friendly), process_type);
    process.pid = Some(format!("{}", 1000 + id.friendly));
    process.process_state = ProcessState::Running;
    process
}

pub struct ReservationBuilder {
    reservation: ReservationWork,
}

impl ReservationBuilder {
    pub fn new(id: u64) -> Self {
        Self {
            reservation: ReservationWork::new(
                WorkId(id),
                StandardInfo::new(TEST_USER, TEST_LOG_DIR),
                SchedulingInfo::default(),
            ),
        }
    }

    pub fn with_state(mut self, state: ReservationState) -> Self {
        self.reservation.state = state;
        self
    }

    pub fn with_scheduling_class(mut self, class: &str) -> Self {
        self.reservation.scheduling_info.scheduling_class = class.to_string();
        self
    }

    pub fn build(self) -> WorkRecord {
        WorkRecord::Reservation(self.reservation)
    }
}

/// 作业驱动报告构建器
pub struct DriverReportBuilder {
    report: DriverStatusReport,
}

impl DriverReportBuilder {
    pub fn new(work_id: u64, state: DriverState) -> Self {
        Self {
            report: DriverStatusReport::new(WorkId(work_id), state),
        }
    }

    pub fn with_work_items(mut self, total: u64, done: u64) -> Self {
        self.report.work_items_total = total;
        self.report.work_items_done = done;
        self
    }

    pub fn with_errors(mut self, error: u64) -> Self {
        self.report.work_items_error = error;
        self
    }

    pub fn with_lost(mut self, lost: u64) -> Self {
        self.report.work_items_lost = lost;
        self
    }

    pub fn with_pending_assignment(mut self, pending_assignment: u64) -> Self {
        self.report.work_items_pending_assignment = pending_assignment;
        self
    }

    pub fn pending(mut self) -> Self {
        self.report.pending = true;
        self
    }

    pub fn with_callback(mut self, node: &str, port: u16) -> Self {
        self.report.node = node.to_string();
        self.report.port = port;
        self
    }

    pub fn with_analysis_engine(mut self, analysis_engine: &str) -> Self {
        self.report.analysis_engine = Some(analysis_engine.to_string());
        self
    }

    pub fn with_kill_job(mut self, rationale: &str) -> Self {
        self.report.kill_job = true;
        self.report.completion_rationale = Rationale::new(rationale);
        self
    }

    pub fn with_completion(mut self, completion_type: CompletionType, rationale: &str) -> Self {
        self.report.completion_type = completion_type;
        self.report.completion_rationale = Rationale::new(rationale);
        self
    }

    pub fn with_operating(mut self, location: RemoteLocation) -> Self {
        self.report.operating.push(location);
        self
    }

    pub fn with_kill_list(mut self, ids: &[ProcessId]) -> Self {
        self.report.kill_list.extend_from_slice(ids);
        self
    }

    pub fn build(self) -> DriverStatusReport {
        self.report
    }
}

/// 资源管理器视图构建器
#[derive(Default)]
pub struct RmStateBuilder {
    state: RmJobState,
}

impl RmStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前分配的资源
    pub fn with_resource(mut self, id: ProcessId) -> Self {
        self.state
            .resources
            .get_or_insert_with(Default::default)
            .insert(id, Resource::new(id, test_node(id.friendly)));
        self
    }

    /// 当前分配但已被清除的资源
    pub fn with_purged(mut self, id: ProcessId) -> Self {
        let mut resource = Resource::new(id, test_node(id.friendly));
        resource.purged = true;
        self.state
            .resources
            .get_or_insert_with(Default::default)
            .insert(id, resource);
        self
    }

    /// 资源列表存在但为空
    pub fn with_no_resources(mut self) -> Self {
        self.state.resources = Some(Default::default());
        self
    }

    pub fn with_addition(mut self, id: ProcessId) -> Self {
        self.state
            .pending_additions
            .get_or_insert_with(Default::default)
            .insert(id, Resource::new(id, test_node(id.friendly)));
        self
    }

    pub fn with_removal(mut self, id: ProcessId) -> Self {
        self.state
            .pending_removals
            .get_or_insert_with(Default::default)
            .insert(id, Resource::new(id, test_node(id.friendly)));
        self
    }

    pub fn refused(mut self, reason: &str) -> Self {
        self.state.refused = true;
        self.state.reason = Some(reason.to_string());
        self
    }

    pub fn build(self) -> RmJobState {
        self.state
    }
}

pub fn service_dependency(state: ServiceState, messages: &[(&str, &str)]) -> ServiceDependency {
    let mut dependency = ServiceDependency::new(state);
    if !messages.is_empty() {
        dependency.messages = Some(
            messages
                .iter()
                .map(|(endpoint, message)| (endpoint.to_string(), message.to_string()))
                .collect(),
        );
    }
    dependency
}

/// 节点代理观察到的进程快照
pub fn observed(id: ProcessId, state: ProcessState, process_type: ProcessType) -> ObservedProcess {
    let mut observed = ObservedProcess::new(id, test_node(id.friendly), state);
    observed.process_type = Some(process_type);
    observed.pid = Some(format!("{}", 1000 + id.friendly));
    observed
}
