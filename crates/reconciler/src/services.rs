//! 服务依赖协调

use tracing::{debug, info, trace, warn};

use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{
    CompletionType, JobEvent, JobState, Rationale, ServiceDependency, ServiceDependencyReport,
    ServiceState, WorkId, WorkMapState, WorkRecord,
};

use crate::completion::set_completion_if_undefined;
use crate::engine::{apply_job_event, Pass, PassSource, ReconciliationEngine};

impl ReconciliationEngine {
    /// 合并服务管理器报告的依赖可用性
    pub async fn reconcile_service_dependencies(&self, report: &ServiceDependencyReport) {
        trace!(size = report.len(), "协调服务依赖");
        let mut pass = Pass::new(PassSource::ServiceManager);
        {
            let mut state = self.work_map.lock().await;
            for (work_id, dependency) in report {
                if let Err(e) = apply_service_dependency(&mut state, *work_id, dependency, &mut pass) {
                    pass.entry_failed(work_id, &e);
                }
            }
        }
        self.finish_pass(pass).await;
    }
}

fn apply_service_dependency(
    state: &mut WorkMapState,
    work_id: WorkId,
    dependency: &ServiceDependency,
    pass: &mut Pass,
) -> OrchestratorResult<()> {
    let Some(record) = state.get_mut(&work_id) else {
        debug!(work_id = %work_id, "服务依赖报告中的工作单元不存在");
        return Ok(());
    };
    let kind = record.kind();
    let work = match record {
        WorkRecord::Job(work) | WorkRecord::Service(work) => work,
        WorkRecord::Reservation(_) => {
            debug!(work_id = %work_id, "预留没有服务依赖");
            return Ok(());
        }
    };

    match work.state {
        JobState::Received => {
            warn!(work_id = %work_id, kind = %kind, state = ?work.state, "服务依赖报告到达时状态异常");
        }
        JobState::WaitingForServices => match dependency.state {
            ServiceState::Waiting | ServiceState::Starting | ServiceState::Initializing => {
                debug!(work_id = %work_id, service_state = ?dependency.state, "等待服务就绪");
            }
            ServiceState::Available => {
                if apply_job_event(work, kind, JobEvent::ServicesAvailable, pass).is_some() {
                    info!(work_id = %work_id, "服务依赖已可用");
                }
            }
            ServiceState::NotAvailable | ServiceState::Stopped | ServiceState::Stopping => {
                if apply_job_event(work, kind, JobEvent::ServicesUnavailable, pass).is_some() {
                    let rationale = dependency
                        .joined_messages()
                        .map(|messages| Rationale::new(format!("service manager reported {messages}")))
                        .unwrap_or_else(Rationale::unspecified);
                    set_completion_if_undefined(work, CompletionType::ServicesUnavailable, rationale, pass);
                    info!(work_id = %work_id, service_state = ?dependency.state, "服务依赖不可用");
                }
            }
            ServiceState::Undefined => {
                warn!(work_id = %work_id, "服务依赖状态未定义");
            }
        },
        _ => {
            debug!(work_id = %work_id, state = ?work.state, service_state = ?dependency.state, "忽略服务依赖报告");
        }
    }
    Ok(())
}
