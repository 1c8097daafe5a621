//! 节点进程清单协调

use tracing::{debug, info, trace, warn};

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    CompletionType, DeallocationReason, InventoryReport, ManagedWork, ObservedProcess,
    ProcessId, ProcessState, ProcessType, Rationale, WorkKind, WorkMapState, WorkRecord,
};

use crate::completion::{
    advance_to_completed, complete, complete_managed_reservation, release_all, terminate,
};
use crate::engine::{Pass, PassSource, ReconciliationEngine};

impl ReconciliationEngine {
    /// 合并节点代理观察到的进程快照
    pub async fn reconcile_inventory(&self, report: &InventoryReport) {
        trace!(size = report.len(), "协调进程清单");
        let mut pass = Pass::new(PassSource::NodeInventory);
        {
            let mut state = self.work_map.lock().await;
            for (process_id, observed) in report {
                if let Err(e) = self.apply_observation(&mut state, process_id, observed, &mut pass) {
                    pass.entry_failed(process_id, &e);
                }
            }
        }
        self.finish_pass(pass).await;
    }

    fn apply_observation(
        &self,
        state: &mut WorkMapState,
        process_id: &ProcessId,
        observed: &ObservedProcess,
        pass: &mut Pass,
    ) -> OrchestratorResult<()> {
        let Some(process_type) = observed.process_type else {
            warn!(process_id = %process_id, node = %observed.node, "进程快照缺少进程类型");
            return Ok(());
        };
        let Some(work_id) = self.process_index.work_id_of(process_id) else {
            debug!(process_id = %process_id, "进程不属于任何工作单元");
            return Ok(());
        };
        let Some(record) = state.get_mut(&work_id) else {
            debug!(work_id = %work_id, process_id = %process_id, "进程所属的工作单元不存在");
            return Ok(());
        };

        match record {
            WorkRecord::Job(job) => {
                observe(job, process_id, observed, pass)?;
                reconcile_job_process(job, process_id, observed, process_type, pass);
                advance_to_completed(job, WorkKind::Job, pass);
            }
            WorkRecord::Service(service) => {
                observe(service, process_id, observed, pass)?;
                reconcile_service_process(service, process_id, observed, pass);
                advance_to_completed(service, WorkKind::Service, pass);
            }
            WorkRecord::Reservation(_) => {
                debug!(work_id = %work_id, process_id = %process_id, "预留没有进程");
            }
        }
        Ok(())
    }
}

fn observe(
    work: &mut ManagedWork,
    process_id: &ProcessId,
    observed: &ObservedProcess,
    pass: &mut Pass,
) -> OrchestratorResult<()> {
    let process = work
        .process_mut(process_id)
        .ok_or_else(|| OrchestratorError::process_not_found(*process_id))?;
    if process.apply_observation(observed) {
        debug!(
            work_id = %process.work_id,
            process_id = %process_id,
            process_state = ?process.process_state,
            resource_state = ?process.resource_state,
            "进程快照已更新"
        );
        pass.changed();
    }
    Ok(())
}

fn reconcile_job_process(
    job: &mut ManagedWork,
    process_id: &ProcessId,
    observed: &ObservedProcess,
    process_type: ProcessType,
    pass: &mut Pass,
) {
    let kind = WorkKind::Job;
    if job.is_driver_process(process_id) {
        if observed.process_state == ProcessState::Failed {
            let completion_type = if process_id.is_primary_driver() {
                CompletionType::DriverProcessFailed
            } else {
                CompletionType::ProcessFailure
            };
            let reason = match observed.deallocation_reason {
                DeallocationReason::Undefined => DeallocationReason::JobFailure,
                reason => reason,
            };
            warn!(work_id = %job.id, process_id = %process_id, "驱动进程失败");
            terminate(
                job,
                kind,
                completion_type,
                Rationale::from(observed.reason_for_stopping.clone()),
                reason,
                pass,
            );
        } else if observed.is_complete() {
            pass.changes += release_all(job, DeallocationReason::Stopped);
            info!(work_id = %job.id, process_id = %process_id, "驱动进程已结束");
            complete(
                job,
                kind,
                CompletionType::EndOfJob,
                Rationale::new("state manager reported as normal completion"),
                pass,
            );
        }
        return;
    }

    if process_type == ProcessType::Service {
        warn!(work_id = %job.id, process_id = %process_id, "作业中出现服务类型进程");
        return;
    }

    if observed.is_complete() {
        if let Some(process) = job.processes.get_mut(process_id) {
            if process.deallocate(DeallocationReason::Stopped) {
                pass.changed();
            }
        }
        if job.is_terminating() {
            complete(
                job,
                kind,
                CompletionType::EndOfJob,
                Rationale::new("state manager reported as normal completion"),
                pass,
            );
        }
    }
}

fn reconcile_service_process(
    service: &mut ManagedWork,
    process_id: &ProcessId,
    observed: &ObservedProcess,
    pass: &mut Pass,
) {
    let kind = WorkKind::Service;
    if observed.is_complete() {
        if let Some(process) = service.processes.get_mut(process_id) {
            if process.deallocate(DeallocationReason::Stopped) {
                pass.changed();
            }
        }
    }
    if service.state.is_finished() || service.live_process_count() > 0 {
        return;
    }
    let process_type = service.deployment.process_type();
    if process_type == ProcessType::Pop {
        complete_managed_reservation(service, kind, pass);
    } else {
        complete(
            service,
            kind,
            CompletionType::EndOfJob,
            Rationale::new(format!(
                "state manager reported no viable service process exists, type={process_type:?}"
            )),
            pass,
        );
    }
}
