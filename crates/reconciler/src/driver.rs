//! 作业驱动状态协调

use tracing::{debug, info, trace, warn};

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    CompletionType, DeallocationReason, DriverState, DriverStatusReport, Effect, JobEvent,
    JobState, ManagedWork, Rationale, WorkKind, WorkMapState, WorkRecord,
};

use crate::capacity::is_excess_capacity;
use crate::completion::{classify_by_work_items, release_driver, set_completion_if_undefined, terminate};
use crate::engine::{apply_job_event, Pass, PassSource, ReconciliationEngine};

const WAITING_FOR_SERVICES: &str = "waiting for services";

impl ReconciliationEngine {
    /// 合并一份作业驱动状态报告
    pub async fn reconcile_driver_status(&self, report: &DriverStatusReport) {
        trace!(work_id = %report.work_id, state = ?report.driver_state, "协调驱动报告");
        let mut pass = Pass::new(PassSource::Driver);
        {
            let mut state = self.work_map.lock().await;
            if let Err(e) = self.apply_driver_report(&mut state, report, &mut pass) {
                pass.entry_failed(report.work_id, &e);
            }
        }
        self.finish_pass(pass).await;
    }

    fn apply_driver_report(
        &self,
        state: &mut WorkMapState,
        report: &DriverStatusReport,
        pass: &mut Pass,
    ) -> OrchestratorResult<()> {
        let record = state
            .get_mut(&report.work_id)
            .ok_or_else(|| OrchestratorError::work_not_found(report.work_id))?;
        let kind = record.kind();
        let WorkRecord::Job(job) = record else {
            return Err(OrchestratorError::malformed(format!(
                "驱动报告指向非作业工作单元 {} ({kind})",
                report.work_id
            )));
        };

        add_jd_url_to_command_line(job, report, pass);
        add_deployable_to_command_line(job, report, pass);
        set_management_url(job, report);
        copy_investments(job, report);
        copy_process_work_items(job, report);
        copy_driver_totals(job, report);

        let keep_report = !job.state.is_completed();
        self.apply_driver_state(job, report, pass);
        deallocate_idle_processes(job, report, pass);
        deallocate_killed_processes(job, report, pass);

        if keep_report {
            state.remember_driver_report(report.clone());
        }
        Ok(())
    }

    fn apply_driver_state(&self, job: &mut ManagedWork, report: &DriverStatusReport, pass: &mut Pass) {
        let kind = WorkKind::Job;
        if report.work_items_total == 0 {
            terminate(
                job,
                kind,
                CompletionType::NoWorkItemsFound,
                Rationale::new("job driver had no work items to process"),
                DeallocationReason::JobCanceled,
                pass,
            );
            return;
        }

        match report.driver_state {
            DriverState::Failed => terminate(
                job,
                kind,
                CompletionType::CanceledByDriver,
                report.completion_rationale.clone(),
                DeallocationReason::JobFailure,
                pass,
            ),
            DriverState::NotRunning | DriverState::Undefined => {
                trace!(work_id = %job.id, state = ?report.driver_state, "驱动未运行");
            }
            DriverState::Initializing => {
                apply_job_event(job, kind, JobEvent::DriverInitializing, pass);
            }
            DriverState::Running | DriverState::Idle => {
                if report.kill_job {
                    let rationale = kill_rationale(job.state, &report.completion_rationale);
                    terminate(
                        job,
                        kind,
                        CompletionType::CanceledByDriver,
                        rationale,
                        DeallocationReason::JobFailure,
                        pass,
                    );
                } else {
                    apply_job_event(job, kind, JobEvent::DriverRunning, pass);
                }
            }
            DriverState::Completing => {
                apply_job_event(job, kind, JobEvent::DriverCompleting, pass);
            }
            DriverState::Completed => {
                let Some(transition) = apply_job_event(job, kind, JobEvent::DriverCompleted, pass)
                else {
                    return;
                };
                if transition.has_effect(Effect::ReleaseDriverProcesses) {
                    pass.changes += release_driver(job, DeallocationReason::Voluntary);
                }
                let (completion_type, rationale) = match report.completion_type {
                    CompletionType::EndOfJob => classify_by_work_items(
                        job,
                        CompletionType::EndOfJob,
                        Rationale::new("state manager detected normal completion"),
                    ),
                    other => (other, report.completion_rationale.clone()),
                };
                set_completion_if_undefined(job, completion_type, rationale, pass);
            }
        }
    }
}

/// 驱动要求终止作业时的原因；作业仍在等待服务时追加说明
fn kill_rationale(state: JobState, reported: &Rationale) -> Rationale {
    if state != JobState::WaitingForServices {
        return reported.clone();
    }
    match reported.text() {
        Some(text) if reported.is_specified() => {
            Rationale::new(format!("{text}: {WAITING_FOR_SERVICES}"))
        }
        _ => Rationale::new(WAITING_FOR_SERVICES),
    }
}

fn add_jd_url_to_command_line(job: &mut ManagedWork, report: &DriverStatusReport, pass: &mut Pass) {
    if job.jd_url_specified || report.port == 0 {
        return;
    }
    let option = format!("-DJdURL=http://{}:{}/jdApp", report.node, report.port);
    info!(work_id = %job.id, option = %option, "添加驱动回调地址");
    job.command_line.options.push(option);
    job.jd_url_specified = true;
    pass.changed();
}

fn add_deployable_to_command_line(job: &mut ManagedWork, report: &DriverStatusReport, pass: &mut Pass) {
    if job.dd_specified {
        return;
    }
    if let Some(descriptor) = &report.deployment_descriptor {
        job.deployment_descriptor = Some(descriptor.clone());
    }
    if let Some(analysis_engine) = &report.analysis_engine {
        if job.command_line.arguments.is_empty() {
            job.command_line.arguments.push(analysis_engine.clone());
            debug!(work_id = %job.id, argument = %analysis_engine, "添加分析引擎参数");
        }
        job.dd_specified = true;
        pass.changed();
    }
}

fn set_management_url(job: &mut ManagedWork, report: &DriverStatusReport) {
    let Some(url) = &report.management_url else {
        return;
    };
    if let Some(driver) = job.driver.as_mut() {
        driver.management_url = Some(url.clone());
        for process in driver.processes.iter_mut() {
            process.jmx_url = Some(url.clone());
        }
    }
}

fn copy_investments(job: &mut ManagedWork, report: &DriverStatusReport) {
    for process in job.processes.iter_mut() {
        let Some(location) = process.location() else {
            continue;
        };
        process.wi_millis_investment = report.investment_of(&location);
        trace!(
            work_id = %job.id,
            process_id = %process.id,
            investment = process.wi_millis_investment,
            "进程投入"
        );
    }
}

/// 引用了不存在进程的条目单独跳过，报告其余部分照常合并
fn copy_process_work_items(job: &mut ManagedWork, report: &DriverStatusReport) {
    for (process_id, work_items) in &report.process_work_items {
        match job.processes.get_mut(process_id) {
            Some(process) => process.work_items = work_items.clone(),
            None => warn!(
                work_id = %job.id,
                process_id = %process_id,
                "工作项统计引用了不存在的进程, 忽略该条目"
            ),
        }
    }
}

fn copy_driver_totals(job: &mut ManagedWork, report: &DriverStatusReport) {
    let mut totals = report.totals.clone();
    totals.unassigned = report.work_items_pending_assignment;
    if let Some(driver) = job.driver.as_mut() {
        for process in driver.processes.iter_mut() {
            process.work_items = totals.clone();
        }
    }

    let info = &mut job.scheduling_info;
    info.work_items_total = report.work_items_total;
    info.work_items_done = report.work_items_done;
    info.work_items_error = report.work_items_error;
    info.work_items_lost = report.work_items_lost;
    info.work_items_dispatched = report.work_items_dispatched;
    info.work_items_pending_assignment = report.work_items_pending_assignment;
    job.timing = report.timing.clone();
}

/// 能力过剩时逐个释放未在处理工作项的进程，每次释放后重新评估
fn deallocate_idle_processes(job: &mut ManagedWork, report: &DriverStatusReport, pass: &mut Pass) {
    if !report.is_deallocatable() {
        return;
    }
    for process_id in job.processes.ids() {
        if !is_excess_capacity(job, Some(report)) {
            break;
        }
        let Some(process) = job.processes.get_mut(&process_id) else {
            continue;
        };
        if process.is_deallocated() {
            continue;
        }
        let operating = process
            .location()
            .is_some_and(|location| report.is_operating(&location));
        if !operating && process.deallocate(DeallocationReason::Voluntary) {
            info!(work_id = %job.id, process_id = %process_id, "释放空闲进程");
            pass.changed();
        }
    }
}

fn deallocate_killed_processes(job: &mut ManagedWork, report: &DriverStatusReport, pass: &mut Pass) {
    for process_id in &report.kill_list {
        match job.processes.get_mut(process_id) {
            Some(process) => {
                if process.deallocate(DeallocationReason::Exception) {
                    info!(work_id = %job.id, process_id = %process_id, "释放驱动要求终止的进程");
                    pass.changed();
                }
            }
            None => warn!(work_id = %job.id, process_id = %process_id, "终止列表中的进程不在进程表中"),
        }
    }
}
