//! 资源管理器分配状态协调

use tracing::{debug, info, trace, warn};

use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{
    reservation_transition, CompletionType, DeallocationReason, DriverStatusReport, Effect,
    JobEvent, JobState, ManagedWork, Process, ProcessState, Rationale, ReservationEvent,
    ReservationState, ReservationWork, ReservedShare, ResourceMap, ResourceStateReport, RmJobState,
    WorkId, WorkKind, WorkMapState, WorkRecord,
};

use crate::capacity::is_excess_capacity;
use crate::completion::set_completion_if_undefined;
use crate::engine::{apply_job_event, Pass, PassSource, ReconciliationEngine};

impl ReconciliationEngine {
    /// 合并资源管理器报告的分配视图
    pub async fn reconcile_resources(&self, report: &ResourceStateReport) {
        trace!(size = report.len(), "协调资源分配");
        let mut pass = Pass::new(PassSource::ResourceManager);
        {
            let mut state = self.work_map.lock().await;
            for (work_id, rm_state) in report {
                log_pending(*work_id, rm_state);
                if let Err(e) = self.apply_resource_state(&mut state, *work_id, rm_state, &mut pass) {
                    pass.entry_failed(work_id, &e);
                }
            }
        }
        self.finish_pass(pass).await;
    }

    fn apply_resource_state(
        &self,
        state: &mut WorkMapState,
        work_id: WorkId,
        rm_state: &RmJobState,
        pass: &mut Pass,
    ) -> OrchestratorResult<()> {
        let Some((record, latest)) = state.record_with_report_mut(&work_id) else {
            debug!(work_id = %work_id, "资源报告中的工作单元不存在");
            return Ok(());
        };
        let kind = record.kind();
        match record {
            WorkRecord::Job(work) | WorkRecord::Service(work) => {
                self.reconcile_managed(work, kind, latest, rm_state, pass);
            }
            WorkRecord::Reservation(reservation) => {
                self.reconcile_reservation(reservation, rm_state, pass);
            }
        }
        Ok(())
    }

    fn reconcile_managed(
        &self,
        work: &mut ManagedWork,
        kind: WorkKind,
        latest: Option<&DriverStatusReport>,
        rm_state: &RmJobState,
        pass: &mut Pass,
    ) {
        let purged = purge_processes(work, rm_state.resources.as_ref(), pass);
        self.add_processes(work, latest, rm_state.pending_additions.as_ref(), pass);
        remove_processes(work, rm_state.pending_removals.as_ref(), pass);

        match work.state {
            JobState::Received | JobState::WaitingForDriver => {
                warn!(work_id = %work.id, kind = %kind, state = ?work.state, "资源报告到达时状态异常");
            }
            JobState::WaitingForServices => {
                debug!(work_id = %work.id, kind = %kind, state = ?work.state, "资源报告到达时状态异常");
            }
            JobState::WaitingForResources => {
                if rm_state.refused {
                    refuse(work, kind, rm_state, pass);
                }
                if !work.processes.is_empty() {
                    if apply_job_event(work, kind, JobEvent::ResourcesAssigned, pass).is_some() {
                        info!(work_id = %work.id, resources = work.processes.len(), "已分配资源");
                    }
                }
                complete_if_purged(work, kind, purged, rm_state, pass);
            }
            JobState::Assigned | JobState::Initializing | JobState::Running => {
                if work.processes.is_empty() {
                    if apply_job_event(work, kind, JobEvent::ResourcesEmptied, pass).is_some() {
                        info!(work_id = %work.id, "资源已全部收回");
                    }
                }
                complete_if_purged(work, kind, purged, rm_state, pass);
            }
            JobState::Completing | JobState::Completed => {
                debug!(work_id = %work.id, state = ?work.state, "工作单元已在完成阶段");
            }
        }
    }

    /// 为新分配的资源创建进程；作业已在完成阶段或能力过剩时立即释放
    fn add_processes(
        &self,
        work: &mut ManagedWork,
        latest: Option<&DriverStatusReport>,
        additions: Option<&ResourceMap>,
        pass: &mut Pass,
    ) {
        let Some(additions) = additions else {
            debug!(work_id = %work.id, "没有待添加的资源");
            return;
        };
        for (process_id, resource) in additions {
            if work.processes.contains(process_id) {
                warn!(
                    work_id = %work.id,
                    process_id = %process_id,
                    node = %resource.node,
                    "资源已存在, 忽略重复添加"
                );
                continue;
            }
            let mut process = Process::new(
                *process_id,
                work.id,
                resource.node.clone(),
                work.deployment.process_type(),
            );
            process.shares = resource.shares;
            self.process_index.add_process(*process_id, work.id);
            work.processes.add(process);
            info!(
                work_id = %work.id,
                process_id = %process_id,
                unique = %process_id.unique,
                node = %resource.node,
                "资源已添加"
            );
            pass.changed();

            let unnecessary = if work.state.is_finished() {
                Some("作业已在完成阶段")
            } else if is_excess_capacity(work, latest) {
                Some("作业处理能力过剩")
            } else {
                None
            };
            if let Some(why) = unnecessary {
                if let Some(process) = work.processes.get_mut(process_id) {
                    process.deallocate(DeallocationReason::Voluntary);
                    process.advance_state(ProcessState::Stopped);
                }
                warn!(work_id = %work.id, process_id = %process_id, "{}, 立即释放新分配的资源", why);
            }
        }
    }

    fn reconcile_reservation(
        &self,
        reservation: &mut ReservationWork,
        rm_state: &RmJobState,
        pass: &mut Pass,
    ) {
        add_reserved_shares(reservation, rm_state.pending_additions.as_ref(), pass);
        remove_reserved_shares(reservation, rm_state.pending_removals.as_ref(), pass);

        let id = reservation.id;
        match reservation.state {
            ReservationState::Received => {
                warn!(work_id = %id, state = ?reservation.state, "资源报告到达时状态异常");
            }
            ReservationState::WaitingForResources => {
                if rm_state.refused {
                    let job_driver_class = reservation.scheduling_info.scheduling_class.trim()
                        == self.config.job_driver_scheduling_class;
                    if job_driver_class {
                        if self.first_ignored_refusal() {
                            warn!(work_id = %id, reason = rm_state.reason_text(), "作业驱动预留的拒绝被忽略");
                        }
                    } else if apply_reservation_event(
                        reservation,
                        ReservationEvent::Refused { job_driver_class },
                        pass,
                    ) {
                        set_reservation_completion(
                            reservation,
                            CompletionType::ResourcesUnavailable,
                            Rationale::new(format!(
                                "resource manager refused allocation: {}",
                                rm_state.reason_text()
                            )),
                            pass,
                        );
                        warn!(work_id = %id, reason = rm_state.reason_text(), "资源分配被拒绝");
                        return;
                    }
                }
                match &rm_state.resources {
                    Some(resources) if !resources.is_empty() => {
                        if apply_reservation_event(reservation, ReservationEvent::Granted, pass) {
                            info!(work_id = %id, resources = resources.len(), "预留已分配资源");
                        }
                    }
                    Some(_) => {}
                    None => info!(work_id = %id, "等待资源, 报告中没有资源"),
                }
            }
            ReservationState::Assigned => match &rm_state.resources {
                Some(resources) if resources.is_empty() => {
                    if apply_reservation_event(reservation, ReservationEvent::Emptied, pass) {
                        info!(work_id = %id, "预留资源已全部收回");
                    }
                }
                Some(_) => {}
                None => info!(work_id = %id, "已分配状态下报告中没有资源"),
            },
            ReservationState::Completed => {
                debug!(work_id = %id, "预留已完成");
            }
        }
    }
}

fn log_pending(work_id: WorkId, rm_state: &RmJobState) {
    for (label, map) in [
        ("pending additions", &rm_state.pending_additions),
        ("pending removals", &rm_state.pending_removals),
    ] {
        match map {
            Some(map) if !map.is_empty() => info!(work_id = %work_id, size = map.len(), "{}", label),
            Some(_) => trace!(work_id = %work_id, size = 0, "{}", label),
            None => {}
        }
    }
}

/// 清除标记为 purged 的资源对应的进程，返回清除数量
fn purge_processes(work: &mut ManagedWork, resources: Option<&ResourceMap>, pass: &mut Pass) -> usize {
    let Some(resources) = resources else {
        return 0;
    };
    let mut purged = 0;
    for resource in resources.values().filter(|resource| resource.purged) {
        let Some(process) = work.processes.get_mut(&resource.id) else {
            debug!(work_id = %work.id, process_id = %resource.id, "被清除的资源没有对应进程");
            continue;
        };
        if process.is_defunct() {
            continue;
        }
        info!(
            work_id = %work.id,
            process_id = %resource.id,
            resource_state = ?process.resource_state,
            process_state = ?process.process_state,
            "清除进程"
        );
        process.deallocate(DeallocationReason::Purged);
        process.advance_state(ProcessState::Stopped);
        purged += 1;
        pass.changed();
    }
    purged
}

/// 资源管理器收回的资源以 Forced 原因释放，进程条目保留
fn remove_processes(work: &mut ManagedWork, removals: Option<&ResourceMap>, pass: &mut Pass) {
    let Some(removals) = removals else {
        debug!(work_id = %work.id, "没有待移除的资源");
        return;
    };
    for (process_id, resource) in removals {
        match work.processes.get_mut(process_id) {
            Some(process) => {
                if process.deallocate(DeallocationReason::Forced) {
                    info!(work_id = %work.id, process_id = %process_id, node = %resource.node, "资源已收回");
                    pass.changed();
                }
            }
            None => {
                info!(work_id = %work.id, process_id = %process_id, node = %resource.node, "待收回的资源不存在");
            }
        }
    }
}

fn refuse(work: &mut ManagedWork, kind: WorkKind, rm_state: &RmJobState, pass: &mut Pass) {
    let Some(transition) = apply_job_event(work, kind, JobEvent::ResourcesRefused, pass) else {
        return;
    };
    set_completion_if_undefined(
        work,
        CompletionType::ResourcesUnavailable,
        Rationale::new(format!(
            "resource manager refused allocation: {}",
            rm_state.reason_text()
        )),
        pass,
    );
    warn!(work_id = %work.id, reason = rm_state.reason_text(), "资源分配被拒绝");
    for process in work.processes.iter_mut().filter(|p| !p.is_deallocated()) {
        process.deallocate(DeallocationReason::Voluntary);
        process.advance_state(ProcessState::Stopped);
        warn!(
            work_id = %process.work_id,
            process_id = %process.id,
            "分配已被拒绝, 释放同一报告中的资源"
        );
        pass.changed();
    }
    pass.changed_if(work.stamp_shutdown_if_drained(pass.now));
    if transition.has_effect(Effect::RecordUserLog) {
        pass.user_log(work, rm_state.reason_text());
    }
}

/// 服务的资源被清除且没有存活进程时，以 ResourcesUnavailable 完成
fn complete_if_purged(
    work: &mut ManagedWork,
    kind: WorkKind,
    purged: usize,
    rm_state: &RmJobState,
    pass: &mut Pass,
) {
    if kind != WorkKind::Service || purged == 0 || work.live_process_count() > 0 {
        return;
    }
    let Some(transition) = apply_job_event(work, kind, JobEvent::ResourcesPurged, pass) else {
        return;
    };
    set_completion_if_undefined(
        work,
        CompletionType::ResourcesUnavailable,
        Rationale::new(format!(
            "resource manager purged allocation: {}",
            rm_state.reason_text()
        )),
        pass,
    );
    pass.changed_if(work.stamp_shutdown_if_drained(pass.now));
    warn!(work_id = %work.id, reason = rm_state.reason_text(), "服务资源已被清除");
    if transition.has_effect(Effect::RecordUserLog) {
        pass.user_log(work, rm_state.reason_text());
    }
}

fn apply_reservation_event(
    reservation: &mut ReservationWork,
    event: ReservationEvent,
    pass: &mut Pass,
) -> bool {
    let Some(transition) = reservation_transition(reservation.state, event) else {
        return false;
    };
    info!(
        work_id = %reservation.id,
        "预留状态变更: {:?} -> {:?} ({:?})",
        reservation.state,
        transition.next,
        event
    );
    reservation.state = transition.next;
    pass.changed();
    if transition.has_effect(Effect::StampCompletionDate) {
        pass.changed_if(reservation.standard_info.stamp_completion(pass.now));
    }
    true
}

fn set_reservation_completion(
    reservation: &mut ReservationWork,
    completion_type: CompletionType,
    rationale: Rationale,
    pass: &mut Pass,
) {
    pass.changed_if(reservation.completion.set_if_undefined(completion_type, rationale));
}

fn add_reserved_shares(reservation: &mut ReservationWork, additions: Option<&ResourceMap>, pass: &mut Pass) {
    let Some(additions) = additions else {
        return;
    };
    for (id, resource) in additions {
        if reservation.reservations.contains_key(id) {
            debug!(work_id = %reservation.id, process_id = %id, node = %resource.node, "重复的预留资源");
            continue;
        }
        reservation.reservations.insert(
            *id,
            ReservedShare {
                id: *id,
                node: resource.node.clone(),
                shares: resource.shares,
            },
        );
        info!(work_id = %reservation.id, process_id = %id, node = %resource.node, "添加预留资源");
        pass.changed();
    }
}

fn remove_reserved_shares(reservation: &mut ReservationWork, removals: Option<&ResourceMap>, pass: &mut Pass) {
    let Some(removals) = removals else {
        return;
    };
    for (id, resource) in removals {
        if reservation.reservations.remove(id).is_some() {
            info!(work_id = %reservation.id, process_id = %id, node = %resource.node, "移除预留资源");
            pass.changed();
        } else {
            debug!(work_id = %reservation.id, process_id = %id, node = %resource.node, "待移除的预留资源不存在");
        }
    }
}
