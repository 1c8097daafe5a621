//! 完成与释放策略

use tracing::{debug, info, warn};

use orchestrator_domain::{
    CompletionType, DeallocationReason, Effect, JobEvent, JobState, ManagedWork, Rationale,
    WorkKind,
};

use crate::engine::{apply_job_event, Pass};

/// 释放工作进程和驱动进程，返回实际释放的数量
pub(crate) fn release_all(work: &mut ManagedWork, reason: DeallocationReason) -> usize {
    let mut released = work.processes.deallocate_all(reason);
    if let Some(driver) = work.driver.as_mut() {
        released += driver.processes.deallocate_all(reason);
    }
    released
}

pub(crate) fn release_driver(work: &mut ManagedWork, reason: DeallocationReason) -> usize {
    work.driver
        .as_mut()
        .map(|driver| driver.processes.deallocate_all(reason))
        .unwrap_or(0)
}

/// 仅在尚未设置时写入完成类型
pub(crate) fn set_completion_if_undefined(
    work: &mut ManagedWork,
    completion_type: CompletionType,
    rationale: Rationale,
    pass: &mut Pass,
) {
    let current = work.completion.completion_type();
    if work.completion.set_if_undefined(completion_type, rationale) {
        debug!(work_id = %work.id, "完成类型: {:?} -> {:?}", current, completion_type);
        pass.changed();
    } else {
        debug!(work_id = %work.id, "完成类型保持 {:?}, 忽略 {:?}", current, completion_type);
    }
}

/// 根据工作项统计分类：错误优先，其次丢失，否则采用给定类型
pub(crate) fn classify_by_work_items(
    work: &ManagedWork,
    otherwise: CompletionType,
    rationale: Rationale,
) -> (CompletionType, Rationale) {
    let errors = work.scheduling_info.work_items_error;
    let lost = work.scheduling_info.work_items_lost;
    if errors > 0 {
        (
            CompletionType::Error,
            Rationale::new(format!("state manager detected error work items={errors}")),
        )
    } else if lost > 0 {
        (
            CompletionType::Lost,
            Rationale::new(format!("state manager detected lost work items={lost}")),
        )
    } else {
        (otherwise, rationale)
    }
}

/// 终止未完成的工作单元：进入 Completing，写入完成类型，释放全部进程，无存活进程时完成
pub(crate) fn terminate(
    work: &mut ManagedWork,
    kind: WorkKind,
    completion_type: CompletionType,
    rationale: Rationale,
    reason: DeallocationReason,
    pass: &mut Pass,
) {
    let release = match apply_job_event(work, kind, JobEvent::Terminate, pass) {
        Some(transition) => transition.has_effect(Effect::ReleaseProcesses),
        None if work.state.is_completed() => {
            debug!(work_id = %work.id, "已完成, 忽略终止请求");
            return;
        }
        None => {
            debug!(work_id = %work.id, state = ?work.state, "已在完成中");
            true
        }
    };
    info!(
        work_id = %work.id,
        completion = ?completion_type,
        reason = ?reason,
        "终止工作单元"
    );
    set_completion_if_undefined(work, completion_type, rationale, pass);
    if release {
        pass.changes += release_all(work, reason);
    }
    advance_to_completed(work, kind, pass);
}

/// 完成策略：完成类型未定时按失败、工作项统计、给定类型的顺序确定，
/// 记录完成时间，存活进程为零时进入 Completing
pub(crate) fn complete(
    work: &mut ManagedWork,
    kind: WorkKind,
    proposed: CompletionType,
    rationale: Rationale,
    pass: &mut Pass,
) {
    if work.completion.is_undefined() {
        let failures = work.process_failure_count();
        let init_failures = work.process_init_failure_count();
        let (completion_type, rationale) = if failures > 0 {
            debug!(work_id = %work.id, failures, "存在进程失败");
            (
                CompletionType::Warning,
                Rationale::new("process failure(s) occurred"),
            )
        } else if init_failures > 0 {
            debug!(work_id = %work.id, init_failures, "存在进程初始化失败");
            (
                CompletionType::Warning,
                Rationale::new("process initialization failure(s) occurred"),
            )
        } else {
            classify_by_work_items(work, proposed, rationale)
        };
        set_completion_if_undefined(work, completion_type, rationale, pass);
    }
    pass.changed_if(work.standard_info.stamp_completion(pass.now));
    advance_to_completing(work, kind, pass);
}

/// 托管预留（只有一个普通进程的服务）以进程退出码完成
pub(crate) fn complete_managed_reservation(work: &mut ManagedWork, kind: WorkKind, pass: &mut Pass) {
    let size = work.processes.len();
    let exit_code = if size == 1 {
        work.processes.iter().next().and_then(|process| process.exit_code)
    } else {
        None
    };
    match (size, exit_code) {
        (1, Some(code)) => {
            set_completion_if_undefined(
                work,
                CompletionType::ProgramExit,
                Rationale::new(format!("code={code}")),
                pass,
            );
            pass.changed_if(work.standard_info.stamp_completion(pass.now));
            advance_to_completing(work, kind, pass);
        }
        _ => {
            warn!(work_id = %work.id, size, "托管预留进程数或退出码异常");
            complete(
                work,
                kind,
                CompletionType::EndOfJob,
                Rationale::new("state manager reported no viable service process exists, type=Pop"),
                pass,
            );
        }
    }
}

/// 没有存活进程时进入 Completing
pub(crate) fn advance_to_completing(work: &mut ManagedWork, kind: WorkKind, pass: &mut Pass) {
    if work.state.is_finished() {
        return;
    }
    if work.live_process_count() == 0 {
        apply_job_event(work, kind, JobEvent::BeginCompleting, pass);
    } else {
        debug!(
            work_id = %work.id,
            live = work.live_process_count(),
            "仍有存活进程, 等待节点报告"
        );
    }
}

/// Completing 状态下没有存活进程时完成
pub(crate) fn advance_to_completed(work: &mut ManagedWork, kind: WorkKind, pass: &mut Pass) {
    if work.state != JobState::Completing || work.live_process_count() != 0 {
        return;
    }
    pass.changed_if(work.stamp_shutdown_if_drained(pass.now));
    apply_job_event(work, kind, JobEvent::Drained, pass);
}
