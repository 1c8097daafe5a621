//! 状态转换表
//!
//! 每张表都是 `(当前状态, 事件) -> Option<Transition>` 的纯函数，
//! 返回 `None` 表示该事件在当前状态下不产生转换。协调引擎负责执行转换附带的副作用。

use crate::entities::{JobState, ReservationState, WorkKind};

/// 转换附带的副作用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// 记录完成时间（只记录一次）
    StampCompletionDate,
    /// 写入用户日志
    RecordUserLog,
    /// 释放全部进程（工作进程和驱动进程）
    ReleaseProcesses,
    /// 仅释放驱动进程
    ReleaseDriverProcesses,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub next: S,
    pub effects: &'static [Effect],
}

impl<S> Transition<S> {
    const fn to(next: S) -> Self {
        Self { next, effects: &[] }
    }

    const fn with(next: S, effects: &'static [Effect]) -> Self {
        Self { next, effects }
    }

    pub fn has_effect(&self, effect: Effect) -> bool {
        self.effects.contains(&effect)
    }
}

/// 作业/服务状态机事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    DriverInitializing,
    /// 驱动报告 Running 或 Idle
    DriverRunning,
    DriverCompleting,
    DriverCompleted,
    ServicesAvailable,
    ServicesUnavailable,
    ResourcesRefused,
    ResourcesAssigned,
    ResourcesEmptied,
    /// 服务的资源被清除且没有存活进程
    ResourcesPurged,
    /// 外部终止信号
    Terminate,
    /// 完成策略：存活进程为零时进入 Completing
    BeginCompleting,
    /// Completing 状态下存活进程为零
    Drained,
}

/// 作业/服务状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobMachine {
    pub kind: WorkKind,
    pub has_service_dependencies: bool,
}

impl JobMachine {
    pub fn new(kind: WorkKind, has_service_dependencies: bool) -> Self {
        Self {
            kind,
            has_service_dependencies,
        }
    }

    /// 驱动就绪后的下一状态，没有服务依赖时跳过 WaitingForServices
    fn after_driver(&self) -> JobState {
        if self.has_service_dependencies {
            JobState::WaitingForServices
        } else {
            JobState::WaitingForResources
        }
    }

    pub fn transition(&self, state: JobState, event: JobEvent) -> Option<Transition<JobState>> {
        use JobEvent::*;
        use JobState::*;

        const COMPLETING_EFFECTS: &[Effect] = &[Effect::StampCompletionDate];
        const DRIVER_COMPLETED_EFFECTS: &[Effect] =
            &[Effect::ReleaseDriverProcesses, Effect::StampCompletionDate];
        const REFUSED_EFFECTS: &[Effect] = &[Effect::StampCompletionDate, Effect::RecordUserLog];
        const TERMINATE_EFFECTS: &[Effect] =
            &[Effect::StampCompletionDate, Effect::ReleaseProcesses];

        if state == Completed {
            return None;
        }

        match (state, event) {
            (WaitingForDriver, DriverInitializing | DriverRunning) => {
                Some(Transition::to(self.after_driver()))
            }
            (Assigned, DriverInitializing) => Some(Transition::to(Initializing)),
            (Assigned | Initializing, DriverRunning) => Some(Transition::to(Running)),
            (Completing, DriverCompleting) => None,
            (_, DriverCompleting) => Some(Transition::to(Completing)),
            (_, DriverCompleted) => Some(Transition::with(Completing, DRIVER_COMPLETED_EFFECTS)),

            (WaitingForServices, ServicesAvailable) => Some(Transition::to(WaitingForResources)),
            (WaitingForServices, ServicesUnavailable) => {
                Some(Transition::with(Completing, COMPLETING_EFFECTS))
            }

            (WaitingForResources, ResourcesRefused) => {
                Some(Transition::with(Completed, REFUSED_EFFECTS))
            }
            (WaitingForResources, ResourcesAssigned) => match self.kind {
                WorkKind::Service => Some(Transition::to(Initializing)),
                _ => Some(Transition::to(Assigned)),
            },
            (Assigned | Initializing | Running, ResourcesEmptied) => {
                Some(Transition::to(WaitingForResources))
            }
            (WaitingForResources | Assigned | Initializing | Running, ResourcesPurged)
                if self.kind == WorkKind::Service =>
            {
                Some(Transition::with(Completed, REFUSED_EFFECTS))
            }

            (Completing, Terminate) => None,
            (_, Terminate) => Some(Transition::with(Completing, TERMINATE_EFFECTS)),
            (Completing, BeginCompleting) => None,
            (_, BeginCompleting) => Some(Transition::to(Completing)),
            (Completing, Drained) => Some(Transition::with(Completed, COMPLETING_EFFECTS)),

            _ => None,
        }
    }
}

/// 预留状态机事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationEvent {
    Granted,
    /// 资源管理器拒绝分配；作业驱动调度类的预留忽略拒绝
    Refused { job_driver_class: bool },
    Emptied,
}

pub fn reservation_transition(
    state: ReservationState,
    event: ReservationEvent,
) -> Option<Transition<ReservationState>> {
    use ReservationState::*;

    const COMPLETED_EFFECTS: &[Effect] = &[Effect::StampCompletionDate];

    match (state, event) {
        (WaitingForResources, ReservationEvent::Refused { job_driver_class: false }) => {
            Some(Transition::with(Completed, COMPLETED_EFFECTS))
        }
        (WaitingForResources, ReservationEvent::Granted) => Some(Transition::to(Assigned)),
        (Assigned, ReservationEvent::Emptied) => {
            Some(Transition::with(Completed, COMPLETED_EFFECTS))
        }
        _ => None,
    }
}
