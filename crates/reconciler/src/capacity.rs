//! 作业处理能力评估
//!
//! 剩余工作项按每份额线程数向上取整；调整后的待处理量小于现有处理能力即为能力过剩。

use orchestrator_domain::{DriverStatusReport, ManagedWork};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityAssessment {
    pub capacity: u64,
    pub todo: u64,
    pub num_shares: u64,
    pub adjusted_todo: u64,
}

impl CapacityAssessment {
    pub fn is_excess(&self) -> bool {
        self.capacity > 0 && self.adjusted_todo < self.capacity
    }
}

pub fn assess_capacity(
    capacity: u64,
    total: u64,
    done: u64,
    error: u64,
    lost: u64,
    threads_per_share: u64,
) -> CapacityAssessment {
    let tps = threads_per_share.max(1);
    let todo = total
        .saturating_sub(done)
        .saturating_sub(error)
        .saturating_sub(lost);
    let num_shares = todo.div_ceil(tps);
    CapacityAssessment {
        capacity,
        todo,
        num_shares,
        adjusted_todo: num_shares * tps,
    }
}

/// 根据驱动报告判断作业是否能力过剩；没有报告时视为不过剩
pub fn is_excess_capacity(work: &ManagedWork, report: Option<&DriverStatusReport>) -> bool {
    let Some(report) = report else {
        debug!(work_id = %work.id, "没有驱动报告, 不判定为能力过剩");
        return false;
    };
    let assessment = assess_capacity(
        work.work_item_capacity(),
        report.work_items_total,
        report.work_items_done,
        report.work_items_error,
        report.work_items_lost,
        u64::from(work.scheduling_info.threads_per_share),
    );
    let excess = assessment.is_excess();
    debug!(
        work_id = %work.id,
        todo = assessment.todo,
        adjusted_todo = assessment.adjusted_todo,
        capacity = assessment.capacity,
        excess,
        "能力评估"
    );
    excess
}
