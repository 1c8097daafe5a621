mod common;

use common::Harness;
use orchestrator_domain::{
    CompletionType, DeallocationReason, DriverState, JobState, ProcessId, ProcessWorkItems,
    ResourceState,
};
use orchestrator_testing_utils::{
    process_ids, test_location, DriverReportBuilder, ManagedWorkBuilder,
};

#[tokio::test]
async fn test_zero_work_items_completes_regardless_of_prior_state() {
    let states = [
        JobState::Received,
        JobState::WaitingForDriver,
        JobState::WaitingForResources,
        JobState::Completing,
    ];
    let records = states
        .iter()
        .enumerate()
        .map(|(i, state)| ManagedWorkBuilder::new(i as u64 + 1).with_state(*state).build_job())
        .collect();
    let harness = Harness::with_records(records).await;

    for id in 1..=states.len() as u64 {
        let report = DriverReportBuilder::new(id, DriverState::Running)
            .with_work_items(0, 0)
            .build();
        harness.engine.reconcile_driver_status(&report).await;

        let job = harness.managed(id).await;
        assert_eq!(job.state, JobState::Completed, "job {id}");
        assert_eq!(job.completion.completion_type(), CompletionType::NoWorkItemsFound);
        assert_eq!(
            job.completion.rationale().text(),
            Some("job driver had no work items to process")
        );
        assert!(job.standard_info.date_of_completion.is_some());
    }
}

#[tokio::test]
async fn test_zero_work_items_waits_for_live_processes() {
    let ids = process_ids(1, 2);
    let harness = Harness::with_records(vec![ManagedWorkBuilder::new(1)
        .with_state(JobState::Running)
        .with_worker(ids[0])
        .with_worker(ids[1])
        .build_job()])
    .await;

    let report = DriverReportBuilder::new(1, DriverState::Running).build();
    harness.engine.reconcile_driver_status(&report).await;

    let job = harness.managed(1).await;
    assert_eq!(job.state, JobState::Completing);
    assert!(job
        .processes
        .iter()
        .all(|p| p.deallocation_reason == DeallocationReason::JobCanceled));
}

#[tokio::test]
async fn test_driver_states_drive_job_forward() {
    let harness = Harness::with_records(vec![
        ManagedWorkBuilder::new(1)
            .with_state(JobState::WaitingForDriver)
            .build_job(),
        ManagedWorkBuilder::new(2)
            .with_state(JobState::WaitingForDriver)
            .with_service_dependencies(&["svc://db"])
            .build_job(),
    ])
    .await;

    for id in [1, 2] {
        let report = DriverReportBuilder::new(id, DriverState::Initializing)
            .with_work_items(10, 0)
            .build();
        harness.engine.reconcile_driver_status(&report).await;
    }

    assert_eq!(harness.managed(1).await.state, JobState::WaitingForResources);
    assert_eq!(harness.managed(2).await.state, JobState::WaitingForServices);
}

#[tokio::test]
async fn test_driver_failed_cancels_job() {
    let harness = Harness::with_records(vec![ManagedWorkBuilder::new(1)
        .with_state(JobState::WaitingForResources)
        .build_job()])
    .await;

    let report = DriverReportBuilder::new(1, DriverState::Failed)
        .with_work_items(10, 0)
        .with_completion(CompletionType::CanceledByDriver, "driver initialization failed")
        .build();
    harness.engine.reconcile_driver_status(&report).await;

    let job = harness.managed(1).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.completion.completion_type(), CompletionType::CanceledByDriver);
    assert_eq!(
        job.completion.rationale().text(),
        Some("driver initialization failed")
    );
}

#[tokio::test]
async fn test_kill_job_while_waiting_for_services_appends_reason() {
    let harness = Harness::with_records(vec![ManagedWorkBuilder::new(1)
        .with_state(JobState::WaitingForServices)
        .with_service_dependencies(&["svc://db"])
        .build_job()])
    .await;

    let report = DriverReportBuilder::new(1, DriverState::Running)
        .with_work_items(10, 0)
        .with_kill_job("dependency timeout")
        .build();
    harness.engine.reconcile_driver_status(&report).await;

    let job = harness.managed(1).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.completion.completion_type(), CompletionType::CanceledByDriver);
    assert_eq!(
        job.completion.rationale().text(),
        Some("dependency timeout: waiting for services")
    );
}

#[tokio::test]
async fn test_driver_completed_classifies_end_cause() {
    let cases = [
        (0, 0, CompletionType::EndOfJob),
        (3, 2, CompletionType::Error),
        (0, 2, CompletionType::Lost),
    ];
    let records = (1..=cases.len() as u64)
        .map(|id| {
            ManagedWorkBuilder::new(id)
                .with_state(JobState::Running)
                .with_driver_process(ProcessId::new(0))
                .build_job()
        })
        .collect();
    let harness = Harness::with_records(records).await;

    for (i, (errors, lost, expected)) in cases.iter().enumerate() {
        let id = i as u64 + 1;
        let report = DriverReportBuilder::new(id, DriverState::Completed)
            .with_work_items(10, 10 - errors - lost)
            .with_errors(*errors)
            .with_lost(*lost)
            .with_completion(CompletionType::EndOfJob, "done")
            .build();
        harness.engine.reconcile_driver_status(&report).await;

        let job = harness.managed(id).await;
        assert_eq!(job.completion.completion_type(), *expected, "job {id}");
        assert_eq!(job.state, JobState::Completing);
        let driver = job.driver.as_ref().unwrap();
        assert!(driver
            .processes
            .iter()
            .all(|p| p.deallocation_reason == DeallocationReason::Voluntary));
    }

    assert_eq!(
        harness.managed(2).await.completion.rationale().text(),
        Some("state manager detected error work items=3")
    );
}

#[tokio::test]
async fn test_callback_url_and_deployable_added_once() {
    let harness = Harness::with_records(vec![ManagedWorkBuilder::new(1)
        .with_state(JobState::WaitingForDriver)
        .build_job()])
    .await;

    let report = DriverReportBuilder::new(1, DriverState::Running)
        .with_work_items(10, 0)
        .with_callback("node1", 8080)
        .with_analysis_engine("desc/AE.xml")
        .build();
    harness.engine.reconcile_driver_status(&report).await;
    harness.engine.reconcile_driver_status(&report).await;

    let job = harness.managed(1).await;
    assert_eq!(
        job.command_line.options,
        vec!["-DJdURL=http://node1:8080/jdApp".to_string()]
    );
    assert_eq!(job.command_line.arguments, vec!["desc/AE.xml".to_string()]);
    assert!(job.jd_url_specified);
    assert!(job.dd_specified);
}

#[tokio::test]
async fn test_idle_processes_released_only_while_capacity_is_excess() {
    let ids = process_ids(1, 3);
    let harness = Harness::with_records(vec![ManagedWorkBuilder::new(1)
        .with_state(JobState::Running)
        .with_threads_per_share(4)
        .with_worker(ids[0])
        .with_worker(ids[1])
        .with_worker(ids[2])
        .build_job()])
    .await;

    // capacity 12, todo 5 -> 8；第一个进程正在处理工作项
    let report = DriverReportBuilder::new(1, DriverState::Running)
        .with_work_items(100, 95)
        .with_operating(test_location(&ids[0]))
        .build();
    harness.engine.reconcile_driver_status(&report).await;

    let job = harness.managed(1).await;
    let states: Vec<ResourceState> = ids
        .iter()
        .map(|id| job.processes.get(id).unwrap().resource_state)
        .collect();
    assert_eq!(
        states,
        vec![
            ResourceState::Allocated,
            ResourceState::Deallocated,
            ResourceState::Allocated
        ]
    );
    assert_eq!(
        job.processes.get(&ids[1]).unwrap().deallocation_reason,
        DeallocationReason::Voluntary
    );
}

#[tokio::test]
async fn test_no_idle_release_while_driver_pending() {
    let ids = process_ids(1, 2);
    let harness = Harness::with_records(vec![ManagedWorkBuilder::new(1)
        .with_state(JobState::Running)
        .with_worker(ids[0])
        .with_worker(ids[1])
        .build_job()])
    .await;

    let report = DriverReportBuilder::new(1, DriverState::Running)
        .with_work_items(100, 99)
        .pending()
        .build();
    harness.engine.reconcile_driver_status(&report).await;

    let job = harness.managed(1).await;
    assert_eq!(job.processes.allocated_count(), 2);
}

#[tokio::test]
async fn test_kill_list_deallocates_with_exception() {
    let ids = process_ids(1, 2);
    let harness = Harness::with_records(vec![ManagedWorkBuilder::new(1)
        .with_state(JobState::Running)
        .with_worker(ids[0])
        .with_worker(ids[1])
        .build_job()])
    .await;

    let report = DriverReportBuilder::new(1, DriverState::Running)
        .with_work_items(100, 0)
        .with_kill_list(&[ids[1], ProcessId::new(99)])
        .build();
    harness.engine.reconcile_driver_status(&report).await;

    let job = harness.managed(1).await;
    assert!(!job.processes.get(&ids[0]).unwrap().is_deallocated());
    let killed = job.processes.get(&ids[1]).unwrap();
    assert!(killed.is_deallocated());
    assert_eq!(killed.deallocation_reason, DeallocationReason::Exception);
}

#[tokio::test]
async fn test_unknown_process_work_items_entry_is_skipped() {
    let known = ProcessId::new(1);
    let harness = Harness::with_records(vec![ManagedWorkBuilder::new(1)
        .with_state(JobState::WaitingForDriver)
        .with_worker(known)
        .build_job()])
    .await;

    let mut report = DriverReportBuilder::new(1, DriverState::Running)
        .with_work_items(10, 0)
        .with_callback("node1", 8080)
        .build();
    let counted = ProcessWorkItems {
        dispatch: 2,
        ..ProcessWorkItems::default()
    };
    report.process_work_items.insert(known, counted.clone());
    report
        .process_work_items
        .insert(ProcessId::new(7), ProcessWorkItems::default());
    harness.engine.reconcile_driver_status(&report).await;

    let job = harness.managed(1).await;
    assert_eq!(job.state, JobState::WaitingForResources);
    assert_eq!(
        job.command_line.options,
        vec!["-DJdURL=http://node1:8080/jdApp".to_string()]
    );
    assert_eq!(job.processes.get(&known).unwrap().work_items, counted);
    assert!(!job.processes.contains(&ProcessId::new(7)));
    assert_eq!(harness.checkpoint.save_count(), 1);
}

#[tokio::test]
async fn test_unknown_process_entry_does_not_block_completion() {
    let harness = Harness::with_records(vec![ManagedWorkBuilder::new(1)
        .with_state(JobState::WaitingForDriver)
        .build_job()])
    .await;

    let mut report = DriverReportBuilder::new(1, DriverState::Running)
        .with_work_items(0, 0)
        .build();
    report
        .process_work_items
        .insert(ProcessId::new(7), ProcessWorkItems::default());
    harness.engine.reconcile_driver_status(&report).await;

    let job = harness.managed(1).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.completion.completion_type(), CompletionType::NoWorkItemsFound);
}

#[tokio::test]
async fn test_report_for_unknown_work_is_ignored() {
    let harness = Harness::new();
    let report = DriverReportBuilder::new(42, DriverState::Running)
        .with_work_items(10, 0)
        .build();
    harness.engine.reconcile_driver_status(&report).await;

    assert!(harness.engine.get(&orchestrator_domain::WorkId(42)).await.is_none());
    assert_eq!(harness.checkpoint.save_count(), 0);
}

#[tokio::test]
async fn test_driver_totals_copied_to_record() {
    let harness = Harness::with_records(vec![ManagedWorkBuilder::new(1)
        .with_state(JobState::Running)
        .with_driver_process(ProcessId::new(0))
        .build_job()])
    .await;

    let mut report = DriverReportBuilder::new(1, DriverState::Running)
        .with_work_items(50, 20)
        .with_errors(1)
        .with_pending_assignment(4)
        .build();
    report.totals.done = 20;
    harness.engine.reconcile_driver_status(&report).await;

    let job = harness.managed(1).await;
    assert_eq!(job.scheduling_info.work_items_total, 50);
    assert_eq!(job.scheduling_info.work_items_done, 20);
    assert_eq!(job.scheduling_info.work_items_error, 1);
    let driver_process = job.driver.as_ref().unwrap().processes.iter().next().unwrap();
    assert_eq!(driver_process.work_items.done, 20);
    assert_eq!(driver_process.work_items.unassigned, 4);
}
