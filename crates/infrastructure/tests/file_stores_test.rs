use std::sync::Arc;

use orchestrator_domain::{
    CheckpointTrigger, HistoryStore, JobState, ProcessIndex, ReservationState, UserLogSink,
    WorkId, WorkKind, WorkMap, WorkRecord,
};
use orchestrator_infrastructure::{
    CheckpointSnapshot, FileHistoryStore, FileUserLogSink, InMemoryProcessIndex,
    JsonFileCheckpoint,
};
use orchestrator_testing_utils::{process_ids, ManagedWorkBuilder, ReservationBuilder};
use tempfile::TempDir;

#[tokio::test]
async fn test_checkpoint_round_trip_rebuilds_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state").join("orchestrator.ckpt.json");
    let ids = process_ids(1, 2);

    let work_map = Arc::new(WorkMap::new());
    work_map
        .submit(
            ManagedWorkBuilder::new(1)
                .with_state(JobState::Running)
                .with_worker(ids[0])
                .with_worker(ids[1])
                .build_job(),
        )
        .await
        .unwrap();
    work_map
        .submit(
            ReservationBuilder::new(2)
                .with_state(ReservationState::Assigned)
                .build(),
        )
        .await
        .unwrap();

    let checkpoint = JsonFileCheckpoint::new(&path, work_map.clone());
    checkpoint.save_state().await.unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("tmp").exists());

    let restored_map = Arc::new(WorkMap::new());
    let index = InMemoryProcessIndex::new();
    let restored = JsonFileCheckpoint::new(&path, restored_map.clone())
        .restore(&index)
        .await
        .unwrap();

    assert_eq!(restored, 2);
    assert_eq!(
        restored_map.get(&WorkId(1)).await,
        work_map.get(&WorkId(1)).await
    );
    assert_eq!(
        restored_map.get(&WorkId(2)).await,
        work_map.get(&WorkId(2)).await
    );
    assert_eq!(index.process_count(), 2);
    assert_eq!(index.work_id_of(&ids[1]), Some(WorkId(1)));
}

#[tokio::test]
async fn test_checkpoint_overwrites_previous_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("orchestrator.ckpt.json");
    let work_map = Arc::new(WorkMap::new());
    let checkpoint = JsonFileCheckpoint::new(&path, work_map.clone());

    checkpoint.save_state().await.unwrap();
    work_map
        .submit(ManagedWorkBuilder::new(7).build_service())
        .await
        .unwrap();
    checkpoint.save_state().await.unwrap();

    let snapshot: CheckpointSnapshot =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.records[0].kind(), WorkKind::Service);
}

#[tokio::test]
async fn test_restore_without_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let work_map = Arc::new(WorkMap::new());
    let checkpoint = JsonFileCheckpoint::new(dir.path().join("missing.json"), work_map.clone());

    let restored = checkpoint
        .restore(&InMemoryProcessIndex::new())
        .await
        .unwrap();
    assert_eq!(restored, 0);
    assert!(work_map.is_empty().await);
}

#[tokio::test]
async fn test_restore_rejects_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("orchestrator.ckpt.json");
    std::fs::write(&path, b"{not json").unwrap();

    let checkpoint = JsonFileCheckpoint::new(&path, Arc::new(WorkMap::new()));
    assert!(checkpoint
        .restore(&InMemoryProcessIndex::new())
        .await
        .is_err());
}

#[tokio::test]
async fn test_history_store_writes_one_file_per_record() {
    let dir = TempDir::new().unwrap();
    let store = FileHistoryStore::new(dir.path());

    let job = ManagedWorkBuilder::new(1)
        .with_state(JobState::Completed)
        .build_job();
    let reservation = ReservationBuilder::new(2)
        .with_state(ReservationState::Completed)
        .build();
    store.save(&job).await.unwrap();
    store.save(&reservation).await.unwrap();

    let job_path = dir.path().join("jobs").join("1.json");
    let archived: orchestrator_domain::ManagedWork =
        serde_json::from_slice(&std::fs::read(&job_path).unwrap()).unwrap();
    assert_eq!(WorkRecord::Job(archived), job);
    assert!(dir.path().join("reservations").join("2.json").exists());
    assert!(!dir.path().join("services").exists());
    assert_eq!(
        store.record_path(WorkKind::Service, WorkId(3)),
        dir.path().join("services").join("3.json")
    );
}

#[tokio::test]
async fn test_user_log_appends_lines() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("alice").join("1");
    let sink = FileUserLogSink::new();

    sink.record("alice", &log_dir, "resource manager refused allocation")
        .await
        .unwrap();
    sink.record("alice", &log_dir, "second line").await.unwrap();

    let contents = std::fs::read_to_string(sink.log_path(&log_dir)).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("alice resource manager refused allocation"));
    assert!(lines[1].ends_with("alice second line"));
}
