use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast;

use dataservice_core::{
    models::*, traits::DispatcherService, DataServiceResult, ErrorCode,
};
use dataservice_dispatcher::{
    test_utils::{dispatcher_config, new_dispatcher},
    Dispatcher, JobGarbageCollector,
};
use dataservice_domain::Update;
use dataservice_infrastructure::{journal_dir, FileJournalReader, JournalReader, RangeDatasetEngine};

async fn started_dispatcher() -> (
    Arc<Dispatcher>,
    Arc<dataservice_dispatcher::test_utils::MockWorkerClientFactory>,
) {
    let (dispatcher, factory) = new_dispatcher(dispatcher_config("", false));
    dispatcher.start().await.unwrap();
    (dispatcher, factory)
}

async fn register_range(dispatcher: &Dispatcher, stop: i64) -> i64 {
    dispatcher
        .get_or_register_dataset(GetOrRegisterDatasetRequest {
            dataset: RangeDatasetEngine::dataset_def(0, stop, 1),
        })
        .await
        .unwrap()
        .dataset_id
}

async fn heartbeat(
    dispatcher: &Dispatcher,
    worker_address: &str,
    current_tasks: Vec<i64>,
) -> DataServiceResult<WorkerHeartbeatResponse> {
    dispatcher
        .worker_heartbeat(WorkerHeartbeatRequest {
            worker_address: worker_address.to_string(),
            current_tasks,
        })
        .await
}

async fn read_journal(work_dir: &Path) -> Vec<Update> {
    let mut reader = FileJournalReader::new(journal_dir(work_dir));
    let mut updates = Vec::new();
    while let Some(update) = reader.read().await.unwrap() {
        updates.push(update);
    }
    updates
}

fn task_ids(tasks: &[TaskDef]) -> Vec<i64> {
    let mut ids: Vec<i64> = tasks.iter().map(|task| task.task_id).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_requests_before_start_are_unavailable() {
    let (dispatcher, _) = new_dispatcher(dispatcher_config("", false));

    let err = dispatcher
        .get_workers(GetWorkersRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unavailable);

    let err = heartbeat(&dispatcher, "w1:5051", vec![]).await.unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_fault_tolerance_requires_work_dir() {
    let (dispatcher, _) = new_dispatcher(dispatcher_config("", true));
    let err = dispatcher.start().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[tokio::test]
async fn test_dataset_registration_is_deduplicated() {
    let work_dir = TempDir::new().unwrap();
    let (dispatcher, _) = new_dispatcher(dispatcher_config(
        work_dir.path().to_str().unwrap(),
        true,
    ));
    dispatcher.start().await.unwrap();

    let mut on_cpu = RangeDatasetEngine::dataset_def(0, 10, 1);
    on_cpu.graph.nodes[0].device = "/device:CPU:0".to_string();
    let mut on_gpu = RangeDatasetEngine::dataset_def(0, 10, 1);
    on_gpu.graph.nodes[0].device = "/device:GPU:0".to_string();

    let first = dispatcher
        .get_or_register_dataset(GetOrRegisterDatasetRequest { dataset: on_cpu })
        .await
        .unwrap();
    let second = dispatcher
        .get_or_register_dataset(GetOrRegisterDatasetRequest { dataset: on_gpu })
        .await
        .unwrap();
    assert_eq!(first.dataset_id, 1000);
    assert_eq!(first.dataset_id, second.dataset_id);

    let other = register_range(&dispatcher, 11).await;
    assert_eq!(other, 1001);

    let registrations = read_journal(work_dir.path())
        .await
        .into_iter()
        .filter(|update| matches!(update, Update::RegisterDataset { .. }))
        .count();
    assert_eq!(registrations, 2);

    // 存储的是归一化后的定义
    let stored = dispatcher
        .get_dataset_def(GetDatasetDefRequest {
            dataset_id: first.dataset_id,
        })
        .await
        .unwrap();
    assert!(stored.dataset_def.graph.nodes[0].device.is_empty());
}

#[tokio::test]
async fn test_get_dataset_def_unknown_dataset() {
    let (dispatcher, _) = started_dispatcher().await;
    let err = dispatcher
        .get_dataset_def(GetDatasetDefRequest { dataset_id: 42 })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_concurrent_get_or_create_job_is_idempotent() {
    let (dispatcher, _) = started_dispatcher().await;
    let dataset_id = register_range(&dispatcher, 10).await;

    let request = GetOrCreateJobRequest {
        dataset_id,
        processing_mode: ProcessingMode::ParallelEpochs,
        job_name: "shared".to_string(),
        job_name_index: 0,
    };
    let results = join_all((0..10).map(|_| dispatcher.get_or_create_job(request.clone()))).await;

    let mut client_ids: Vec<i64> = results
        .into_iter()
        .map(|result| result.unwrap().job_client_id)
        .collect();
    client_ids.sort();
    client_ids.dedup();
    assert_eq!(client_ids.len(), 10);

    let state = dispatcher.state().await;
    let jobs = state.list_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].num_clients, 10);
    for client_id in client_ids {
        assert_eq!(state.job_for_job_client_id(client_id).unwrap().job_id, jobs[0].job_id);
    }

    // 同名不同index是另一个作业
    dispatcher
        .get_or_create_job(GetOrCreateJobRequest {
            job_name_index: 1,
            ..request.clone()
        })
        .await
        .unwrap();
    assert_eq!(dispatcher.state().await.list_jobs().len(), 2);
}

#[tokio::test]
async fn test_get_or_create_job_rejects_mismatch() {
    let (dispatcher, _) = started_dispatcher().await;
    let dataset_id = register_range(&dispatcher, 10).await;
    let other_dataset_id = register_range(&dispatcher, 20).await;

    let request = GetOrCreateJobRequest {
        dataset_id,
        processing_mode: ProcessingMode::ParallelEpochs,
        job_name: "train".to_string(),
        job_name_index: 0,
    };
    dispatcher.get_or_create_job(request.clone()).await.unwrap();

    let err = dispatcher
        .get_or_create_job(GetOrCreateJobRequest {
            processing_mode: ProcessingMode::DistributedEpoch,
            ..request.clone()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FailedPrecondition);

    let err = dispatcher
        .get_or_create_job(GetOrCreateJobRequest {
            dataset_id: other_dataset_id,
            ..request.clone()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FailedPrecondition);

    let err = dispatcher
        .get_or_create_job(GetOrCreateJobRequest {
            job_name: String::new(),
            ..request
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[tokio::test]
async fn test_create_job_unknown_dataset() {
    let (dispatcher, _) = started_dispatcher().await;
    let err = dispatcher
        .create_job(CreateJobRequest {
            dataset_id: 1234,
            processing_mode: ProcessingMode::ParallelEpochs,
        })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(dispatcher.state().await.list_jobs().is_empty());
}

#[tokio::test]
async fn test_heartbeat_reconciles_tasks() {
    let (dispatcher, factory) = started_dispatcher().await;
    let first = heartbeat(&dispatcher, "w1:5051", vec![]).await.unwrap();
    assert!(first.new_tasks.is_empty());
    assert!(first.tasks_to_delete.is_empty());

    let dataset_id = register_range(&dispatcher, 10).await;
    for _ in 0..3 {
        dispatcher
            .create_job(CreateJobRequest {
                dataset_id,
                processing_mode: ProcessingMode::ParallelEpochs,
            })
            .await
            .unwrap();
    }
    // 创建作业时任务已推送给Worker
    assert_eq!(task_ids(&factory.received_tasks("w1:5051").await), vec![4000, 4001, 4002]);

    let response = heartbeat(&dispatcher, "w1:5051", vec![4001, 9999]).await.unwrap();
    assert_eq!(task_ids(&response.new_tasks), vec![4000, 4002]);
    assert_eq!(response.tasks_to_delete, vec![9999]);

    dispatcher
        .worker_update(WorkerUpdateRequest {
            worker_address: "w1:5051".to_string(),
            updates: vec![TaskProgress {
                task_id: 4000,
                completed: true,
            }],
        })
        .await
        .unwrap();

    let response = heartbeat(&dispatcher, "w1:5051", vec![4000, 4001, 4002]).await.unwrap();
    assert!(response.new_tasks.is_empty());
    assert_eq!(response.tasks_to_delete, vec![4000]);
}

#[tokio::test]
async fn test_new_worker_gets_tasks_for_open_jobs() {
    let (dispatcher, _) = started_dispatcher().await;
    let dataset_id = register_range(&dispatcher, 10).await;
    dispatcher
        .create_job(CreateJobRequest {
            dataset_id,
            processing_mode: ProcessingMode::ParallelEpochs,
        })
        .await
        .unwrap();

    let response = heartbeat(&dispatcher, "w1:5051", vec![]).await.unwrap();
    assert_eq!(response.new_tasks.len(), 1);
    let task = &response.new_tasks[0];
    assert_eq!(task.dataset_id, dataset_id);
    // 没有work_dir时数据集内联下发
    assert!(matches!(task.dataset, DatasetSource::Inline(_)));

    let workers = dispatcher
        .get_workers(GetWorkersRequest::default())
        .await
        .unwrap()
        .workers;
    assert_eq!(workers, vec![WorkerInfo { address: "w1:5051".to_string() }]);
}

#[tokio::test]
async fn test_worker_update_unknown_task() {
    let (dispatcher, _) = started_dispatcher().await;
    let err = dispatcher
        .worker_update(WorkerUpdateRequest {
            worker_address: "w1:5051".to_string(),
            updates: vec![TaskProgress {
                task_id: 4000,
                completed: true,
            }],
        })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_end_to_end_task_lifecycle() {
    let (dispatcher, _) = started_dispatcher().await;
    let dataset_id = register_range(&dispatcher, 5).await;
    let job_client_id = dispatcher
        .create_job(CreateJobRequest {
            dataset_id,
            processing_mode: ProcessingMode::ParallelEpochs,
        })
        .await
        .unwrap()
        .job_client_id;

    let tasks = dispatcher
        .get_tasks(GetTasksRequest { job_client_id })
        .await
        .unwrap();
    assert!(tasks.task_info.is_empty());

    let response = heartbeat(&dispatcher, "w1:5051", vec![]).await.unwrap();
    assert_eq!(response.new_tasks.len(), 1);
    let task_id = response.new_tasks[0].task_id;

    dispatcher
        .worker_update(WorkerUpdateRequest {
            worker_address: "w1:5051".to_string(),
            updates: vec![TaskProgress {
                task_id,
                completed: true,
            }],
        })
        .await
        .unwrap();

    let tasks = dispatcher
        .get_tasks(GetTasksRequest { job_client_id })
        .await
        .unwrap();
    assert_eq!(
        tasks.task_info,
        vec![TaskInfo {
            worker_address: "w1:5051".to_string(),
            task_id,
            job_id: response.new_tasks[0].job_id,
            finished: true,
        }]
    );
    assert!(!tasks.job_finished);
}

#[tokio::test]
async fn test_get_tasks_unknown_client_mentions_restart() {
    let (dispatcher, _) = started_dispatcher().await;
    let err = dispatcher
        .get_tasks(GetTasksRequest { job_client_id: 3000 })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("restart"));
}

#[tokio::test]
async fn test_gc_respects_clients_and_timeout() {
    let (dispatcher, _) = started_dispatcher().await;
    heartbeat(&dispatcher, "w1:5051", vec![]).await.unwrap();
    let dataset_id = register_range(&dispatcher, 10).await;

    let request = GetOrCreateJobRequest {
        dataset_id,
        processing_mode: ProcessingMode::ParallelEpochs,
        job_name: "gc".to_string(),
        job_name_index: 0,
    };
    let first = dispatcher.get_or_create_job(request.clone()).await.unwrap();
    let second = dispatcher.get_or_create_job(request).await.unwrap();

    let far_future = Utc::now().timestamp_micros() + 3_600_000_000;
    // 从未释放过
    assert_eq!(dispatcher.gc_old_jobs(far_future).await.unwrap(), 0);

    dispatcher
        .release_job_client(ReleaseJobClientRequest {
            job_client_id: first.job_client_id,
        })
        .await
        .unwrap();
    // 还有一个客户端
    assert_eq!(dispatcher.gc_old_jobs(far_future).await.unwrap(), 0);

    dispatcher
        .release_job_client(ReleaseJobClientRequest {
            job_client_id: second.job_client_id,
        })
        .await
        .unwrap();
    // 未到超时时间
    assert_eq!(
        dispatcher
            .gc_old_jobs(Utc::now().timestamp_micros())
            .await
            .unwrap(),
        0
    );

    assert_eq!(dispatcher.gc_old_jobs(far_future).await.unwrap(), 1);
    let state = dispatcher.state().await;
    let job = &state.list_jobs()[0];
    assert!(job.finished);
    assert!(state
        .tasks_for_job(job.job_id)
        .unwrap()
        .iter()
        .all(|task| task.finished));

    // 再次回收不会有变化
    assert_eq!(dispatcher.gc_old_jobs(far_future).await.unwrap(), 0);
    assert_eq!(dispatcher.state().await, state);

    let response = heartbeat(&dispatcher, "w1:5051", vec![4000]).await.unwrap();
    assert_eq!(response.tasks_to_delete, vec![4000]);
}

#[tokio::test]
async fn test_released_client_is_forgotten() {
    let (dispatcher, _) = started_dispatcher().await;
    let dataset_id = register_range(&dispatcher, 10).await;
    let job_client_id = dispatcher
        .create_job(CreateJobRequest {
            dataset_id,
            processing_mode: ProcessingMode::ParallelEpochs,
        })
        .await
        .unwrap()
        .job_client_id;

    dispatcher
        .release_job_client(ReleaseJobClientRequest { job_client_id })
        .await
        .unwrap();
    let err = dispatcher
        .release_job_client(ReleaseJobClientRequest { job_client_id })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_job_gc_loop_finishes_idle_jobs() {
    let mut config = dispatcher_config("", false);
    config.job_gc_timeout_ms = 0;
    let (dispatcher, _) = new_dispatcher(config);
    dispatcher.start().await.unwrap();

    let dataset_id = register_range(&dispatcher, 10).await;
    let job_client_id = dispatcher
        .create_job(CreateJobRequest {
            dataset_id,
            processing_mode: ProcessingMode::DistributedEpoch,
        })
        .await
        .unwrap()
        .job_client_id;
    let job_id = dispatcher.state().await.list_jobs()[0].job_id;
    dispatcher
        .release_job_client(ReleaseJobClientRequest { job_client_id })
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let gc = JobGarbageCollector::new(Arc::clone(&dispatcher));
    assert_eq!(gc.check_interval(), Duration::from_millis(50));
    let handle = gc.start(shutdown_rx);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(dispatcher.state().await.job_from_id(job_id).unwrap().finished);

    // 回收后切片状态也被清除
    let err = dispatcher
        .get_split(GetSplitRequest {
            job_id,
            repetition: 0,
        })
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_get_split_serves_each_split_once() {
    let (dispatcher, _) = started_dispatcher().await;
    let dataset_id = register_range(&dispatcher, 3).await;
    dispatcher
        .create_job(CreateJobRequest {
            dataset_id,
            processing_mode: ProcessingMode::DistributedEpoch,
        })
        .await
        .unwrap();
    let job_id = dispatcher.state().await.list_jobs()[0].job_id;

    let mut splits = Vec::new();
    loop {
        let response = dispatcher
            .get_split(GetSplitRequest {
                job_id,
                repetition: 0,
            })
            .await
            .unwrap();
        if response.end_of_splits {
            assert!(response.split.is_none());
            break;
        }
        splits.push(response.split.unwrap());
    }
    assert_eq!(splits, vec![json!(0), json!(1), json!(2)]);

    // 新的repetition从头开始
    let response = dispatcher
        .get_split(GetSplitRequest {
            job_id,
            repetition: 1,
        })
        .await
        .unwrap();
    assert_eq!(response.split, Some(json!(0)));
}

#[tokio::test]
async fn test_get_split_requires_distributed_epoch_job() {
    let (dispatcher, _) = started_dispatcher().await;
    let dataset_id = register_range(&dispatcher, 3).await;
    dispatcher
        .create_job(CreateJobRequest {
            dataset_id,
            processing_mode: ProcessingMode::ParallelEpochs,
        })
        .await
        .unwrap();
    let job_id = dispatcher.state().await.list_jobs()[0].job_id;

    for job_id in [job_id, 9999] {
        let err = dispatcher
            .get_split(GetSplitRequest {
                job_id,
                repetition: 0,
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}

#[tokio::test]
async fn test_failed_assignment_is_recovered_by_heartbeat() {
    let (dispatcher, factory) = started_dispatcher().await;
    heartbeat(&dispatcher, "w1:5051", vec![]).await.unwrap();
    let dataset_id = register_range(&dispatcher, 10).await;

    factory.set_failing(true);
    dispatcher
        .create_job(CreateJobRequest {
            dataset_id,
            processing_mode: ProcessingMode::ParallelEpochs,
        })
        .await
        .unwrap();
    assert!(factory.received_tasks("w1:5051").await.is_empty());
    assert_eq!(factory.created_clients(), 0);

    let state = dispatcher.state().await;
    assert_eq!(state.tasks_for_worker("w1:5051").unwrap().len(), 1);

    let response = heartbeat(&dispatcher, "w1:5051", vec![]).await.unwrap();
    assert_eq!(task_ids(&response.new_tasks), vec![4000]);

    factory.set_failing(false);
    let task = state.task_from_id(4000).unwrap();
    dispatcher.assign_task(&task).await.unwrap();
    dispatcher.assign_task(&task).await.unwrap();
    assert_eq!(factory.created_clients(), 1);
    assert_eq!(factory.received_tasks("w1:5051").await.len(), 2);
}

#[tokio::test]
async fn test_restart_restores_state_from_journal() {
    let work_dir = TempDir::new().unwrap();
    let work_dir_str = work_dir.path().to_str().unwrap().to_string();

    let (dispatcher, _) = new_dispatcher(dispatcher_config(&work_dir_str, true));
    dispatcher.start().await.unwrap();
    heartbeat(&dispatcher, "w1:5051", vec![]).await.unwrap();
    let dataset_id = register_range(&dispatcher, 5).await;
    let job_client_id = dispatcher
        .get_or_create_job(GetOrCreateJobRequest {
            dataset_id,
            processing_mode: ProcessingMode::DistributedEpoch,
            job_name: "restart".to_string(),
            job_name_index: 0,
        })
        .await
        .unwrap()
        .job_client_id;
    let job_id = dispatcher.state().await.list_jobs()[0].job_id;
    for expected in [json!(0), json!(1)] {
        let response = dispatcher
            .get_split(GetSplitRequest {
                job_id,
                repetition: 0,
            })
            .await
            .unwrap();
        assert_eq!(response.split, Some(expected));
    }
    let before = dispatcher.state().await;
    drop(dispatcher);

    let (restarted, _) = new_dispatcher(dispatcher_config(&work_dir_str, true));
    restarted.start().await.unwrap();
    assert_eq!(restarted.state().await, before);

    // 客户端租约在重启后依然有效
    let tasks = restarted
        .get_tasks(GetTasksRequest { job_client_id })
        .await
        .unwrap();
    assert_eq!(tasks.task_info.len(), 1);

    // 切片进度不持久化，从头开始
    let response = restarted
        .get_split(GetSplitRequest {
            job_id,
            repetition: 0,
        })
        .await
        .unwrap();
    assert_eq!(response.split, Some(json!(0)));

    // 新Worker拿到的任务引用work_dir中的数据集文件
    let response = heartbeat(&restarted, "w2:5051", vec![]).await.unwrap();
    assert_eq!(response.new_tasks.len(), 1);
    match &response.new_tasks[0].dataset {
        DatasetSource::Path(path) => assert!(Path::new(path).exists()),
        other => panic!("expected a dataset path, got {other:?}"),
    }

    // 编号在重启后继续增长
    assert_eq!(register_range(&restarted, 6).await, dataset_id + 1);
}
