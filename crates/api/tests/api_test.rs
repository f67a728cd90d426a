use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceExt;

use dataservice_api::{
    dispatcher_routes, error::ErrorBody, routes::paths, serve, worker_routes,
    HttpDispatcherClient, HttpWorkerClient, HttpWorkerClientFactory,
};
use dataservice_core::{
    config::{DispatcherConfig, WorkerConfig},
    models::*,
    traits::{DispatcherService, WorkerService},
    ErrorCode,
};
use dataservice_dispatcher::Dispatcher;
use dataservice_infrastructure::RangeDatasetEngine;
use dataservice_worker::Worker;

async fn spawn_dispatcher(shutdown_tx: &broadcast::Sender<()>) -> (Arc<Dispatcher>, String) {
    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherConfig::default(),
        Arc::new(RangeDatasetEngine::new()),
        Arc::new(HttpWorkerClientFactory::new("http").unwrap()),
    ));
    dispatcher.start().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(serve(
        listener,
        dispatcher_routes(Arc::clone(&dispatcher) as Arc<dyn DispatcherService>),
        shutdown_tx.subscribe(),
    ));
    (dispatcher, address)
}

async fn spawn_worker(
    dispatcher_address: &str,
    shutdown_tx: &broadcast::Sender<()>,
) -> (Arc<Worker>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let config = WorkerConfig {
        dispatcher_address: dispatcher_address.to_string(),
        heartbeat_interval_ms: 100,
        retry_interval_ms: 20,
        ..Default::default()
    };
    let dispatcher = HttpDispatcherClient::new("http", dispatcher_address).unwrap();
    let worker = Arc::new(Worker::new(
        config,
        Arc::new(RangeDatasetEngine::new()),
        Arc::new(dispatcher),
    ));
    tokio::spawn(serve(
        listener,
        worker_routes(Arc::clone(&worker) as Arc<dyn WorkerService>),
        shutdown_tx.subscribe(),
    ));
    worker.start(&address).await.unwrap();
    (worker, address)
}

async fn drain(client: &HttpWorkerClient, task_id: i64) -> Vec<Element> {
    let mut elements = Vec::new();
    loop {
        let response = client
            .get_element(GetElementRequest { task_id })
            .await
            .unwrap();
        if response.end_of_sequence {
            return elements;
        }
        elements.push(response.element.unwrap());
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherConfig::default(),
        Arc::new(RangeDatasetEngine::new()),
        Arc::new(HttpWorkerClientFactory::new("http").unwrap()),
    ));
    let app = dispatcher_routes(dispatcher as Arc<dyn DispatcherService>);

    let response = app
        .oneshot(
            Request::builder()
                .uri(paths::HEALTH)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_errors_are_returned_with_code() {
    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherConfig::default(),
        Arc::new(RangeDatasetEngine::new()),
        Arc::new(HttpWorkerClientFactory::new("http").unwrap()),
    ));
    let app = dispatcher_routes(dispatcher as Arc<dyn DispatcherService>);

    // 未启动的Dispatcher
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(paths::GET_WORKERS)
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body.error.code, ErrorCode::Unavailable);
}

#[tokio::test]
async fn test_typed_errors_survive_http() {
    let (shutdown_tx, _) = broadcast::channel(4);
    let (_dispatcher, dispatcher_address) = spawn_dispatcher(&shutdown_tx).await;
    let client = HttpDispatcherClient::new("http", &dispatcher_address).unwrap();

    let err = client
        .get_dataset_def(GetDatasetDefRequest { dataset_id: 999 })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    let dataset_id = client
        .get_or_register_dataset(GetOrRegisterDatasetRequest {
            dataset: RangeDatasetEngine::dataset_def(0, 3, 1),
        })
        .await
        .unwrap()
        .dataset_id;
    let request = GetOrCreateJobRequest {
        dataset_id,
        processing_mode: ProcessingMode::ParallelEpochs,
        job_name: "named".to_string(),
        job_name_index: 0,
    };
    client.get_or_create_job(request.clone()).await.unwrap();
    let err = client
        .get_or_create_job(GetOrCreateJobRequest {
            processing_mode: ProcessingMode::DistributedEpoch,
            ..request
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FailedPrecondition);

    shutdown_tx.send(()).unwrap();
}

#[tokio::test]
async fn test_unreachable_dispatcher_is_unavailable() {
    let client = HttpDispatcherClient::new("http", "127.0.0.1:1").unwrap();
    let err = client
        .get_workers(GetWorkersRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unavailable);
}

#[tokio::test]
async fn test_parallel_epochs_over_http() {
    let (shutdown_tx, _) = broadcast::channel(4);
    let (_dispatcher, dispatcher_address) = spawn_dispatcher(&shutdown_tx).await;
    let (worker, worker_address) = spawn_worker(&dispatcher_address, &shutdown_tx).await;
    let client = HttpDispatcherClient::new("http", &dispatcher_address).unwrap();

    let workers = client.get_workers(GetWorkersRequest::default()).await.unwrap();
    assert_eq!(
        workers.workers,
        vec![WorkerInfo {
            address: worker_address.clone()
        }]
    );

    let dataset_id = client
        .get_or_register_dataset(GetOrRegisterDatasetRequest {
            dataset: RangeDatasetEngine::dataset_def(0, 5, 1),
        })
        .await
        .unwrap()
        .dataset_id;
    let job_client_id = client
        .create_job(CreateJobRequest {
            dataset_id,
            processing_mode: ProcessingMode::ParallelEpochs,
        })
        .await
        .unwrap()
        .job_client_id;

    let tasks = client
        .get_tasks(GetTasksRequest { job_client_id })
        .await
        .unwrap();
    assert_eq!(tasks.task_info.len(), 1);
    assert_eq!(tasks.task_info[0].worker_address, worker_address);

    let worker_client = HttpWorkerClient::new("http", &worker_address).unwrap();
    let elements = drain(&worker_client, tasks.task_info[0].task_id).await;
    assert_eq!(elements, (0..5).map(|i| json!(i)).collect::<Vec<_>>());

    // 等待Worker上报完成
    let mut finished = false;
    for _ in 0..100 {
        let tasks = client
            .get_tasks(GetTasksRequest { job_client_id })
            .await
            .unwrap();
        if tasks.task_info.iter().all(|task| task.finished) {
            assert!(!tasks.job_finished);
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(finished);

    client
        .release_job_client(ReleaseJobClientRequest { job_client_id })
        .await
        .unwrap();

    worker.stop().await;
    shutdown_tx.send(()).unwrap();
}

#[tokio::test]
async fn test_distributed_epoch_over_http() {
    let (shutdown_tx, _) = broadcast::channel(4);
    let (_dispatcher, dispatcher_address) = spawn_dispatcher(&shutdown_tx).await;
    let (first, first_address) = spawn_worker(&dispatcher_address, &shutdown_tx).await;
    let (second, second_address) = spawn_worker(&dispatcher_address, &shutdown_tx).await;
    let client = HttpDispatcherClient::new("http", &dispatcher_address).unwrap();

    let dataset_id = client
        .get_or_register_dataset(GetOrRegisterDatasetRequest {
            dataset: RangeDatasetEngine::dataset_def(0, 20, 1),
        })
        .await
        .unwrap()
        .dataset_id;
    let job_client_id = client
        .create_job(CreateJobRequest {
            dataset_id,
            processing_mode: ProcessingMode::DistributedEpoch,
        })
        .await
        .unwrap()
        .job_client_id;

    let tasks = client
        .get_tasks(GetTasksRequest { job_client_id })
        .await
        .unwrap()
        .task_info;
    assert_eq!(tasks.len(), 2);

    let mut consumers: Vec<(HttpWorkerClient, i64, bool)> = tasks
        .iter()
        .map(|task| {
            assert!(task.worker_address == first_address || task.worker_address == second_address);
            (
                HttpWorkerClient::new("http", &task.worker_address).unwrap(),
                task.task_id,
                false,
            )
        })
        .collect();

    // 交替从两个Worker读取，直到都结束
    let mut elements = Vec::new();
    while consumers.iter().any(|(_, _, done)| !done) {
        for (worker_client, task_id, done) in consumers.iter_mut().filter(|c| !c.2) {
            let response = worker_client
                .get_element(GetElementRequest { task_id: *task_id })
                .await
                .unwrap();
            match response.element {
                Some(element) => elements.push(element.as_i64().unwrap()),
                None => *done = true,
            }
        }
    }

    elements.sort();
    assert_eq!(elements, (0..20).collect::<Vec<i64>>());

    first.stop().await;
    second.stop().await;
    shutdown_tx.send(()).unwrap();
}
