use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::info;

use dataservice_api::{
    dispatcher_routes, serve, worker_routes, HttpDispatcherClient, HttpWorkerClientFactory,
};
use dataservice_core::{
    config::{AppConfig, WorkerConfig},
    traits::{DispatcherService, WorkerService},
};
use dataservice_dispatcher::{Dispatcher, JobGarbageCollector};
use dataservice_infrastructure::RangeDatasetEngine;
use dataservice_worker::Worker;

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行Dispatcher
    Dispatcher,
    /// 仅运行Worker
    Worker,
    /// 同一进程内运行Dispatcher和Worker
    All,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        info!("初始化应用程序，模式: {:?}", mode);
        Self { config, mode }
    }

    /// 运行直到收到关闭信号；任一组件启动失败时返回错误
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match self.mode {
            AppMode::Dispatcher => self.run_dispatcher(shutdown_rx).await,
            AppMode::Worker => self.run_worker(shutdown_rx).await,
            AppMode::All => {
                tokio::try_join!(
                    self.run_dispatcher(shutdown_rx.resubscribe()),
                    self.run_worker(shutdown_rx)
                )?;
                Ok(())
            }
        }
    }

    async fn run_dispatcher(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let config = &self.config.dispatcher;
        info!("启动Dispatcher服务: {}", config.bind_address);

        let worker_client_factory = HttpWorkerClientFactory::new(&config.protocol)?;
        let dispatcher = Arc::new(Dispatcher::new(
            config.clone(),
            Arc::new(RangeDatasetEngine::new()),
            Arc::new(worker_client_factory),
        ));
        dispatcher.start().await.context("启动Dispatcher失败")?;

        let listener = TcpListener::bind(&config.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", config.bind_address))?;

        let gc_handle =
            JobGarbageCollector::new(Arc::clone(&dispatcher)).start(shutdown_rx.resubscribe());

        serve(
            listener,
            dispatcher_routes(dispatcher as Arc<dyn DispatcherService>),
            shutdown_rx,
        )
        .await
        .context("Dispatcher HTTP服务异常退出")?;

        gc_handle.await.context("作业回收任务异常退出")?;
        info!("Dispatcher服务已停止");
        Ok(())
    }

    async fn run_worker(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let config = &self.config.worker;
        info!("启动Worker服务: {}", config.bind_address);

        let listener = TcpListener::bind(&config.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", config.bind_address))?;
        let worker_address = resolve_worker_address(config, listener.local_addr()?)?;

        let dispatcher_client =
            HttpDispatcherClient::new(&config.protocol, &config.dispatcher_address)?;
        let worker = Arc::new(Worker::new(
            config.clone(),
            Arc::new(RangeDatasetEngine::new()),
            Arc::new(dispatcher_client),
        ));

        let server = tokio::spawn(serve(
            listener,
            worker_routes(Arc::clone(&worker) as Arc<dyn WorkerService>),
            shutdown_rx.resubscribe(),
        ));

        // Dispatcher不可用时注册会一直重试，期间也要响应关闭
        let registered = tokio::select! {
            result = worker.start(&worker_address) => {
                result.context("Worker注册失败")?;
                true
            }
            _ = shutdown_rx.recv() => false,
        };
        if registered {
            let _ = shutdown_rx.recv().await;
        }
        info!("Worker收到关闭信号");

        worker.stop().await;
        server.await.context("Worker HTTP服务任务异常退出")??;
        info!("Worker服务已停止");
        Ok(())
    }
}

/// 未配置对外地址时，用本机主机名和实际监听端口
fn resolve_worker_address(config: &WorkerConfig, local_addr: SocketAddr) -> Result<String> {
    if !config.worker_address.is_empty() {
        return Ok(config.worker_address.clone());
    }
    let host = hostname::get().context("获取主机名失败")?;
    Ok(format!("{}:{}", host.to_string_lossy(), local_addr.port()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_configured_worker_address_wins() {
        let config = WorkerConfig {
            worker_address: "worker-0:6000".to_string(),
            ..Default::default()
        };
        let addr: SocketAddr = "0.0.0.0:5051".parse().unwrap();
        assert_eq!(resolve_worker_address(&config, addr).unwrap(), "worker-0:6000");
    }

    #[test]
    fn test_worker_address_uses_bound_port() {
        let addr: SocketAddr = "0.0.0.0:41234".parse().unwrap();
        let address = resolve_worker_address(&WorkerConfig::default(), addr).unwrap();
        assert!(address.ends_with(":41234"));
        assert!(address.len() > ":41234".len());
    }

    #[tokio::test]
    async fn test_dispatcher_mode_stops_on_shutdown() {
        let mut config = AppConfig::default();
        config.dispatcher.bind_address = "127.0.0.1:0".to_string();
        let app = Application::new(config, AppMode::Dispatcher);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let handle = tokio::spawn(async move { app.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_fault_tolerant_dispatcher_requires_work_dir() {
        let mut config = AppConfig::default();
        config.dispatcher.bind_address = "127.0.0.1:0".to_string();
        config.dispatcher.fault_tolerant_mode = true;
        let app = Application::new(config, AppMode::Dispatcher);

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(4);
        assert!(app.run(shutdown_rx).await.is_err());
    }

    #[tokio::test]
    async fn test_unregistered_worker_stops_on_shutdown() {
        let mut config = AppConfig::default();
        config.worker.bind_address = "127.0.0.1:0".to_string();
        config.worker.worker_address = "localhost:1".to_string();
        config.worker.dispatcher_address = "127.0.0.1:1".to_string();
        config.worker.retry_interval_ms = 20;
        let app = Application::new(config, AppMode::Worker);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
        let handle = tokio::spawn(async move { app.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
