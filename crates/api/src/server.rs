use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use dataservice_core::DataServiceResult;

/// 在已绑定的监听器上提供HTTP服务，收到关闭信号后优雅退出
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> DataServiceResult<()> {
    let local_addr = listener.local_addr()?;
    info!("HTTP server listening on {}", local_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            // 发送端被丢弃同样视为关闭
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    info!("HTTP server on {} stopped", local_addr);
    Ok(())
}
