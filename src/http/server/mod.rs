mod info_handler;
mod register_handler;
mod transfer_handler;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use log::{error, info};
use tokio::sync::{oneshot, watch};
use tower_http::trace::TraceLayer;

use crate::agent::LanShareService;
use crate::dto::request::Protocol;
use crate::error::{BreezeError, Result};
use crate::utils::security;

/// 初始化所有路由
///
/// 注册信息查询、公告注册与传输(要约+字节流)三组处理器
fn init(service: Arc<LanShareService>) -> Router {
    let router = Router::new();
    let router = router.merge(info_handler::register());
    let router = router.merge(register_handler::register());
    let router = router.merge(transfer_handler::register());

    // 添加全局中间件
    router.with_state(service).layer(TraceLayer::new_for_http())
}

/// 启动HTTP/HTTPS传输服务器
///
/// 端口0表示由操作系统分配; 实际绑定地址通过`ready`回传,
/// 供身份存储回填并让发现公告携带正确端口。
/// `shutdown`发出信号后以1秒宽限期优雅停机。
pub async fn start(
    service: Arc<LanShareService>,
    ready: oneshot::Sender<SocketAddr>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let port = service.config.http_port;
    let protocol = service.config.protocol;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let app = init(Arc::clone(&service));

    match protocol {
        Protocol::Http => {
            let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
                BreezeError::StartupError(format!("绑定HTTP端口 {} 失败: {}", port, e))
            })?;
            let local_addr = listener.local_addr()?;
            info!("HTTP服务监听于: {}", local_addr);
            let _ = ready.send(local_addr);

            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;
        }
        Protocol::Https => {
            // 确保自签名证书存在
            let (cert_path, key_path, fingerprint) =
                security::ensure_certificate(&service.config.cert_dir)?;
            info!("HTTPS证书指纹: {}", fingerprint);

            let rustls_config = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .map_err(|e| BreezeError::StartupError(format!("TLS配置加载失败: {}", e)))?;

            let handle = axum_server::Handle::new();

            // 绑定完成后回传实际端口
            {
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Some(local_addr) = handle.listening().await {
                        info!("HTTPS服务监听于: {}", local_addr);
                        let _ = ready.send(local_addr);
                    }
                });
            }
            // 停机信号转交给axum-server
            {
                let handle = handle.clone();
                tokio::spawn(async move {
                    let _ = shutdown.changed().await;
                    handle.graceful_shutdown(Some(Duration::from_secs(1)));
                });
            }

            if let Err(e) = axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
            {
                error!("HTTPS服务器异常退出: {}", e);
                return Err(BreezeError::IoError(e));
            }
        }
    }

    Ok(())
}
