use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::{Semaphore, broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::ShareService;
use crate::consent::{ConsentDecision, ConsentProvider};
use crate::discovery::{DiscoveryEngine, netif};
use crate::dto::request::{DeviceInfo, TransferOffer};
use crate::error::{BreezeError, Result};
use crate::http::client::HttpClient;
use crate::http::server;
use crate::identity::IdentityStore;
use crate::registry::{PeerChange, PeerRecord, PeerRegistry};
use crate::session::{SessionStore, SweepReason};
use crate::types::{ShareEvent, ShareServiceConfig};
use crate::utils::file::expand_paths;

/// 会话清扫的节拍(宽限期判定的精度由它决定)
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// 等待HTTP服务器完成绑定的上限
const BIND_WAIT: Duration = Duration::from_secs(5);

/// 对一份入站要约的裁决结果
pub(crate) enum OfferOutcome {
    Accepted { session_id: String },
    Declined,
}

/// LAN 传输服务实现 - 协调发现、HTTP平面、会话与用户裁决
#[derive(Clone)]
pub struct LanShareService {
    /// 服务配置
    pub config: ShareServiceConfig,
    /// 本机身份
    pub identity: Arc<IdentityStore>,
    /// 对端注册表
    pub registry: Arc<PeerRegistry>,
    /// 会话存储
    pub sessions: Arc<SessionStore>,
    /// 用户裁决提供者
    pub(crate) consent: Arc<dyn ConsentProvider>,
    /// 出站HTTP客户端
    pub(crate) client: Arc<HttpClient>,
    /// 出站请求并发上限
    outbound: Arc<Semaphore>,
    /// 事件发送器
    event_sender: broadcast::Sender<ShareEvent>,
    /// 服务状态
    is_running: Arc<Mutex<bool>>,
    /// 后台任务句柄
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    /// HTTP服务器停机信号
    shutdown_tx: Arc<Mutex<Option<watch::Sender<bool>>>>,
}

impl LanShareService {
    /// 创建新的传输服务(不启动任何任务)
    pub fn new(config: ShareServiceConfig, consent: Arc<dyn ConsentProvider>) -> Result<Self> {
        let (event_sender, _) = broadcast::channel(100);
        let identity = Arc::new(IdentityStore::new(&config));
        let registry = Arc::new(PeerRegistry::new(
            identity.fingerprint(),
            config.peer_timeout,
        ));

        Ok(Self {
            outbound: Arc::new(Semaphore::new(config.max_outbound_requests)),
            config,
            identity,
            registry,
            sessions: Arc::new(SessionStore::new()),
            consent,
            client: Arc::new(HttpClient::new()?),
            event_sender,
            is_running: Arc::new(Mutex::new(false)),
            tasks: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx: Arc::new(Mutex::new(None)),
        })
    }

    /// 创建服务实例并包装在 Arc 中
    pub fn create(
        config: ShareServiceConfig,
        consent: Arc<dyn ConsentProvider>,
    ) -> Result<Arc<Self>> {
        Ok(Arc::new(Self::new(config, consent)?))
    }

    /// 发送服务事件
    pub(crate) fn send_event(&self, event: ShareEvent) {
        // 没有订阅者时发送失败, 属正常情况
        let _ = self.event_sender.send(event);
    }

    /// 裁决一份入站要约
    ///
    /// 以Pending态入库后同步等待用户裁决; 等待期间不持有任何锁。
    /// 裁决超时视同拒绝, 会话随之移除。
    pub(crate) async fn decide_offer(&self, offer: TransferOffer) -> OfferOutcome {
        let peer_fingerprint = offer.info.fingerprint.clone();
        let session_id = match self
            .sessions
            .insert_offer(offer.clone(), peer_fingerprint)
        {
            Ok(session_id) => session_id,
            Err(e) => {
                warn!("要约入库失败: {}", e);
                return OfferOutcome::Declined;
            }
        };

        self.send_event(ShareEvent::OfferReceived {
            session_id: session_id.clone(),
            offer: offer.clone(),
        });

        let decision = tokio::time::timeout(
            self.config.consent_timeout,
            self.consent.request_consent(&offer),
        )
        .await;

        match decision {
            Ok(ConsentDecision::Accept) => {
                if !self.sessions.mark_accepted(&session_id) {
                    // 等待期间会话已被清除(理论上不可达)
                    warn!("接受裁决到达时会话已不存在: {}", session_id);
                    return OfferOutcome::Declined;
                }
                info!("要约已接受, 会话: {}", session_id);
                self.send_event(ShareEvent::OfferAccepted {
                    session_id: session_id.clone(),
                });
                OfferOutcome::Accepted { session_id }
            }
            Ok(ConsentDecision::Decline) => {
                info!("要约被拒绝, 会话移除: {}", session_id);
                self.sessions.remove(&session_id);
                self.send_event(ShareEvent::OfferDeclined { session_id });
                OfferOutcome::Declined
            }
            Err(_) => {
                info!("裁决超时({:?}), 视同拒绝: {}", self.config.consent_timeout, session_id);
                self.sessions.remove(&session_id);
                self.send_event(ShareEvent::OfferDeclined { session_id });
                OfferOutcome::Declined
            }
        }
    }

    /// 标记会话失败并广播事件(接收路径的错误出口)
    pub(crate) fn fail_session(&self, session_id: &str, file_id: &str, error: &str) {
        self.sessions.fail(session_id);
        self.send_event(ShareEvent::SessionFailed {
            session_id: session_id.to_string(),
            file_id: file_id.to_string(),
            error: error.to_string(),
        });
    }

    /// 启动HTTP服务器并等待其回报实际绑定地址
    async fn start_http_server(&self) -> Result<u16> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock().unwrap() = Some(shutdown_tx);

        let service: Arc<LanShareService> = Arc::new(self.clone());
        let handle = tokio::spawn(async move {
            if let Err(e) = server::start(service, ready_tx, shutdown_rx).await {
                error!("HTTP 服务器退出: {:?}", e);
            }
        });
        self.tasks.lock().unwrap().push(handle);

        match tokio::time::timeout(BIND_WAIT, ready_rx).await {
            Ok(Ok(addr)) => Ok(addr.port()),
            _ => Err(BreezeError::StartupError(
                "HTTP server failed to bind".to_string(),
            )),
        }
    }

    /// 启动会话清扫任务
    fn spawn_session_sweeper(&self) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SESSION_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let removed = service.sessions.sweep(
                    Instant::now(),
                    service.config.session_idle_timeout,
                    service.config.completed_grace,
                );
                for (session_id, reason) in removed {
                    if reason == SweepReason::Idle {
                        service.send_event(ShareEvent::SessionExpired { session_id });
                    }
                }
            }
        })
    }

    /// 启动对端事件桥接任务: 把注册表变更转发为服务事件
    fn spawn_peer_bridge(&self) -> JoinHandle<()> {
        let service = self.clone();
        let mut changes = self.registry.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(PeerChange::Added(device)) => {
                        service.send_event(ShareEvent::PeerDiscovered(device));
                    }
                    Ok(PeerChange::Updated(device)) => {
                        service.send_event(ShareEvent::PeerUpdated(device));
                    }
                    Ok(PeerChange::Removed { fingerprint }) => {
                        service.send_event(ShareEvent::PeerExpired { fingerprint });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("对端事件积压, 跳过 {} 条", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[async_trait]
impl ShareService for LanShareService {
    /// 启动传输服务
    ///
    /// 启动即全量: 任何一步失败(端口被占、无可用IPv4、多播加入失败)
    /// 都会回滚已启动的部分并上抛错误, 不会留下半启动的引擎
    async fn start(&self) -> Result<()> {
        {
            let mut is_running = self.is_running.lock().unwrap();
            if *is_running {
                debug!("传输服务已在运行中");
                return Ok(());
            }
            *is_running = true;
        }

        info!("正在启动传输服务...");

        let startup = async {
            // 确定本机IPv4; 找不到任何可用地址是致命错误
            let local_ip = netif::pick_local_ipv4().ok_or_else(|| {
                BreezeError::StartupError("no usable local IPv4 address".to_string())
            })?;

            // 先起HTTP服务, 拿到实际端口后发现公告才有意义
            let port = self.start_http_server().await?;
            self.identity.set_bound_address(local_ip, port);
            info!("本机地址: {}:{} ({:?})", local_ip, port, self.config.protocol);

            // 多播发现
            let engine = Arc::new(DiscoveryEngine::bind(
                Arc::clone(&self.identity),
                Arc::clone(&self.registry),
                Arc::clone(&self.client),
                Arc::clone(&self.outbound),
                &self.config,
            )?);
            self.tasks
                .lock()
                .unwrap()
                .extend(DiscoveryEngine::spawn(&engine));

            // 会话清扫与对端事件桥接
            let sweeper = self.spawn_session_sweeper();
            let bridge = self.spawn_peer_bridge();
            self.tasks.lock().unwrap().extend([sweeper, bridge]);

            Ok::<(), BreezeError>(())
        };

        if let Err(e) = startup.await {
            error!("传输服务启动失败: {}", e);
            // 回滚: 中止已启动的任务并复位状态
            self.halt_tasks().await;
            *self.is_running.lock().unwrap() = false;
            return Err(e);
        }

        self.send_event(ShareEvent::ServiceStarted);
        info!("传输服务已启动");
        Ok(())
    }

    /// 停止传输服务
    async fn stop(&self) -> Result<()> {
        {
            let mut is_running = self.is_running.lock().unwrap();
            if !*is_running {
                debug!("传输服务未运行");
                return Ok(());
            }
            *is_running = false;
        }

        info!("正在停止传输服务...");
        self.halt_tasks().await;
        self.send_event(ShareEvent::ServiceStopped);
        info!("传输服务已停止");
        Ok(())
    }

    /// 关闭传输服务并释放资源
    async fn shutdown(&self) -> Result<()> {
        self.stop().await?;
        self.registry.clear();
        self.sessions.clear();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ShareEvent> {
        self.event_sender.subscribe()
    }

    fn local_device(&self) -> DeviceInfo {
        self.identity.device_info(false)
    }

    fn known_peers(&self) -> Vec<PeerRecord> {
        self.registry.snapshot()
    }

    fn set_downloadable(&self, download: bool) {
        self.identity.set_downloadable(download);
    }

    /// 向指定对端发送一组文件
    ///
    /// 路径展开 -> 构造要约 -> `/send-request` -> 逐文件`/send`上传。
    /// 对端拒绝映射为`Declined`错误; 返回对端铸造的sessionId
    async fn send_paths(&self, fingerprint: &str, paths: Vec<PathBuf>) -> Result<String> {
        let peer = self
            .registry
            .get(fingerprint)
            .ok_or_else(|| BreezeError::PeerNotFound(fingerprint.to_string()))?
            .device;

        let expanded = expand_paths(&paths)?;
        let mut files = HashMap::new();
        let mut locations = Vec::new();
        for (path, metadata) in expanded {
            locations.push((metadata.id.clone(), path));
            files.insert(metadata.id.clone(), metadata);
        }

        let offer = TransferOffer {
            info: self.identity.device_info(false),
            files,
        };
        info!(
            "向 {} 发送要约: {} 个文件",
            peer.alias,
            offer.files.len()
        );

        let reply = match self.client.send_offer(&peer, &offer).await {
            Ok(reply) => reply,
            Err(e) => {
                if matches!(e, BreezeError::Declined(_)) {
                    self.send_event(ShareEvent::RequestDeclined {
                        fingerprint: fingerprint.to_string(),
                    });
                }
                return Err(e);
            }
        };
        // is_accepted已在客户端校验, sessionId必定存在
        let session_id = reply.session_id.ok_or_else(|| {
            BreezeError::NetworkError("accepted reply without sessionId".to_string())
        })?;

        self.send_event(ShareEvent::RequestAccepted {
            session_id: session_id.clone(),
            fingerprint: fingerprint.to_string(),
        });

        // 逐文件顺序上传; 单个文件不做多连接分片
        for (file_id, path) in locations {
            debug!("上传文件 {} ({})", file_id, path.display());
            self.client
                .upload_file(&peer, &session_id, &file_id, &path)
                .await?;
            self.send_event(ShareEvent::FileSent {
                session_id: session_id.clone(),
                file_id,
            });
        }

        info!("要约 {} 的全部文件上传完成", session_id);
        Ok(session_id)
    }
}

impl LanShareService {
    /// 停机收尾: 发出优雅停机信号, 宽限期后中止全部任务并限时等待退出
    async fn halt_tasks(&self) {
        let shutdown_tx = self.shutdown_tx.lock().unwrap().take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(true);
            // HTTP服务器的1秒停机宽限
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        // 限时等待任务退出, 超时即放弃
        let _ = tokio::time::timeout(
            Duration::from_secs(5),
            futures::future::join_all(tasks),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::{AutoAccept, AutoDecline};
    use crate::dto::request::{FileMetadata, Protocol};
    use crate::session::SessionState;

    /// 永不应答的裁决提供者, 用于验证超时路径
    struct NeverConsent;

    #[async_trait]
    impl ConsentProvider for NeverConsent {
        async fn request_consent(&self, _offer: &TransferOffer) -> ConsentDecision {
            futures::future::pending().await
        }
    }

    fn service_with(consent: Arc<dyn ConsentProvider>) -> LanShareService {
        let config = ShareServiceConfig {
            consent_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        LanShareService::new(config, consent).unwrap()
    }

    fn offer() -> TransferOffer {
        let mut files = HashMap::new();
        files.insert(
            "f1".to_string(),
            FileMetadata {
                id: "f1".to_string(),
                file_name: "x.txt".to_string(),
                size: 10,
                file_type: None,
            },
        );
        TransferOffer {
            info: DeviceInfo {
                alias: "B".to_string(),
                version: "2.0".to_string(),
                device_model: None,
                device_type: None,
                fingerprint: "B".to_string(),
                ip: None,
                port: 53321,
                protocol: Protocol::Http,
                download: true,
                announce: false,
            },
            files,
        }
    }

    #[tokio::test]
    async fn test_decide_offer_accept() {
        let service = service_with(Arc::new(AutoAccept));
        match service.decide_offer(offer()).await {
            OfferOutcome::Accepted { session_id } => {
                let session = service.sessions.get(&session_id).unwrap();
                assert_eq!(session.state, SessionState::Accepted);
                assert_eq!(session.peer_fingerprint, "B");
            }
            OfferOutcome::Declined => panic!("offer should have been accepted"),
        }
    }

    #[tokio::test]
    async fn test_decide_offer_decline_removes_session() {
        let service = service_with(Arc::new(AutoDecline));
        assert!(matches!(
            service.decide_offer(offer()).await,
            OfferOutcome::Declined
        ));
        assert!(service.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_consent_timeout_declines() {
        let service = service_with(Arc::new(NeverConsent));
        assert!(matches!(
            service.decide_offer(offer()).await,
            OfferOutcome::Declined
        ));
        assert!(service.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_send_paths_requires_known_peer() {
        let service = service_with(Arc::new(AutoAccept));
        let result = service
            .send_paths("unknown", vec![PathBuf::from("/tmp/x")])
            .await;
        assert!(matches!(result, Err(BreezeError::PeerNotFound(_))));
    }
}
