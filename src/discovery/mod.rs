pub mod netif;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};

use crate::dto::request::DeviceInfo;
use crate::error::{BreezeError, Result};
use crate::http::client::HttpClient;
use crate::identity::IdentityStore;
use crate::registry::PeerRegistry;
use crate::types::{MULTICAST_TTL, ShareServiceConfig};

/// 公告方的HTTP响应通道失败后, UDP补充响应的延迟
const UDP_SUPPLEMENT_DELAY: Duration = Duration::from_millis(500);

/// 发现引擎 - 多播在场协议
///
/// 三个协作任务: 监听(阻塞接收)、公告(固定间隔)、清扫(固定间隔)。
/// 监听任务只做解析与入库, 对公告的响应全部移交出站任务池,
/// 绝不在监听循环内做HTTP调用。
pub struct DiscoveryEngine {
    identity: Arc<IdentityStore>,
    registry: Arc<PeerRegistry>,
    client: Arc<HttpClient>,
    /// 出站HTTP响应的并发上限(与协调器共享)
    outbound: Arc<Semaphore>,
    socket: Arc<UdpSocket>,
    group: Ipv4Addr,
    port: u16,
    announce_interval: Duration,
}

/// 打开发现套接字: 绑定发现端口并加入多播组
///
/// 接口选择: 启用、非回环、非虚拟且持有IPv4地址的接口优先;
/// 没有匹配项时交给操作系统。TTL=4, 尽力关闭回环接收。
fn open_socket(config: &ShareServiceConfig) -> Result<UdpSocket> {
    let std_socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.discovery_port))
        .map_err(|e| {
            BreezeError::StartupError(format!(
                "绑定发现端口 {} 失败: {}",
                config.discovery_port, e
            ))
        })?;

    let iface = netif::multicast_interface();
    std_socket
        .join_multicast_v4(&config.multicast_group, &iface)
        .map_err(|e| {
            BreezeError::StartupError(format!(
                "加入多播组 {} 失败: {}",
                config.multicast_group, e
            ))
        })?;

    let _ = std_socket.set_multicast_ttl_v4(MULTICAST_TTL);
    // 部分平台不支持, 失败时依赖指纹过滤自身报文
    let _ = std_socket.set_multicast_loop_v4(false);

    std_socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(std_socket)?)
}

impl DiscoveryEngine {
    /// 绑定套接字并构造引擎; 套接字层面的失败是致命的, 直接上抛
    pub fn bind(
        identity: Arc<IdentityStore>,
        registry: Arc<PeerRegistry>,
        client: Arc<HttpClient>,
        outbound: Arc<Semaphore>,
        config: &ShareServiceConfig,
    ) -> Result<Self> {
        let socket = open_socket(config)?;
        info!(
            "发现服务已绑定 {}:{}",
            config.multicast_group, config.discovery_port
        );

        Ok(Self::new(
            identity,
            registry,
            client,
            outbound,
            socket,
            config.multicast_group,
            config.discovery_port,
            config.announce_interval,
        ))
    }

    /// 用现成的套接字构造引擎
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: Arc<IdentityStore>,
        registry: Arc<PeerRegistry>,
        client: Arc<HttpClient>,
        outbound: Arc<Semaphore>,
        socket: UdpSocket,
        group: Ipv4Addr,
        port: u16,
        announce_interval: Duration,
    ) -> Self {
        Self {
            identity,
            registry,
            client,
            outbound,
            socket: Arc::new(socket),
            group,
            port,
            announce_interval,
        }
    }

    /// 启动三个协作任务, 句柄交由调用方统一中止
    pub fn spawn(engine: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let announcer = {
            let engine = Arc::clone(engine);
            tokio::spawn(async move { engine.announce_loop().await })
        };
        let listener = {
            let engine = Arc::clone(engine);
            tokio::spawn(async move { engine.listen_loop().await })
        };
        let sweeper = {
            let engine = Arc::clone(engine);
            tokio::spawn(async move { engine.sweep_loop().await })
        };
        vec![announcer, listener, sweeper]
    }

    fn group_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.group, self.port))
    }

    /// 向多播组发送一份DeviceInfo数据报
    async fn send_device_info(&self, info: &DeviceInfo) {
        let payload = match serde_json::to_vec(info) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("序列化DeviceInfo失败: {}", e);
                return;
            }
        };
        // 发送失败属瞬态网络问题, 下个周期自然重试
        if let Err(e) = self.socket.send_to(&payload, self.group_addr()).await {
            info!("多播发送失败: {}", e);
        }
    }

    /// 公告循环: 立即发送首份公告, 之后每个周期重复
    async fn announce_loop(self: Arc<Self>) {
        let mut ticker = interval(self.announce_interval);
        loop {
            ticker.tick().await;
            let info = self.identity.device_info(true);
            if info.port == 0 {
                // HTTP端口尚未回填, 本轮跳过
                continue;
            }
            self.send_device_info(&info).await;
        }
    }

    /// 监听循环: 解析、入库、按需响应; 任何单报文错误都不会中断循环
    async fn listen_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 4096];
        info!("发现监听任务已启动");
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((n, from)) => self.handle_datagram(&buf[..n], from),
                Err(e) => {
                    warn!("发现监听接收错误: {}", e);
                    // 短暂退避, 避免错误风暴
                    sleep(Duration::from_millis(200)).await;
                }
            }
        }
    }

    /// 处理单个入站数据报
    pub(crate) fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let device: DeviceInfo = match serde_json::from_slice(data) {
            Ok(device) => device,
            Err(e) => {
                debug!("丢弃格式错误的数据报 (来自 {}): {}", from, e);
                return;
            }
        };

        if !device.is_valid() {
            debug!("丢弃不完整的设备信息 (来自 {})", from);
            return;
        }
        // 自身的报文直接忽略
        if device.fingerprint == self.identity.fingerprint() {
            return;
        }

        let is_announce = device.announce;
        self.registry.upsert(device.clone(), from.ip());

        if is_announce {
            debug!("收到 {} 的公告, 准备响应", device.alias);
            self.respond_to_announcement(device, from);
        }
    }

    /// 响应一份公告
    ///
    /// 主通道: 向公告方POST本机`announce=false`的DeviceInfo(短超时);
    /// 补充通道: 延迟500ms后再发一份多播数据报, 覆盖HTTP被防火墙
    /// 拦截的主机。两条通道在注册表层面幂等。
    fn respond_to_announcement(&self, mut announcer: DeviceInfo, from: SocketAddr) {
        // 响应目标地址以数据包源地址为准
        if let SocketAddr::V4(v4) = from {
            announcer.ip = Some(*v4.ip());
        }
        let payload = self.identity.device_info(false);

        let client = Arc::clone(&self.client);
        let outbound = Arc::clone(&self.outbound);
        let http_payload = payload.clone();
        tokio::spawn(async move {
            let _permit = match outbound.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            match client.register(&announcer, &http_payload).await {
                Ok(()) => debug!("已通过HTTP响应 {} 的公告", announcer.alias),
                Err(e) => info!("HTTP公告响应失败 ({}): {}", announcer.alias, e),
            }
        });

        let socket = Arc::clone(&self.socket);
        let dest = self.group_addr();
        tokio::spawn(async move {
            sleep(UDP_SUPPLEMENT_DELAY).await;
            match serde_json::to_vec(&payload) {
                Ok(bytes) => {
                    if let Err(e) = socket.send_to(&bytes, dest).await {
                        info!("UDP补充响应发送失败: {}", e);
                    }
                }
                Err(e) => warn!("序列化DeviceInfo失败: {}", e),
            }
        });
    }

    /// 清扫循环: 每半个超时周期清一次过期对端
    async fn sweep_loop(self: Arc<Self>) {
        let mut ticker = interval(self.registry.timeout() / 2);
        loop {
            ticker.tick().await;
            let evicted = self.registry.sweep_expired(Instant::now());
            if !evicted.is_empty() {
                debug!("清扫过期对端: {:?}", evicted);
            }
        }
    }
}
