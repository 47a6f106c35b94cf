use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::dto::request::{DeviceInfo, DeviceType, Protocol, TransferOffer};

/// LocalSend协议版本号
pub const PROTOCOL_VERSION: &str = "2.0";

/// 发现协议多播组地址
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 167);

/// 发现协议端口(固定)
pub const DISCOVERY_PORT: u16 = 53317;

/// 多播TTL - 将公告限制在本地网络范围内
pub const MULTICAST_TTL: u32 = 4;

/// 传输事件枚举 - 用于向订阅者通知发现与传输状态变化
#[derive(Clone, Debug)]
pub enum ShareEvent {
    /// 服务已启动
    ServiceStarted,

    /// 服务已停止
    ServiceStopped,

    /// 发现新对端
    PeerDiscovered(DeviceInfo),

    /// 对端信息已更新(地址或属性变化)
    PeerUpdated(DeviceInfo),

    /// 对端超时被移除
    PeerExpired { fingerprint: String },

    /// 收到新的传输要约, 等待用户裁决
    OfferReceived {
        session_id: String,
        offer: TransferOffer,
    },

    /// 要约已被本端接受
    OfferAccepted { session_id: String },

    /// 要约已被本端拒绝(含裁决超时)
    OfferDeclined { session_id: String },

    /// 单个文件接收完成, 已落盘
    FileReceived {
        session_id: String,
        file_id: String,
        path: PathBuf,
    },

    /// 会话内全部文件接收完成
    SessionCompleted { session_id: String },

    /// 会话失败(字节数不符或本地IO错误)
    SessionFailed {
        session_id: String,
        file_id: String,
        error: String,
    },

    /// 会话闲置超时被移除
    SessionExpired { session_id: String },

    /// (发送方)要约被对端接受, 开始上传
    RequestAccepted {
        session_id: String,
        fingerprint: String,
    },

    /// (发送方)要约被对端拒绝
    RequestDeclined { fingerprint: String },

    /// (发送方)单个文件上传完成
    FileSent { session_id: String, file_id: String },
}

/// 传输服务配置
#[derive(Debug, Clone)]
pub struct ShareServiceConfig {
    /// 设备别名(展示用), 默认取主机名
    pub alias: String,
    /// 设备型号, 默认取操作系统名
    pub device_model: Option<String>,
    /// 设备类型
    pub device_type: DeviceType,
    /// HTTP服务监听端口, 0表示由操作系统分配
    pub http_port: u16,
    /// 传输层协议选择
    pub protocol: Protocol,
    /// 是否接收文件
    pub download: bool,
    /// 接收文件的保存目录, 按需创建
    pub download_dir: PathBuf,
    /// HTTPS证书存放目录(仅protocol为https时使用)
    pub cert_dir: PathBuf,
    /// 多播组地址
    pub multicast_group: Ipv4Addr,
    /// 发现端口
    pub discovery_port: u16,
    /// 公告间隔
    pub announce_interval: Duration,
    /// 对端过期时间
    pub peer_timeout: Duration,
    /// 用户裁决超时, 到期视同拒绝
    pub consent_timeout: Duration,
    /// 会话闲置过期时间
    pub session_idle_timeout: Duration,
    /// 会话完成后的保留宽限期
    pub completed_grace: Duration,
    /// 出站HTTP请求并发上限
    pub max_outbound_requests: usize,
}

impl Default for ShareServiceConfig {
    fn default() -> Self {
        let alias = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "breeze-send".to_string());

        Self {
            alias,
            device_model: Some(std::env::consts::OS.to_string()),
            device_type: DeviceType::Desktop,
            http_port: 0,
            protocol: Protocol::Http,
            download: true,
            download_dir: PathBuf::from("./downloads_localsend"),
            cert_dir: PathBuf::from("certs"),
            multicast_group: MULTICAST_GROUP,
            discovery_port: DISCOVERY_PORT,
            announce_interval: Duration::from_secs(5),
            peer_timeout: Duration::from_secs(15),
            consent_timeout: Duration::from_secs(60),
            session_idle_timeout: Duration::from_secs(600),
            completed_grace: Duration::from_secs(30),
            max_outbound_requests: 5,
        }
    }
}
