pub mod agent;
pub mod consent;
pub mod discovery;
pub mod dto;
pub mod error;
pub mod http;
pub mod identity;
pub mod registry;
pub mod session;
pub mod types;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::agent::LanShareService;
use crate::consent::ConsentProvider;
use crate::dto::request::DeviceInfo;
use crate::error::Result;
use crate::registry::PeerRecord;
use crate::types::{ShareEvent, ShareServiceConfig};

/// 传输服务特性 - LAN点对点文件传输引擎的核心接口
///
/// 引擎由三个并发子系统构成: 多播在场发现、HTTP控制/数据平面、
/// 以及连接两者并代理用户裁决的会话状态机
#[async_trait]
pub trait ShareService: Sync + Send {
    /// 启动传输服务(HTTP平面、发现引擎与各清扫任务)
    ///
    /// 启动失败(端口被占、无可用本机IPv4等)会完整回滚, 不会留下
    /// 半启动的引擎
    ///
    /// # 返回
    /// * `Result<()>` - 操作成功或错误
    async fn start(&self) -> Result<()>;

    /// 停止传输服务
    ///
    /// # 返回
    /// * `Result<()>` - 操作成功或错误
    async fn stop(&self) -> Result<()>;

    /// 关闭传输服务并释放资源
    ///
    /// # 返回
    /// * `Result<()>` - 操作成功或错误
    async fn shutdown(&self) -> Result<()>;

    /// 订阅传输事件
    ///
    /// # 返回
    /// * `broadcast::Receiver<ShareEvent>` - 事件接收器
    fn subscribe(&self) -> broadcast::Receiver<ShareEvent>;

    /// 本机设备信息的新鲜快照 (announce恒为false)
    fn local_device(&self) -> DeviceInfo;

    /// 当前已知对端的有序快照(按别名、指纹排序)
    ///
    /// # 返回
    /// * `Vec<PeerRecord>` - 对端列表
    fn known_peers(&self) -> Vec<PeerRecord>;

    /// 切换本机的download能力开关, 随下一轮公告生效
    fn set_downloadable(&self, download: bool);

    /// 向指定对端发送一组文件(发送方全流程)
    ///
    /// # 参数
    /// * `fingerprint` - 目标对端指纹
    /// * `paths` - 要发送的文件或目录路径列表(目录逐文件摊平)
    ///
    /// # 返回
    /// * `Result<String>` - 对端铸造的sessionId或错误
    async fn send_paths(&self, fingerprint: &str, paths: Vec<PathBuf>) -> Result<String>;
}

/// 创建传输服务实例
///
/// # 参数
/// * `config` - 服务配置
/// * `consent` - 用户裁决提供者(界面层或无人值守的自动裁决)
///
/// # 返回
/// * `Result<Arc<dyn ShareService>>` - 传输服务实例或错误
pub fn create_share_service(
    config: ShareServiceConfig,
    consent: Arc<dyn ConsentProvider>,
) -> Result<Arc<dyn ShareService>> {
    let service = LanShareService::create(config, consent)?;
    Ok(service)
}
