use std::net::Ipv4Addr;
use std::sync::RwLock;

use crate::dto::request::{DeviceInfo, DeviceType, Protocol};
use crate::types::{PROTOCOL_VERSION, ShareServiceConfig};
use crate::utils::gen_id;

/// 本实例的自视图 - 指纹在构造时铸造一次, 其余字段随运行状态刷新
#[derive(Debug, Clone)]
pub struct SelfInfo {
    pub alias: String,
    pub fingerprint: String,
    pub device_model: Option<String>,
    pub device_type: DeviceType,
    pub ip: Option<Ipv4Addr>,
    pub port: u16,
    pub protocol: Protocol,
    pub download: bool,
}

/// 身份存储 - 读者获取值拷贝快照, 写者串行化
/// 指纹为构造时生成的随机UUID, 进程生命周期内不变
pub struct IdentityStore {
    inner: RwLock<SelfInfo>,
}

impl IdentityStore {
    pub fn new(config: &ShareServiceConfig) -> Self {
        let info = SelfInfo {
            alias: config.alias.clone(),
            fingerprint: gen_id::generate_fingerprint(),
            device_model: config.device_model.clone(),
            device_type: config.device_type,
            ip: None,
            port: config.http_port,
            protocol: config.protocol,
            download: config.download,
        };

        Self {
            inner: RwLock::new(info),
        }
    }

    /// 当前自视图的值拷贝快照
    pub fn snapshot(&self) -> SelfInfo {
        self.inner.read().unwrap().clone()
    }

    /// 本实例指纹
    pub fn fingerprint(&self) -> String {
        self.inner.read().unwrap().fingerprint.clone()
    }

    /// 记录实际绑定的地址与端口(HTTP服务启动后回填)
    pub fn set_bound_address(&self, ip: Ipv4Addr, port: u16) {
        let mut info = self.inner.write().unwrap();
        info.ip = Some(ip);
        info.port = port;
    }

    /// 切换传输层协议
    pub fn set_transport(&self, protocol: Protocol) {
        self.inner.write().unwrap().protocol = protocol;
    }

    /// 切换download能力开关
    pub fn set_downloadable(&self, download: bool) {
        self.inner.write().unwrap().download = download;
    }

    /// 构造对外发布的DeviceInfo
    /// `announce=true` 用于主动公告, `announce=false` 用于响应/注册/信息查询
    pub fn device_info(&self, announce: bool) -> DeviceInfo {
        let info = self.snapshot();
        DeviceInfo {
            alias: info.alias,
            version: PROTOCOL_VERSION.to_string(),
            device_model: info.device_model,
            device_type: Some(info.device_type),
            fingerprint: info.fingerprint,
            ip: info.ip,
            port: info.port,
            protocol: info.protocol,
            download: info.download,
            announce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> IdentityStore {
        IdentityStore::new(&ShareServiceConfig::default())
    }

    #[test]
    fn test_fingerprint_is_stable_and_unique() {
        let a = store();
        let b = store();
        assert!(!a.fingerprint().is_empty());
        // 两个实例的指纹互不相同
        assert_ne!(a.fingerprint(), b.fingerprint());
        // 同一实例多次读取不变
        assert_eq!(a.fingerprint(), a.fingerprint());
    }

    #[test]
    fn test_bound_address_reflected_in_snapshot() {
        let store = store();
        assert!(store.snapshot().ip.is_none());

        store.set_bound_address(Ipv4Addr::new(192, 168, 1, 7), 54000);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.ip, Some(Ipv4Addr::new(192, 168, 1, 7)));
        assert_eq!(snapshot.port, 54000);
    }

    #[test]
    fn test_device_info_announce_flag() {
        let store = store();
        store.set_bound_address(Ipv4Addr::new(10, 0, 0, 9), 53321);

        let announce = store.device_info(true);
        assert!(announce.announce);
        assert_eq!(announce.version, "2.0");
        assert_eq!(announce.port, 53321);

        let reply = store.device_info(false);
        assert!(!reply.announce);
        assert_eq!(reply.fingerprint, announce.fingerprint);
    }

    #[test]
    fn test_set_downloadable() {
        let store = store();
        assert!(store.device_info(false).download);
        store.set_downloadable(false);
        assert!(!store.device_info(false).download);
    }
}
