use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, info};
use tokio::sync::broadcast;

use crate::dto::request::DeviceInfo;

/// 注册表中的单条对端记录
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub device: DeviceInfo,
    /// 最近一次看到该对端的单调时间戳, 每次upsert单调推进
    pub last_seen: Instant,
}

/// upsert的归类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// 首次出现
    Added,
    /// 已知对端, 但地址或属性发生变化
    Updated,
    /// 纯粹的活性刷新
    Refreshed,
}

/// 对端集合的变更事件
#[derive(Debug, Clone)]
pub enum PeerChange {
    Added(DeviceInfo),
    Updated(DeviceInfo),
    Removed { fingerprint: String },
}

/// 对端注册表 - fingerprint -> PeerRecord 的权威映射
///
/// 写入按键串行化; 读者通过值拷贝快照观察, 不会看到撕裂状态。
/// 本机指纹的记录永远不会进入注册表。
pub struct PeerRegistry {
    local_fingerprint: String,
    peers: DashMap<String, PeerRecord>,
    events: broadcast::Sender<PeerChange>,
    timeout: Duration,
}

impl PeerRegistry {
    pub fn new(local_fingerprint: String, timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            local_fingerprint,
            peers: DashMap::new(),
            events,
            timeout,
        }
    }

    /// 对端过期时间
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 订阅对端变更事件(added/updated/removed)
    pub fn subscribe(&self) -> broadcast::Receiver<PeerChange> {
        self.events.subscribe()
    }

    fn send_event(&self, event: PeerChange) {
        // 没有订阅者时发送会失败, 属正常情况
        let _ = self.events.send(event);
    }

    /// 记录一次对端目击
    ///
    /// 数据包源地址可信, 覆盖载荷中自报的IP; 身份主键为指纹。
    /// 本机指纹或非法报文返回None, 注册表不变。
    pub fn upsert(&self, mut device: DeviceInfo, observed_ip: IpAddr) -> Option<UpsertOutcome> {
        if !device.is_valid() || device.fingerprint == self.local_fingerprint {
            return None;
        }

        // 源IP覆盖载荷IP; IPv6来源(理论上仅HTTP注册可能出现)保留载荷值
        if let IpAddr::V4(ip) = observed_ip {
            device.ip = Some(ip);
        }
        // announce只是线上信令, 不入库
        device.announce = false;

        let now = Instant::now();
        let fingerprint = device.fingerprint.clone();

        let mut outcome = UpsertOutcome::Added;
        self.peers
            .entry(fingerprint)
            .and_modify(|record| {
                let addr_changed =
                    record.device.ip != device.ip || record.device.port != device.port;
                outcome = if addr_changed || record.device != device {
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Refreshed
                };
                // 同一指纹以后到的报文为准
                record.device = device.clone();
                record.last_seen = now;
            })
            .or_insert_with(|| PeerRecord {
                device: device.clone(),
                last_seen: now,
            });

        match outcome {
            UpsertOutcome::Added => {
                info!(
                    "发现新对端: {} ({}:{})",
                    device.alias,
                    device.ip.map(|ip| ip.to_string()).unwrap_or_default(),
                    device.port
                );
                self.send_event(PeerChange::Added(device));
            }
            UpsertOutcome::Updated => {
                debug!("对端信息更新: {}", device.alias);
                self.send_event(PeerChange::Updated(device));
            }
            UpsertOutcome::Refreshed => {}
        }

        Some(outcome)
    }

    /// 清除过期对端, 返回被逐出的指纹列表
    ///
    /// 对条目快照做单趟扫描; 扫描期间才过期的条目留待下一趟,
    /// 保证upsert与sweep互不阻塞
    pub fn sweep_expired(&self, now: Instant) -> Vec<String> {
        let stale: Vec<(String, Instant)> = self
            .peers
            .iter()
            .filter(|entry| now.duration_since(entry.last_seen) > self.timeout)
            .map(|entry| (entry.key().clone(), entry.last_seen))
            .collect();

        let mut evicted = Vec::new();
        for (fingerprint, seen_at) in stale {
            // 仅当last_seen未被并发upsert推进时才移除
            let removed = self
                .peers
                .remove_if(&fingerprint, |_, record| record.last_seen == seen_at)
                .is_some();
            if removed {
                info!("对端超时移除: {}", fingerprint);
                self.send_event(PeerChange::Removed {
                    fingerprint: fingerprint.clone(),
                });
                evicted.push(fingerprint);
            }
        }
        evicted
    }

    /// 按别名、指纹排序的对端快照(稳定顺序便于界面展示)
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> =
            self.peers.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| {
            a.device
                .alias
                .cmp(&b.device.alias)
                .then_with(|| a.device.fingerprint.cmp(&b.device.fingerprint))
        });
        records
    }

    /// 按指纹查询单个对端
    pub fn get(&self, fingerprint: &str) -> Option<PeerRecord> {
        self.peers.get(fingerprint).map(|record| record.clone())
    }

    /// 清空注册表(进程关闭时的收尾, 不发变更事件)
    pub fn clear(&self) {
        self.peers.clear();
    }

    /// 当前对端数量
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::request::Protocol;
    use std::net::Ipv4Addr;

    fn device(fingerprint: &str, alias: &str, port: u16) -> DeviceInfo {
        DeviceInfo {
            alias: alias.to_string(),
            version: "2.0".to_string(),
            device_model: None,
            device_type: None,
            fingerprint: fingerprint.to_string(),
            ip: Some(Ipv4Addr::new(10, 0, 0, 1)),
            port,
            protocol: Protocol::Http,
            download: true,
            announce: true,
        }
    }

    fn src(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn registry() -> PeerRegistry {
        PeerRegistry::new("self".to_string(), Duration::from_secs(15))
    }

    #[test]
    fn test_own_fingerprint_is_ignored() {
        let registry = registry();
        assert!(registry.upsert(device("self", "me", 53321), src(2)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_device_is_ignored() {
        let registry = registry();
        assert!(registry.upsert(device("", "x", 53321), src(2)).is_none());
        assert!(registry.upsert(device("A", "x", 0), src(2)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_source_ip_overrides_payload() {
        let registry = registry();
        let mut announced = device("A", "a", 53321);
        announced.ip = Some(Ipv4Addr::new(192, 168, 99, 99)); // 自报的假地址

        registry.upsert(announced, src(2));
        let record = registry.get("A").unwrap();
        assert_eq!(record.device.ip, Some(Ipv4Addr::new(10, 0, 0, 2)));
        // announce不入库
        assert!(!record.device.announce);
    }

    #[test]
    fn test_upsert_classification() {
        let registry = registry();

        assert_eq!(
            registry.upsert(device("A", "a", 53321), src(2)),
            Some(UpsertOutcome::Added)
        );
        // 同地址同属性 => 刷新
        assert_eq!(
            registry.upsert(device("A", "a", 53321), src(2)),
            Some(UpsertOutcome::Refreshed)
        );
        // 端口变化 => 更新
        assert_eq!(
            registry.upsert(device("A", "a", 53322), src(2)),
            Some(UpsertOutcome::Updated)
        );
        // 源IP变化 => 更新, 后到者为准
        assert_eq!(
            registry.upsert(device("A", "a", 53322), src(3)),
            Some(UpsertOutcome::Updated)
        );
        assert_eq!(
            registry.get("A").unwrap().device.ip,
            Some(Ipv4Addr::new(10, 0, 0, 3))
        );
    }

    #[test]
    fn test_last_seen_monotonic() {
        let registry = registry();
        registry.upsert(device("A", "a", 53321), src(2));
        let first = registry.get("A").unwrap().last_seen;
        registry.upsert(device("A", "a", 53321), src(2));
        let second = registry.get("A").unwrap().last_seen;
        assert!(second >= first);
    }

    #[test]
    fn test_sweep_evicts_stale_peers() {
        let registry = registry();
        registry.upsert(device("A", "a", 53321), src(2));
        registry.upsert(device("B", "b", 53321), src(3));

        // 尚未超时
        assert!(registry.sweep_expired(Instant::now()).is_empty());
        assert_eq!(registry.len(), 2);

        // 越过超时窗口
        let later = Instant::now() + Duration::from_secs(16);
        let mut evicted = registry.sweep_expired(later);
        evicted.sort();
        assert_eq!(evicted, vec!["A".to_string(), "B".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_ordering() {
        let registry = registry();
        registry.upsert(device("Z", "bob", 53321), src(2));
        registry.upsert(device("A", "bob", 53321), src(3));
        registry.upsert(device("M", "alice", 53321), src(4));

        let snapshot = registry.snapshot();
        let keys: Vec<_> = snapshot
            .iter()
            .map(|r| (r.device.alias.as_str(), r.device.fingerprint.as_str()))
            .collect();
        // 先按别名, 再按指纹
        assert_eq!(keys, vec![("alice", "M"), ("bob", "A"), ("bob", "Z")]);
    }

    #[tokio::test]
    async fn test_change_events() {
        let registry = registry();
        let mut events = registry.subscribe();

        registry.upsert(device("A", "a", 53321), src(2));
        registry.upsert(device("A", "a", 53321), src(2)); // 纯刷新, 无事件
        registry.upsert(device("A", "a", 53399), src(2));
        registry.sweep_expired(Instant::now() + Duration::from_secs(16));

        match events.recv().await.unwrap() {
            PeerChange::Added(info) => assert_eq!(info.fingerprint, "A"),
            other => panic!("unexpected event: {:?}", other),
        }
        match events.recv().await.unwrap() {
            PeerChange::Updated(info) => assert_eq!(info.port, 53399),
            other => panic!("unexpected event: {:?}", other),
        }
        match events.recv().await.unwrap() {
            PeerChange::Removed { fingerprint } => assert_eq!(fingerprint, "A"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
