use std::net::{IpAddr, Ipv4Addr};

use log::{debug, warn};

/// 常见虚拟网卡的名称前缀(容器网桥、虚拟机、隧道等不参与LAN发现)
const VIRTUAL_PREFIXES: &[&str] = &[
    "docker", "veth", "br-", "virbr", "vmnet", "vbox", "tun", "tap", "zt", "tailscale",
];

fn is_virtual_name(name: &str) -> bool {
    VIRTUAL_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// 枚举候选的本机IPv4地址: 启用、非回环、非虚拟接口上的地址
fn candidate_addresses() -> Vec<(String, Ipv4Addr)> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("枚举网络接口失败: {}", e);
            return Vec::new();
        }
    };

    interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback() && !is_virtual_name(&iface.name))
        .filter_map(|iface| match iface.ip() {
            IpAddr::V4(ip) if !ip.is_link_local() => Some((iface.name, ip)),
            _ => None,
        })
        .collect()
}

/// 选出最适合对外公告的本机IPv4地址
///
/// 优先站点本地(私有)地址, 其次任意非回环IPv4; 找不到则返回None,
/// 由启动流程作为致命错误上抛
pub fn pick_local_ipv4() -> Option<Ipv4Addr> {
    let candidates = candidate_addresses();

    let picked = candidates
        .iter()
        .find(|(_, ip)| ip.is_private())
        .or_else(|| candidates.first())
        .map(|(name, ip)| {
            debug!("选用本机地址: {} (接口 {})", ip, name);
            *ip
        });

    picked
}

/// 选出加入多播组时使用的接口地址
///
/// 没有合适接口时退回`0.0.0.0`, 把接口选择交给操作系统
pub fn multicast_interface() -> Ipv4Addr {
    pick_local_ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED)
}
