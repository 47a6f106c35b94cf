//! 无人值守演示代理
//!
//! 自动接受所有入站要约并打印发现/传输事件。
//! 在同一局域网的两台机器上各跑一个实例即可互相发现;
//! 发现对端后可在代码里调用`send_paths`发送文件。

use std::sync::Arc;

use breeze_send::create_share_service;
use breeze_send::consent::AutoAccept;
use breeze_send::dto::request::DeviceType;
use breeze_send::types::{ShareEvent, ShareServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 设置日志
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ShareServiceConfig {
        device_type: DeviceType::Headless,
        ..Default::default()
    };

    println!("创建传输服务...");
    let service = create_share_service(config, Arc::new(AutoAccept))?;
    service.start().await?;

    let local = service.local_device();
    println!(
        "本机: {} (指纹 {}..., 端口 {})",
        local.alias,
        &local.fingerprint[..8],
        local.port
    );

    let mut events = service.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ShareEvent::PeerDiscovered(peer)) => {
                    println!(
                        "发现对端: {} ({}:{})",
                        peer.alias,
                        peer.ip.map(|ip| ip.to_string()).unwrap_or_default(),
                        peer.port
                    );
                }
                Ok(ShareEvent::PeerExpired { fingerprint }) => {
                    println!("对端离线: {}", fingerprint);
                }
                Ok(ShareEvent::OfferReceived { offer, .. }) => {
                    println!(
                        "收到 {} 的要约: {} 个文件, 共 {} 字节",
                        offer.info.alias,
                        offer.files.len(),
                        offer.total_size()
                    );
                }
                Ok(ShareEvent::FileReceived { path, .. }) => {
                    println!("收到文件: {}", path.display());
                }
                Ok(ShareEvent::SessionCompleted { session_id }) => {
                    println!("会话完成: {}", session_id);
                }
                Ok(other) => {
                    println!("事件: {:?}", other);
                }
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("正在关闭...");
                service.shutdown().await?;
                break;
            }
        }
    }

    Ok(())
}
