//! HTTP平面的端到端场景测试
//!
//! 在127.0.0.1上起真实服务器, 用reqwest走完整的
//! 注册/要约/上传/失败路径; 不涉及多播发现

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};

use breeze_send::agent::LanShareService;
use breeze_send::consent::{AutoAccept, AutoDecline, ConsentProvider};
use breeze_send::ShareService;
use breeze_send::dto::request::{DeviceInfo, FileMetadata, Protocol, TransferOffer};
use breeze_send::error::BreezeError;
use breeze_send::http::server;
use breeze_send::session::SessionState;
use breeze_send::types::ShareServiceConfig;

/// 起一个只含HTTP平面的接收端(不启动发现), 返回服务、基础URL与停机句柄
async fn spawn_receiver(
    consent: Arc<dyn ConsentProvider>,
    download_dir: PathBuf,
) -> (Arc<LanShareService>, String, watch::Sender<bool>) {
    let config = ShareServiceConfig {
        http_port: 0,
        download_dir,
        ..Default::default()
    };
    let service = LanShareService::create(config, consent).unwrap();

    let (ready_tx, ready_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server::start(Arc::clone(&service), ready_tx, shutdown_rx));

    let addr = ready_rx.await.expect("server failed to bind");
    service
        .identity
        .set_bound_address(Ipv4Addr::LOCALHOST, addr.port());

    let base_url = format!("http://127.0.0.1:{}", addr.port());
    (service, base_url, shutdown_tx)
}

fn sender_device(fingerprint: &str, port: u16) -> DeviceInfo {
    DeviceInfo {
        alias: format!("peer-{}", fingerprint),
        version: "2.0".to_string(),
        device_model: Some("linux".to_string()),
        device_type: None,
        fingerprint: fingerprint.to_string(),
        ip: Some(Ipv4Addr::LOCALHOST),
        port,
        protocol: Protocol::Http,
        download: true,
        announce: false,
    }
}

fn offer_with_files(fingerprint: &str, files: &[(&str, &str, u64)]) -> TransferOffer {
    let files: HashMap<String, FileMetadata> = files
        .iter()
        .map(|(id, name, size)| {
            (
                id.to_string(),
                FileMetadata {
                    id: id.to_string(),
                    file_name: name.to_string(),
                    size: *size,
                    file_type: None,
                },
            )
        })
        .collect();
    TransferOffer {
        info: sender_device(fingerprint, 40001),
        files,
    }
}

async fn post_send_request(
    client: &reqwest::Client,
    base_url: &str,
    offer: &TransferOffer,
) -> reqwest::Response {
    client
        .post(format!("{}/api/localsend/v1/send-request", base_url))
        .json(offer)
        .send()
        .await
        .unwrap()
}

async fn post_file(
    client: &reqwest::Client,
    base_url: &str,
    session_id: &str,
    file_id: &str,
    body: Vec<u8>,
) -> reqwest::Response {
    client
        .post(format!("{}/api/localsend/v1/send", base_url))
        .header("Content-Type", "application/octet-stream")
        .header("X-Session-ID", session_id)
        .header("X-File-ID", file_id)
        .body(body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_info_returns_fresh_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let (service, base_url, _shutdown) =
        spawn_receiver(Arc::new(AutoAccept), dir.path().to_path_buf()).await;

    let response = reqwest::get(format!("{}/api/localsend/v1/info", base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let info: DeviceInfo = response.json().await.unwrap();
    assert_eq!(info.fingerprint, service.local_device().fingerprint);
    assert_eq!(info.version, "2.0");
    assert!(!info.announce);
}

#[tokio::test]
async fn test_register_updates_registry_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let (service, base_url, _shutdown) =
        spawn_receiver(Arc::new(AutoAccept), dir.path().to_path_buf()).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/localsend/v1/register", base_url);

    // 同一指纹重复注册只保留一条记录
    for _ in 0..3 {
        let response = client
            .post(&url)
            .json(&sender_device("B", 40001))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "received");
    }
    assert_eq!(service.registry.len(), 1);

    // 源地址覆盖载荷里自报的IP
    let record = service.registry.get("B").unwrap();
    assert_eq!(record.device.ip, Some(Ipv4Addr::LOCALHOST));

    // 畸形JSON与缺指纹的报文一律400
    let response = client.post(&url).body("{not json").send().await.unwrap();
    assert_eq!(response.status(), 400);

    let response = client
        .post(&url)
        .body(r#"{"alias":"x","version":"2.0","port":1,"protocol":"http"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_declined_offer_creates_no_session() {
    let dir = tempfile::tempdir().unwrap();
    let (service, base_url, _shutdown) =
        spawn_receiver(Arc::new(AutoDecline), dir.path().to_path_buf()).await;
    let client = reqwest::Client::new();

    let offer = offer_with_files("B", &[("f1", "x.txt", 10)]);
    let response = post_send_request(&client, &base_url, &offer).await;
    assert_eq!(response.status(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "declined");
    assert!(body.get("sessionId").is_none());
    assert!(service.sessions.is_empty());

    // 任何sessionId此时都应404
    let response = post_file(&client, &base_url, "whatever", "f1", b"HELLOWORLD".to_vec()).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_invalid_offers_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_service, base_url, _shutdown) =
        spawn_receiver(Arc::new(AutoAccept), dir.path().to_path_buf()).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/localsend/v1/send-request", base_url);

    // 畸形JSON
    let response = client.post(&url).body("###").send().await.unwrap();
    assert_eq!(response.status(), 400);

    // 空文件列表
    let offer = offer_with_files("B", &[]);
    let response = post_send_request(&client, &base_url, &offer).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_accept_and_upload() {
    let dir = tempfile::tempdir().unwrap();
    let (service, base_url, _shutdown) =
        spawn_receiver(Arc::new(AutoAccept), dir.path().to_path_buf()).await;
    let client = reqwest::Client::new();

    let offer = offer_with_files("B", &[("f1", "x.txt", 10)]);
    let response = post_send_request(&client, &base_url, &offer).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "accepted");
    let session_id = body["sessionId"].as_str().unwrap().to_string();

    let response = post_file(&client, &base_url, &session_id, "f1", b"HELLOWORLD".to_vec()).await;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "file_received_ok");

    let written = std::fs::read(dir.path().join("x.txt")).unwrap();
    assert_eq!(written, b"HELLOWORLD");

    let session = service.sessions.get(&session_id).unwrap();
    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.progress["f1"].bytes_received, 10);
}

#[tokio::test]
async fn test_upload_size_mismatch_fails_session() {
    let dir = tempfile::tempdir().unwrap();
    let (service, base_url, _shutdown) =
        spawn_receiver(Arc::new(AutoAccept), dir.path().to_path_buf()).await;
    let client = reqwest::Client::new();

    let offer = offer_with_files("B", &[("f1", "x.txt", 10)]);
    let body: serde_json::Value = post_send_request(&client, &base_url, &offer)
        .await
        .json()
        .await
        .unwrap();
    let session_id = body["sessionId"].as_str().unwrap().to_string();

    // 只送7个字节就断流
    let response = post_file(&client, &base_url, &session_id, "f1", b"HELLOWO".to_vec()).await;
    assert_eq!(response.status(), 500);

    // 半截文件被删除, 会话进入Failed
    assert!(!dir.path().join("x.txt").exists());
    assert_eq!(
        service.sessions.get(&session_id).unwrap().state,
        SessionState::Failed
    );

    // 失败会话不再接受上传
    let response = post_file(&client, &base_url, &session_id, "f1", b"HELLOWORLD".to_vec()).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_zero_byte_file() {
    let dir = tempfile::tempdir().unwrap();
    let (service, base_url, _shutdown) =
        spawn_receiver(Arc::new(AutoAccept), dir.path().to_path_buf()).await;
    let client = reqwest::Client::new();

    let offer = offer_with_files("B", &[("f1", "empty.bin", 0)]);
    let body: serde_json::Value = post_send_request(&client, &base_url, &offer)
        .await
        .json()
        .await
        .unwrap();
    let session_id = body["sessionId"].as_str().unwrap().to_string();

    let response = post_file(&client, &base_url, &session_id, "f1", Vec::new()).await;
    assert_eq!(response.status(), 200);

    let written = std::fs::read(dir.path().join("empty.bin")).unwrap();
    assert!(written.is_empty());
    assert_eq!(
        service.sessions.get(&session_id).unwrap().state,
        SessionState::Completed
    );
}

#[tokio::test]
async fn test_missing_headers_and_unknown_ids() {
    let dir = tempfile::tempdir().unwrap();
    let (_service, base_url, _shutdown) =
        spawn_receiver(Arc::new(AutoAccept), dir.path().to_path_buf()).await;
    let client = reqwest::Client::new();

    // 缺少头部
    let response = client
        .post(format!("{}/api/localsend/v1/send", base_url))
        .body(b"HELLOWORLD".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // 未知会话
    let response = post_file(&client, &base_url, "no-session", "f1", b"X".to_vec()).await;
    assert_eq!(response.status(), 404);

    // 已接受会话里不存在的文件ID
    let offer = offer_with_files("B", &[("f1", "x.txt", 1)]);
    let body: serde_json::Value = post_send_request(&client, &base_url, &offer)
        .await
        .json()
        .await
        .unwrap();
    let session_id = body["sessionId"].as_str().unwrap().to_string();
    let response = post_file(&client, &base_url, &session_id, "f2", b"X".to_vec()).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_path_traversal_is_sanitized() {
    let dir = tempfile::tempdir().unwrap();
    let (_service, base_url, _shutdown) =
        spawn_receiver(Arc::new(AutoAccept), dir.path().to_path_buf()).await;
    let client = reqwest::Client::new();

    let offer = offer_with_files("B", &[("f1", "../../escape.txt", 4)]);
    let body: serde_json::Value = post_send_request(&client, &base_url, &offer)
        .await
        .json()
        .await
        .unwrap();
    let session_id = body["sessionId"].as_str().unwrap().to_string();

    let response = post_file(&client, &base_url, &session_id, "f1", b"evil".to_vec()).await;
    assert_eq!(response.status(), 200);

    // 文件只保留最后一个路径分量, 落在下载目录内
    assert!(dir.path().join("escape.txt").exists());
    assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
}

#[tokio::test]
async fn test_name_collision_gets_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let (_service, base_url, _shutdown) =
        spawn_receiver(Arc::new(AutoAccept), dir.path().to_path_buf()).await;
    let client = reqwest::Client::new();

    for expected in ["report.pdf", "report-1.pdf"] {
        let offer = offer_with_files("B", &[("f1", "report.pdf", 3)]);
        let body: serde_json::Value = post_send_request(&client, &base_url, &offer)
            .await
            .json()
            .await
            .unwrap();
        let session_id = body["sessionId"].as_str().unwrap().to_string();

        let response = post_file(&client, &base_url, &session_id, "f1", b"PDF".to_vec()).await;
        assert_eq!(response.status(), 200);
        assert!(dir.path().join(expected).exists());
    }
}

#[tokio::test]
async fn test_sender_pipeline_end_to_end() {
    // 接收端A: 真实HTTP服务器 + 自动接受
    let dir = tempfile::tempdir().unwrap();
    let (receiver, base_url, _shutdown) =
        spawn_receiver(Arc::new(AutoAccept), dir.path().to_path_buf()).await;
    let receiver_port: u16 = base_url.rsplit(':').next().unwrap().parse().unwrap();

    // 发送端B: 不起服务器, 手工登记对端A
    let sender = LanShareService::create(
        ShareServiceConfig::default(),
        Arc::new(AutoDecline),
    )
    .unwrap();
    sender
        .identity
        .set_bound_address(Ipv4Addr::LOCALHOST, 40002);

    let receiver_fingerprint = receiver.local_device().fingerprint;
    sender.registry.upsert(
        sender_device(&receiver_fingerprint, receiver_port),
        Ipv4Addr::LOCALHOST.into(),
    );

    // 待发送文件
    let payload_dir = tempfile::tempdir().unwrap();
    let file_path = payload_dir.path().join("notes.txt");
    std::fs::write(&file_path, b"sent across the wire").unwrap();

    let session_id = sender
        .send_paths(&receiver_fingerprint, vec![file_path])
        .await
        .unwrap();

    // 文件在A侧完整落盘, 会话完成
    let written = std::fs::read(dir.path().join("notes.txt")).unwrap();
    assert_eq!(written, b"sent across the wire");
    assert_eq!(
        receiver.sessions.get(&session_id).unwrap().state,
        SessionState::Completed
    );
}

#[tokio::test]
async fn test_sender_gets_declined_error() {
    let dir = tempfile::tempdir().unwrap();
    let (_receiver, base_url, _shutdown) =
        spawn_receiver(Arc::new(AutoDecline), dir.path().to_path_buf()).await;
    let receiver_port: u16 = base_url.rsplit(':').next().unwrap().parse().unwrap();

    let sender = LanShareService::create(
        ShareServiceConfig::default(),
        Arc::new(AutoDecline),
    )
    .unwrap();
    sender
        .identity
        .set_bound_address(Ipv4Addr::LOCALHOST, 40003);
    sender.registry.upsert(
        sender_device("receiver-fp", receiver_port),
        Ipv4Addr::LOCALHOST.into(),
    );

    let payload_dir = tempfile::tempdir().unwrap();
    let file_path = payload_dir.path().join("notes.txt");
    std::fs::write(&file_path, b"unwanted").unwrap();

    let result = sender.send_paths("receiver-fp", vec![file_path]).await;
    assert!(matches!(result, Err(BreezeError::Declined(_))));
}
