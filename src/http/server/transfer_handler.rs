use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::io::AsyncWriteExt;

use crate::agent::{LanShareService, OfferOutcome};
use crate::dto::request::TransferOffer;
use crate::dto::response::{ApiResponse, SendAck, SendRequestReply};
use crate::error::{BreezeError, Result};
use crate::http::{FILE_ID_HEADER, SEND_FILE_PATH, SEND_REQUEST_PATH, SESSION_ID_HEADER};
use crate::types::ShareEvent;
use crate::utils::file::{resolve_collision, sanitize_file_name};

/// 处理传输要约
///
/// 在本次HTTP交换内同步等待用户裁决(带超时);
/// 接受返回200+sessionId, 拒绝或裁决超时返回403
async fn handle_send_request(
    State(service): State<Arc<LanShareService>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let offer: TransferOffer = match serde_json::from_slice(&body) {
        Ok(offer) => offer,
        Err(e) => {
            debug!("要约JSON无效 (来自 {}): {}", addr, e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<()>::error("invalid JSON format".to_string())),
            )
                .into_response();
        }
    };

    if !offer.is_valid() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error(
                "missing sender info or empty file list".to_string(),
            )),
        )
            .into_response();
    }

    info!(
        "收到 {} 的传输要约: {} 个文件, 共 {} 字节",
        offer.info.alias,
        offer.files.len(),
        offer.total_size()
    );
    // 要约本身也是一次对端目击
    service.registry.upsert(offer.info.clone(), addr.ip());

    match service.decide_offer(offer).await {
        OfferOutcome::Accepted { session_id } => {
            (StatusCode::OK, Json(SendRequestReply::accepted(session_id))).into_response()
        }
        OfferOutcome::Declined => {
            (StatusCode::FORBIDDEN, Json(SendRequestReply::declined())).into_response()
        }
    }
}

/// 把请求体流式写入目标文件, 返回实际接收的字节数
///
/// 逐块落盘并推进会话进度; 超出要约声明大小立即中止。
/// 磁盘跟不上时, 阻塞在写入上的读取自然形成背压
async fn receive_stream(
    service: &Arc<LanShareService>,
    session_id: &str,
    file_id: &str,
    expected: u64,
    path: &Path,
    body: Body,
) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = body.into_data_stream();
    let mut received: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| BreezeError::NetworkError(format!("读取请求体失败: {}", e)))?;
        received += chunk.len() as u64;
        if received > expected {
            return Err(BreezeError::SizeMismatch {
                expected,
                actual: received,
            });
        }
        file.write_all(&chunk).await?;
        service.sessions.record_progress(session_id, file_id, received)?;
    }
    file.flush().await?;

    if received != expected {
        return Err(BreezeError::SizeMismatch {
            expected,
            actual: received,
        });
    }
    Ok(received)
}

/// 处理文件字节流上传
///
/// 以`X-Session-ID`/`X-File-ID`定位目标; 未知会话或文件返回404,
/// 字节数不符或本地IO失败返回500并删除残留文件
async fn handle_send(
    State(service): State<Arc<LanShareService>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let session_id = headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let file_id = headers
        .get(FILE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (session_id, file_id) = match (session_id, file_id) {
        (Some(session_id), Some(file_id)) => (session_id, file_id),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<()>::error(
                    "missing X-Session-ID or X-File-ID header".to_string(),
                )),
            )
                .into_response();
        }
    };

    // 校验会话与文件, 进入Uploading态
    let metadata = match service.sessions.begin_file(&session_id, &file_id) {
        Ok(metadata) => metadata,
        Err(BreezeError::SessionNotFound(_)) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::<()>::error(
                    "session not found or not accepted".to_string(),
                )),
            )
                .into_response();
        }
        Err(BreezeError::FileNotFound(_)) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::<()>::error(
                    "file id not part of the accepted session".to_string(),
                )),
            )
                .into_response();
        }
        Err(e) => {
            error!("上传预检失败: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<()>::error(e.to_string())),
            )
                .into_response();
        }
    };

    let safe_name = match sanitize_file_name(&metadata.file_name) {
        Ok(name) => name,
        Err(e) => {
            warn!("拒绝非法文件名 {:?}: {}", metadata.file_name, e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<()>::error("invalid file name".to_string())),
            )
                .into_response();
        }
    };

    // 按需创建下载目录
    let download_dir = service.config.download_dir.clone();
    if let Err(e) = tokio::fs::create_dir_all(&download_dir).await {
        error!("创建下载目录失败: {}", e);
        service.fail_session(&session_id, &file_id, &e.to_string());
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<()>::error(
                "cannot create download directory".to_string(),
            )),
        )
            .into_response();
    }
    let target = resolve_collision(&download_dir, &safe_name);

    debug!(
        "开始接收文件 {} -> {} ({} 字节)",
        file_id,
        target.display(),
        metadata.size
    );

    match receive_stream(&service, &session_id, &file_id, metadata.size, &target, body).await {
        Ok(received) => {
            info!("文件接收完成: {} ({} 字节)", target.display(), received);
            service.send_event(ShareEvent::FileReceived {
                session_id: session_id.clone(),
                file_id: file_id.clone(),
                path: target,
            });

            match service.sessions.finish_file(&session_id, &file_id) {
                Ok(all_done) => {
                    if all_done {
                        service.send_event(ShareEvent::SessionCompleted {
                            session_id: session_id.clone(),
                        });
                    }
                    (StatusCode::OK, Json(SendAck::ok())).into_response()
                }
                Err(e) => {
                    // 落盘成功但会话在此期间被清除
                    warn!("文件已落盘但会话状态更新失败: {}", e);
                    (StatusCode::OK, Json(SendAck::ok())).into_response()
                }
            }
        }
        Err(e) => {
            error!("文件接收失败 ({}): {}", file_id, e);
            // 删除残留的半截文件
            if let Err(remove_err) = tokio::fs::remove_file(&target).await {
                warn!("删除残留文件失败: {}", remove_err);
            }
            service.fail_session(&session_id, &file_id, &e.to_string());
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<()>::error(e.to_string())),
            )
                .into_response()
        }
    }
}

/// 注册传输相关路由
pub fn register() -> Router<Arc<LanShareService>> {
    Router::new()
        // 传输要约
        .route(SEND_REQUEST_PATH, post(handle_send_request))
        // 文件字节流
        .route(SEND_FILE_PATH, post(handle_send))
}
