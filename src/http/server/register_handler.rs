use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use log::debug;

use crate::agent::LanShareService;
use crate::dto::request::DeviceInfo;
use crate::dto::response::{ApiResponse, RegisterAck};
use crate::http::REGISTER_PATH;

/// 处理公告响应注册
///
/// 请求体为对端的DeviceInfo; JSON格式错误或指纹缺失一律400。
/// 入库时以请求源地址为权威, 覆盖载荷中自报的IP。
async fn handle_register(
    State(service): State<Arc<LanShareService>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    // 手工解析请求体, 保证畸形JSON统一映射为400
    let device: DeviceInfo = match serde_json::from_slice(&body) {
        Ok(device) => device,
        Err(e) => {
            debug!("注册请求JSON无效 (来自 {}): {}", addr, e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<()>::error("invalid JSON format".to_string())),
            )
                .into_response();
        }
    };

    if !device.is_valid() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error(
                "missing or invalid device info".to_string(),
            )),
        )
            .into_response();
    }

    debug!(
        "收到 {} 的注册 ({}:{})",
        device.alias,
        addr.ip(),
        device.port
    );
    service.registry.upsert(device, addr.ip());

    (StatusCode::OK, Json(RegisterAck::received())).into_response()
}

/// 注册公告响应路由
pub fn register() -> Router<Arc<LanShareService>> {
    Router::new().route(REGISTER_PATH, post(handle_register))
}
