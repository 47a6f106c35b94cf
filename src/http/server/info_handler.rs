use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use crate::agent::LanShareService;
use crate::http::INFO_PATH;

/// 返回本机设备信息的新鲜快照 (announce恒为false)
async fn get_info(State(service): State<Arc<LanShareService>>) -> impl IntoResponse {
    (StatusCode::OK, Json(service.identity.device_info(false)))
}

/// 注册信息查询路由
pub fn register() -> Router<Arc<LanShareService>> {
    Router::new().route(INFO_PATH, get(get_info))
}
