mod register_client;
mod transfer_client;

use std::time::Duration;

use reqwest::{Client, ClientBuilder};

use crate::error::{BreezeError, Result};

/// 建立TCP连接的超时
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `/register`响应超时(发现链路, 必须短)
pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

/// `/send-request`响应超时
pub const SEND_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// `/send`上传超时(大文件流式传输)
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// HTTP 客户端 - 用于与其他设备通信
///
/// 超时按端点逐请求设置; 对端普遍使用自签名证书, 因此放开证书校验
pub struct HttpClient {
    pub client: Client,
}

impl HttpClient {
    /// 创建新的 HTTP 客户端
    pub fn new() -> Result<Self> {
        let client = ClientBuilder::new()
            .danger_accept_invalid_certs(true) // 允许自签名证书
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BreezeError::NetworkError(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self { client })
    }
}
