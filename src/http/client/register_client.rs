use reqwest::StatusCode;

use crate::dto::request::DeviceInfo;
use crate::error::{BreezeError, Result};
use crate::http::REGISTER_PATH;
use crate::http::client::{HttpClient, REGISTER_TIMEOUT};

impl HttpClient {
    /// 向对端注册本机信息
    ///
    /// 公告响应的主通道: 收到`announce=true`后把自己的`announce=false`
    /// DeviceInfo POST给公告方
    pub async fn register(&self, peer: &DeviceInfo, payload: &DeviceInfo) -> Result<()> {
        let base = peer
            .base_url()
            .ok_or_else(|| BreezeError::PeerNotFound(peer.fingerprint.clone()))?;
        let url = format!("{}{}", base, REGISTER_PATH);

        let response = self
            .client
            .post(&url)
            .json(payload)
            .timeout(REGISTER_TIMEOUT)
            .send()
            .await
            .map_err(|e| BreezeError::NetworkError(format!("注册请求发送失败: {}", e)))?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(BreezeError::NetworkError(format!(
                "注册请求失败，状态码: {}",
                response.status()
            )))
        }
    }
}
