use std::path::Path;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use tokio_util::io::ReaderStream;

use crate::dto::request::{DeviceInfo, TransferOffer};
use crate::dto::response::SendRequestReply;
use crate::error::{BreezeError, Result};
use crate::http::client::{HttpClient, SEND_REQUEST_TIMEOUT, UPLOAD_TIMEOUT};
use crate::http::{FILE_ID_HEADER, SEND_FILE_PATH, SEND_REQUEST_PATH, SESSION_ID_HEADER};

impl HttpClient {
    /// 发送传输要约
    ///
    /// 对端接受时返回带sessionId的应答; 对端拒绝(HTTP 403)映射为`Declined`错误
    pub async fn send_offer(
        &self,
        peer: &DeviceInfo,
        offer: &TransferOffer,
    ) -> Result<SendRequestReply> {
        let base = peer
            .base_url()
            .ok_or_else(|| BreezeError::PeerNotFound(peer.fingerprint.clone()))?;
        let url = format!("{}{}", base, SEND_REQUEST_PATH);

        let response = self
            .client
            .post(&url)
            .json(offer)
            .timeout(SEND_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| BreezeError::NetworkError(format!("传输要约发送失败: {}", e)))?;

        match response.status() {
            StatusCode::OK => {
                let reply = response
                    .json::<SendRequestReply>()
                    .await
                    .map_err(|e| BreezeError::NetworkError(format!("解析要约应答失败: {}", e)))?;
                if !reply.is_accepted() {
                    return Err(BreezeError::Declined(peer.fingerprint.clone()));
                }
                Ok(reply)
            }
            StatusCode::FORBIDDEN => Err(BreezeError::Declined(peer.fingerprint.clone())),
            status => Err(BreezeError::NetworkError(format!(
                "传输要约失败，状态码: {}",
                status
            ))),
        }
    }

    /// 上传单个文件的字节流
    ///
    /// 请求体为`application/octet-stream`, 以`X-Session-ID`/`X-File-ID`定位目标
    pub async fn upload_file(
        &self,
        peer: &DeviceInfo,
        session_id: &str,
        file_id: &str,
        path: &Path,
    ) -> Result<()> {
        let base = peer
            .base_url()
            .ok_or_else(|| BreezeError::PeerNotFound(peer.fingerprint.clone()))?;
        let url = format!("{}{}", base, SEND_FILE_PATH);

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|_| BreezeError::FileNotFound(path.display().to_string()))?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(SESSION_ID_HEADER, session_id)
            .header(FILE_ID_HEADER, file_id)
            .timeout(UPLOAD_TIMEOUT)
            .body(body)
            .send()
            .await
            .map_err(|e| BreezeError::NetworkError(format!("文件上传失败: {}", e)))?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(BreezeError::NetworkError(format!(
                "文件上传失败，状态码: {}",
                response.status()
            )))
        }
    }
}
