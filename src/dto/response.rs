use serde::{Deserialize, Serialize};

/// 实现方:(接收方)
/// 注册确认 - POST /api/localsend/v1/register 的响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAck {
    /// 固定为"received"
    pub status: String,
}

impl RegisterAck {
    pub fn received() -> Self {
        Self {
            status: "received".to_string(),
        }
    }
}

/// 实现方:(接收方)
/// 要约裁决 - POST /api/localsend/v1/send-request 的响应体
/// 接受时status为"accepted"且携带sessionId; 拒绝时status为"declined"(HTTP 403)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequestReply {
    /// "accepted" 或 "declined"
    pub status: String,
    /// 接受时由接收方铸造的会话ID
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl SendRequestReply {
    pub fn accepted(session_id: String) -> Self {
        Self {
            status: "accepted".to_string(),
            session_id: Some(session_id),
        }
    }

    pub fn declined() -> Self {
        Self {
            status: "declined".to_string(),
            session_id: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == "accepted" && self.session_id.is_some()
    }
}

/// 实现方:(接收方)
/// 单文件接收确认 - POST /api/localsend/v1/send 的响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAck {
    /// 固定为"file_received_ok"
    pub status: String,
}

impl SendAck {
    pub fn ok() -> Self {
        Self {
            status: "file_received_ok".to_string(),
        }
    }
}

/// 通用错误响应包装
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
        }
    }
}
