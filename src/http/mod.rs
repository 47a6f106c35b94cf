pub mod client;
pub mod server;

/// HTTP API基础路径(与LocalSend v2保持一致)
pub const API_BASE_PATH: &str = "/api/localsend/v1";

/// 自身信息查询
pub const INFO_PATH: &str = "/api/localsend/v1/info";

/// 公告响应注册
pub const REGISTER_PATH: &str = "/api/localsend/v1/register";

/// 传输要约
pub const SEND_REQUEST_PATH: &str = "/api/localsend/v1/send-request";

/// 文件字节流上传
pub const SEND_FILE_PATH: &str = "/api/localsend/v1/send";

/// 会话ID请求头
pub const SESSION_ID_HEADER: &str = "X-Session-ID";

/// 文件ID请求头
pub const FILE_ID_HEADER: &str = "X-File-ID";
