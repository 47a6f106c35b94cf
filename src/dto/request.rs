use std::collections::HashMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// 设备类型枚举 - 对端在公告中自报的设备形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Desktop,
    Web,
    Headless,
    Server,
}

/// 传输层协议选择("http" 或 "https")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    /// 返回URL scheme字符串
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

fn default_download() -> bool {
    true
}

/// 实现方:(发送方, 接收方)
/// 设备信息 - 多播公告与HTTP注册共用的报文体
/// UDP多播数据报的载荷即为本结构的UTF-8 JSON编码;
/// `announce=true` 表示主动公告(期待响应), `announce=false` 表示响应或刷新(不再回应)。
/// 未知字段一律忽略, 以兼容其他LocalSend v2实现。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// 设备别名(展示用)
    pub alias: String,
    /// 协议版本, 固定为"2.0"
    pub version: String,
    /// 设备型号(如操作系统名), 可缺省
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
    /// 设备类型, 可缺省
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    /// 实例指纹 - 进程级唯一随机标识, 对端身份的主键
    pub fingerprint: String,
    /// IPv4地址; 接收侧始终以数据包源地址覆盖该字段
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Addr>,
    /// HTTP服务端口
    pub port: u16,
    /// 传输层协议
    pub protocol: Protocol,
    /// 是否接收文件(download能力开关)
    #[serde(default = "default_download")]
    pub download: bool,
    /// 是否为主动公告; 仅在线上传输中有意义, 入库前恒置为false
    #[serde(default)]
    pub announce: bool,
}

impl DeviceInfo {
    /// 报文有效性检查: 指纹非空且端口在合法区间
    pub fn is_valid(&self) -> bool {
        !self.fingerprint.is_empty() && self.port != 0
    }

    /// 对端HTTP服务的基础URL, 如 `http://10.0.0.2:53321`
    pub fn base_url(&self) -> Option<String> {
        self.ip
            .map(|ip| format!("{}://{}:{}", self.protocol.scheme(), ip, self.port))
    }
}

/// 实现方:(发送方)
/// 单个待传文件的元数据, 由发送方生成并随offer一次性下发
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// 文件ID - 在所属offer内唯一
    pub id: String,
    /// 文件名(接收侧落盘前会做净化)
    pub file_name: String,
    /// 文件大小(字节)
    pub size: u64,
    /// MIME类型提示, 可缺省
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

/// 实现方:(发送方)
/// 传输要约 - POST /api/localsend/v1/send-request 的请求体
/// `info` 为发送方设备信息, `files` 为 fileId -> FileMetadata 的映射(至少一项)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOffer {
    /// 发送方设备信息
    pub info: DeviceInfo,
    /// 要传输的文件集合
    pub files: HashMap<String, FileMetadata>,
}

impl TransferOffer {
    /// 要约有效性检查: 发送方信息合法且文件列表非空
    pub fn is_valid(&self) -> bool {
        self.info.is_valid() && !self.files.is_empty()
    }

    /// 要约内全部文件的总字节数
    pub fn total_size(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }
}
