use async_trait::async_trait;
use log::warn;
use tokio::sync::{mpsc, oneshot};

use crate::dto::request::TransferOffer;

/// 用户对一次传输要约的裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentDecision {
    Accept,
    Decline,
}

/// 用户裁决提供者 - 传输引擎与界面层之间的唯一耦合点
///
/// `/send-request`处理器会在HTTP交换内等待本方法返回(带超时);
/// 实现侧可以弹出确认对话框, 也可以无人值守地自动裁决
#[async_trait]
pub trait ConsentProvider: Send + Sync {
    async fn request_consent(&self, offer: &TransferOffer) -> ConsentDecision;
}

/// 自动接受所有要约(无人值守部署)
pub struct AutoAccept;

#[async_trait]
impl ConsentProvider for AutoAccept {
    async fn request_consent(&self, _offer: &TransferOffer) -> ConsentDecision {
        ConsentDecision::Accept
    }
}

/// 自动拒绝所有要约
pub struct AutoDecline;

#[async_trait]
impl ConsentProvider for AutoDecline {
    async fn request_consent(&self, _offer: &TransferOffer) -> ConsentDecision {
        ConsentDecision::Decline
    }
}

/// 送交界面层裁决的单个请求
pub struct ConsentRequest {
    pub offer: TransferOffer,
    pub reply: oneshot::Sender<ConsentDecision>,
}

/// 以通道为前端的裁决提供者 - 请求入队, 由界面层消费并应答
///
/// 界面层持有`mpsc::Receiver<ConsentRequest>`, 对每个请求调用
/// `reply.send(...)`; 通道关闭或应答被丢弃时按拒绝处理
pub struct ChannelConsent {
    sender: mpsc::Sender<ConsentRequest>,
}

impl ChannelConsent {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ConsentRequest>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ConsentProvider for ChannelConsent {
    async fn request_consent(&self, offer: &TransferOffer) -> ConsentDecision {
        let (reply, response) = oneshot::channel();
        let request = ConsentRequest {
            offer: offer.clone(),
            reply,
        };

        if self.sender.send(request).await.is_err() {
            warn!("裁决通道已关闭, 按拒绝处理");
            return ConsentDecision::Decline;
        }

        response.await.unwrap_or(ConsentDecision::Decline)
    }
}
