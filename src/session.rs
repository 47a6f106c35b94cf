use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, info};

use crate::dto::request::{FileMetadata, TransferOffer};
use crate::error::{BreezeError, Result};
use crate::utils::gen_id;

/// 传输会话的状态机
///
/// Pending -> Accepted -> Uploading -> Completed;
/// Declined / Failed / Expired 为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Accepted,
    Uploading,
    Completed,
    Declined,
    Failed,
    Expired,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::Declined
                | SessionState::Failed
                | SessionState::Expired
        )
    }
}

/// 单个文件的接收进度
#[derive(Debug, Clone, Default)]
pub struct FileProgress {
    pub bytes_received: u64,
    pub done: bool,
}

/// 一次已受理的传输会话: 要约加上接收其文件所需的全部状态
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub session_id: String,
    pub offer: TransferOffer,
    pub peer_fingerprint: String,
    pub state: SessionState,
    /// fileId -> 进度; 不变式: bytes_received <= offer.files[fileId].size
    pub progress: HashMap<String, FileProgress>,
    /// 最近一次活动时间, 闲置过期据此判定
    pub last_activity: Instant,
    /// 进入终态的时刻, 宽限期据此判定
    pub terminal_at: Option<Instant>,
}

impl TransferSession {
    fn all_done(&self) -> bool {
        self.offer
            .files
            .keys()
            .all(|id| self.progress.get(id).map(|p| p.done).unwrap_or(false))
    }
}

/// 会话被清扫的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepReason {
    /// 非终态会话闲置超时
    Idle,
    /// 终态会话过完保留宽限期
    GraceElapsed,
}

/// 会话存储 - sessionId -> TransferSession 的权威映射
///
/// 每个会话的状态迁移在条目锁内完成, 对单个会话可线性化;
/// 不同会话之间不承诺顺序
pub struct SessionStore {
    sessions: DashMap<String, TransferSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// 受理到达的要约, 铸造全新sessionId并以Pending态入库
    pub fn insert_offer(&self, offer: TransferOffer, peer_fingerprint: String) -> Result<String> {
        if offer.files.is_empty() {
            return Err(BreezeError::ValidationError(
                "offer contains no files".to_string(),
            ));
        }

        let session_id = gen_id::generate_session_id();
        let progress = offer
            .files
            .keys()
            .map(|id| (id.clone(), FileProgress::default()))
            .collect();

        let session = TransferSession {
            session_id: session_id.clone(),
            offer,
            peer_fingerprint,
            state: SessionState::Pending,
            progress,
            last_activity: Instant::now(),
            terminal_at: None,
        };
        self.sessions.insert(session_id.clone(), session);

        Ok(session_id)
    }

    /// 会话快照
    pub fn get(&self, session_id: &str) -> Option<TransferSession> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// 用户接受要约: Pending -> Accepted
    pub fn mark_accepted(&self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) if session.state == SessionState::Pending => {
                session.state = SessionState::Accepted;
                session.last_activity = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// 移除会话(拒绝、裁决超时等场景)
    pub fn remove(&self, session_id: &str) -> Option<TransferSession> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    /// 某文件的首个字节到达: 校验会话与文件并进入Uploading态
    ///
    /// 未知会话、终态会话或未知文件ID都视作协议违例, 由调用方映射为404
    pub fn begin_file(&self, session_id: &str, file_id: &str) -> Result<FileMetadata> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| BreezeError::SessionNotFound(session_id.to_string()))?;

        if !matches!(
            session.state,
            SessionState::Accepted | SessionState::Uploading
        ) {
            return Err(BreezeError::SessionNotFound(session_id.to_string()));
        }

        let metadata = session
            .offer
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| BreezeError::FileNotFound(file_id.to_string()))?;

        session.state = SessionState::Uploading;
        session.last_activity = Instant::now();
        // 重传同一文件时从头计数
        session
            .progress
            .insert(file_id.to_string(), FileProgress::default());

        Ok(metadata)
    }

    /// 记录某文件当前已接收的总字节数
    ///
    /// 超出要约声明的大小即违反进度不变式, 返回错误由调用方中止接收
    pub fn record_progress(&self, session_id: &str, file_id: &str, bytes: u64) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| BreezeError::SessionNotFound(session_id.to_string()))?;

        let expected = session
            .offer
            .files
            .get(file_id)
            .map(|f| f.size)
            .ok_or_else(|| BreezeError::FileNotFound(file_id.to_string()))?;

        if bytes > expected {
            return Err(BreezeError::SizeMismatch {
                expected,
                actual: bytes,
            });
        }

        if let Some(progress) = session.progress.get_mut(file_id) {
            progress.bytes_received = bytes;
        }
        session.last_activity = Instant::now();
        Ok(())
    }

    /// 某文件接收完毕且字节数与要约一致
    ///
    /// 返回true表示会话内全部文件已完成, 会话随之进入Completed态
    pub fn finish_file(&self, session_id: &str, file_id: &str) -> Result<bool> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| BreezeError::SessionNotFound(session_id.to_string()))?;

        match session.progress.get_mut(file_id) {
            Some(progress) => progress.done = true,
            None => return Err(BreezeError::FileNotFound(file_id.to_string())),
        }
        session.last_activity = Instant::now();

        if session.all_done() {
            session.state = SessionState::Completed;
            session.terminal_at = Some(Instant::now());
            info!("会话全部文件接收完成: {}", session_id);
            return Ok(true);
        }
        Ok(false)
    }

    /// 接收失败(短读或本地IO错误): 会话进入Failed终态
    pub fn fail(&self, session_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.state = SessionState::Failed;
            session.terminal_at = Some(Instant::now());
        }
    }

    /// 清扫会话: 闲置超时的非终态会话标记Expired后移除,
    /// 终态会话在保留宽限期结束后移除
    pub fn sweep(
        &self,
        now: Instant,
        idle_timeout: Duration,
        grace: Duration,
    ) -> Vec<(String, SweepReason)> {
        let candidates: Vec<(String, SweepReason)> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let session = entry.value();
                if session.state.is_terminal() {
                    let elapsed = session
                        .terminal_at
                        .map(|at| now.duration_since(at))
                        .unwrap_or_default();
                    (elapsed > grace).then(|| (entry.key().clone(), SweepReason::GraceElapsed))
                } else if now.duration_since(session.last_activity) > idle_timeout {
                    Some((entry.key().clone(), SweepReason::Idle))
                } else {
                    None
                }
            })
            .collect();

        let mut removed = Vec::new();
        for (session_id, reason) in candidates {
            if let Some(mut session) = self.sessions.get_mut(&session_id) {
                if reason == SweepReason::Idle {
                    // 扫描期间可能有新活动抵达, 复核后再定
                    if session.state.is_terminal()
                        || now.duration_since(session.last_activity) <= idle_timeout
                    {
                        continue;
                    }
                    session.state = SessionState::Expired;
                }
            }
            if self.sessions.remove(&session_id).is_some() {
                debug!("会话清扫移除: {} ({:?})", session_id, reason);
                removed.push((session_id, reason));
            }
        }
        removed
    }

    /// 清空会话存储(进程关闭时的收尾)
    pub fn clear(&self) {
        self.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
