//! 错误类型定义
//!
//! 分类原则（与错误处理设计一致）：
//! - 校验类错误（加自己为好友、查无此人等）→ 独立变体，界面内联提示，不重试
//! - 远程调用失败（网络/数据库）→ Backend / Transport，不自动重试，永不致命
//! - 上传失败 → 中止本次发送并恢复输入状态
//! - 订阅断开 → SubscriptionClosed（本层不做重连/退避）

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DuochatSDKError {
    /// 无效输入（空邮箱、超限附件等）
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 记录不存在
    #[error("Not found: {0}")]
    NotFound(String),

    /// 按邮箱查找用户无结果
    #[error("No user found with email: {0}")]
    UserNotFound(String),

    /// 不能向自己发送好友请求
    #[error("Cannot send a friend request to yourself")]
    SelfFriendRequest,

    /// 双方已是好友
    #[error("Already friends with this user")]
    AlreadyFriends,

    /// 已存在待处理的好友请求
    #[error("A friend request is already pending")]
    RequestAlreadyPending,

    /// 非法操作（如非被请求方回应好友请求）
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// 远程数据访问失败（查询/插入/更新）
    #[error("Backend error: {0}")]
    Backend(String),

    /// 传输层错误（HTTP 等）
    #[error("Transport error: {0}")]
    Transport(String),

    /// 附件上传失败
    #[error("Upload failed: {0}")]
    Upload(String),

    /// 序列化/反序列化失败
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 变更订阅已关闭（发送端被丢弃）
    #[error("Change subscription closed")]
    SubscriptionClosed,

    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for DuochatSDKError {
    fn from(error: serde_json::Error) -> Self {
        DuochatSDKError::Serialization(error.to_string())
    }
}

impl From<reqwest::Error> for DuochatSDKError {
    fn from(error: reqwest::Error) -> Self {
        DuochatSDKError::Transport(error.to_string())
    }
}

impl DuochatSDKError {
    /// 是否为校验类错误（界面内联提示即可，无需重试路径）
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DuochatSDKError::InvalidInput(_)
                | DuochatSDKError::UserNotFound(_)
                | DuochatSDKError::SelfFriendRequest
                | DuochatSDKError::AlreadyFriends
                | DuochatSDKError::RequestAlreadyPending
        )
    }
}

pub type Result<T> = std::result::Result<T, DuochatSDKError>;
