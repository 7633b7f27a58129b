//! 数据实体定义 - 对应远端数据表结构
//!
//! 这里定义了远端三张表（profiles / friendships / messages）对应的
//! Rust 结构体，以及派生的会话列表条目，用于：
//! - 类型安全的数据传输
//! - 统一的数据表示
//! - 序列化/反序列化支持
//!
//! 行结构体与写入结构体分开：`Friendship` 是服务端返回的完整行，
//! `NewFriendship` / `FriendshipPatch` 是插入 / 更新载荷。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attachment::AttachmentKind;

pub type ProfileId = Uuid;
pub type FriendshipId = Uuid;
pub type MessageId = Uuid;

/// 用户资料实体 - 对应 profiles 表
///
/// 本层只读；归账号子系统所有。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub display_name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 好友关系状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendshipStatus {
    /// pending / accepted 视为活跃关系（同一对用户最多一条）
    pub fn is_active(&self) -> bool {
        matches!(self, FriendshipStatus::Pending | FriendshipStatus::Accepted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FriendshipStatus::Pending => "pending",
            FriendshipStatus::Accepted => "accepted",
            FriendshipStatus::Rejected => "rejected",
        }
    }
}

/// 好友关系实体 - 对应 friendships 表
///
/// 生命周期：请求方创建 pending；被请求方改为 accepted 或 rejected；
/// rejected 的关系可被任意一方重新发起，复用同一条记录回到 pending。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friendship {
    pub id: FriendshipId,
    pub requester_id: ProfileId,
    pub addressee_id: ProfileId,
    pub status: FriendshipStatus,
    pub created_at: DateTime<Utc>,
}

impl Friendship {
    /// 该用户是否是这条关系的一方
    pub fn involves(&self, user_id: ProfileId) -> bool {
        self.requester_id == user_id || self.addressee_id == user_id
    }

    /// 返回对方的用户 id；不是关系一方时返回 None
    pub fn counterpart_of(&self, user_id: ProfileId) -> Option<ProfileId> {
        if self.requester_id == user_id {
            Some(self.addressee_id)
        } else if self.addressee_id == user_id {
            Some(self.requester_id)
        } else {
            None
        }
    }
}

/// 好友关系插入载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFriendship {
    pub requester_id: ProfileId,
    pub addressee_id: ProfileId,
    pub status: FriendshipStatus,
}

/// 好友关系更新载荷（None 字段不更新）
///
/// rejected → pending 的重新发起需要同时换向 requester / addressee。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FriendshipPatch {
    pub status: Option<FriendshipStatus>,
    pub requester_id: Option<ProfileId>,
    pub addressee_id: Option<ProfileId>,
}

/// 消息实体 - 对应 messages 表
///
/// 创建后不可变，唯一例外是 `is_read`，只会从 false 单调翻转为 true。
/// 属于且仅属于一条好友关系；按 created_at 排序。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub friendship_id: FriendshipId,
    pub sender_id: ProfileId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub attachment_url: Option<String>,
    pub attachment_type: Option<AttachmentKind>,
}

/// 消息插入载荷（id / created_at / is_read 由服务端赋值）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub friendship_id: FriendshipId,
    pub sender_id: ProfileId,
    pub content: String,
    pub attachment_url: Option<String>,
    pub attachment_type: Option<AttachmentKind>,
}

/// 消息更新载荷（目前只有已读标记会被更新）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePatch {
    pub is_read: Option<bool>,
}

/// 会话列表条目（派生数据，不持久化）
///
/// 由 Friendship + Message 状态重算得到；`friend` 是对方的资料。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    pub friendship_id: FriendshipId,
    pub friend: Profile,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

impl ConversationItem {
    /// 排序键：最后一条消息时间，缺省回退到纪元零点（排在最后）
    pub fn sort_key(&self) -> i64 {
        self.last_message_time
            .map(|t| t.timestamp_millis())
            .unwrap_or(0)
    }
}
