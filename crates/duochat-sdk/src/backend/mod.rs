//! 后端能力抽象 - 远程数据访问 / 变更订阅 / 文件存储
//!
//! 本层没有自己的服务器，所有"逻辑"都是对平台 SDK 通用查询的
//! 直接透传。这里把消费到的三种能力固化为 trait：
//! - [`RemoteStore`] - 面向行的远程数据访问（过滤查询、插入、更新）
//! - [`ChangeFeed`] - 按表订阅的实时变更通知
//! - [`BlobStore`] - 附件上传，返回可公开访问的 URL
//!
//! 鉴权身份（当前用户的 Profile）由账号子系统给出，在 SDK 构造时
//! 注入，不在这里抽象。

pub mod http_blob;
pub mod memory;
pub mod query;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::warn;

use crate::entities::{
    Friendship, FriendshipId, FriendshipPatch, Message, MessagePatch, NewFriendship, NewMessage,
    Profile,
};
use crate::error::{DuochatSDKError, Result};
use query::{Column, Filter, Query, Selectable, Value};

/// 远端数据表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Profiles,
    Friendships,
    Messages,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Friendships => "friendships",
            Table::Messages => "messages",
        }
    }
}

/// 行级变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// 变更事件携带的行
#[derive(Debug, Clone)]
pub enum ChangeRow {
    Profile(Profile),
    Friendship(Friendship),
    Message(Message),
}

impl ChangeRow {
    pub fn table(&self) -> Table {
        match self {
            ChangeRow::Profile(_) => Table::Profiles,
            ChangeRow::Friendship(_) => Table::Friendships,
            ChangeRow::Message(_) => Table::Messages,
        }
    }

    fn column_value(&self, column: Column) -> Option<Value> {
        match self {
            ChangeRow::Profile(row) => row.column_value(column),
            ChangeRow::Friendship(row) => row.column_value(column),
            ChangeRow::Message(row) => row.column_value(column),
        }
    }
}

/// 一条行级变更通知
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub row: ChangeRow,
}

impl ChangeEvent {
    pub fn table(&self) -> Table {
        self.row.table()
    }
}

/// 面向行的远程数据访问能力
///
/// 查询形状见 [`query`]：等值/不等值过滤、AND/OR 组合、排序、限制条数。
/// 每个方法要么返回受影响的行，要么返回错误；不提供事务，跨多次调用的
/// 流程（先查后插）不具原子性。
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn query_profiles(&self, query: Query) -> Result<Vec<Profile>>;

    async fn query_friendships(&self, query: Query) -> Result<Vec<Friendship>>;

    async fn query_messages(&self, query: Query) -> Result<Vec<Message>>;

    /// 满足过滤条件的消息条数（head count，不取行）
    async fn count_messages(&self, filter: Filter) -> Result<u64>;

    /// 插入一条好友关系，返回服务端赋值后的完整行
    async fn insert_friendship(&self, row: NewFriendship) -> Result<Friendship>;

    /// 按 id 更新一条好友关系
    async fn update_friendship(
        &self,
        id: FriendshipId,
        patch: FriendshipPatch,
    ) -> Result<Friendship>;

    /// 插入一条消息，返回服务端赋值后的完整行（真实 id、权威时间戳）
    async fn insert_message(&self, row: NewMessage) -> Result<Message>;

    /// 批量更新满足条件的消息，返回受影响行数
    async fn update_messages(&self, filter: Filter, patch: MessagePatch) -> Result<u64>;
}

/// 实时变更订阅能力
///
/// 订阅按表订阅，可选单列等值过滤；返回的 [`ChangeSubscription`]
/// 是作用域资源：持有期间接收事件，丢弃即取消。
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(
        &self,
        table: Table,
        filter: Option<(Column, Value)>,
    ) -> Result<ChangeSubscription>;
}

/// 附件上传能力
///
/// `path` 由调用方给出命名空间（friendship_id/随机文件名），
/// 返回持久的公开访问 URL，原样写到消息行上。
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, content_type: &str, data: Bytes) -> Result<String>;
}

/// 完整后端 = 数据访问 + 变更订阅
pub trait Backend: RemoteStore + ChangeFeed {}

impl<T: RemoteStore + ChangeFeed> Backend for T {}

/// 一次活跃的变更订阅
///
/// 在接收端做表/列匹配，不匹配的事件安静跳过；落后于广播缓冲
/// （Lagged）时丢弃错过的事件继续接收；消费方本来就以"收到任何
/// 事件就全量重读"的方式使用它。
pub struct ChangeSubscription {
    receiver: broadcast::Receiver<ChangeEvent>,
    table: Table,
    filter: Option<(Column, Value)>,
}

impl ChangeSubscription {
    pub fn new(
        receiver: broadcast::Receiver<ChangeEvent>,
        table: Table,
        filter: Option<(Column, Value)>,
    ) -> Self {
        Self {
            receiver,
            table,
            filter,
        }
    }

    /// 接收下一条匹配本订阅的变更；发送端关闭时返回 SubscriptionClosed
    pub async fn recv(&mut self) -> Result<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("变更订阅落后，丢弃 {} 条事件", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(DuochatSDKError::SubscriptionClosed);
                }
            }
        }
    }

    fn accepts(&self, event: &ChangeEvent) -> bool {
        if event.table() != self.table {
            return false;
        }
        match &self.filter {
            None => true,
            Some((column, value)) => event.row.column_value(*column).as_ref() == Some(value),
        }
    }
}
