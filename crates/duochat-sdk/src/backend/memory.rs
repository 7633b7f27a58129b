//! 内存后端 - trait 契约的参考实现与测试替身
//!
//! 三张表放在一把异步读写锁后面，变更通过 tokio broadcast 推送，
//! 形状与真实后端一致：插入/更新先落表，再广播行级事件。
//! 同步器的全部测试都跑在这套后端上。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::query::{Column, Direction, Filter, Query, Value};
use super::{
    BlobStore, ChangeEvent, ChangeFeed, ChangeOp, ChangeRow, ChangeSubscription, RemoteStore,
    Table,
};
use crate::entities::{
    Friendship, FriendshipId, FriendshipPatch, Message, MessagePatch, NewFriendship, NewMessage,
    Profile,
};
use crate::error::{DuochatSDKError, Result};

const FEED_CAPACITY: usize = 256;

#[derive(Default)]
struct Tables {
    profiles: Vec<Profile>,
    friendships: Vec<Friendship>,
    messages: Vec<Message>,
}

/// 内存行存储 + 变更广播
pub struct MemoryBackend {
    tables: RwLock<Tables>,
    feed: broadcast::Sender<ChangeEvent>,
    fail_next_message_insert: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            tables: RwLock::new(Tables::default()),
            feed,
            fail_next_message_insert: AtomicBool::new(false),
        }
    }

    /// 注册一个用户资料（账号子系统在真实后端中做的事）
    pub async fn register_profile(&self, display_name: &str, email: &str) -> Profile {
        let profile = Profile {
            id: Uuid::new_v4(),
            display_name: display_name.to_string(),
            email: email.to_string(),
            avatar_url: None,
            created_at: Utc::now(),
        };
        self.tables.write().await.profiles.push(profile.clone());
        self.emit(ChangeOp::Insert, ChangeRow::Profile(profile.clone()));
        profile
    }

    /// 测试辅助：让下一次 insert_message 返回后端错误
    pub fn fail_next_message_insert(&self) {
        self.fail_next_message_insert.store(true, Ordering::SeqCst);
    }

    fn emit(&self, op: ChangeOp, row: ChangeRow) {
        // 无订阅者时 send 失败属正常场景，仅打 debug
        if self.feed.send(ChangeEvent { op, row }).is_err() {
            debug!("变更事件无人订阅，丢弃");
        }
    }

    fn apply_order_and_limit<R>(
        mut rows: Vec<R>,
        query: &Query,
        created_at: impl Fn(&R) -> chrono::DateTime<Utc>,
    ) -> Result<Vec<R>> {
        match query.order_by {
            None => {}
            Some((Column::CreatedAt, Direction::Ascending)) => {
                rows.sort_by_key(|r| created_at(r));
            }
            Some((Column::CreatedAt, Direction::Descending)) => {
                rows.sort_by_key(|r| std::cmp::Reverse(created_at(r)));
            }
            Some((column, _)) => {
                return Err(DuochatSDKError::InvalidInput(format!(
                    "unsupported order column: {:?}",
                    column
                )));
            }
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

#[async_trait]
impl RemoteStore for MemoryBackend {
    async fn query_profiles(&self, query: Query) -> Result<Vec<Profile>> {
        let tables = self.tables.read().await;
        let rows: Vec<Profile> = tables
            .profiles
            .iter()
            .filter(|r| query.filter.matches(*r))
            .cloned()
            .collect();
        Self::apply_order_and_limit(rows, &query, |r| r.created_at)
    }

    async fn query_friendships(&self, query: Query) -> Result<Vec<Friendship>> {
        let tables = self.tables.read().await;
        let rows: Vec<Friendship> = tables
            .friendships
            .iter()
            .filter(|r| query.filter.matches(*r))
            .cloned()
            .collect();
        Self::apply_order_and_limit(rows, &query, |r| r.created_at)
    }

    async fn query_messages(&self, query: Query) -> Result<Vec<Message>> {
        let tables = self.tables.read().await;
        let rows: Vec<Message> = tables
            .messages
            .iter()
            .filter(|r| query.filter.matches(*r))
            .cloned()
            .collect();
        Self::apply_order_and_limit(rows, &query, |r| r.created_at)
    }

    async fn count_messages(&self, filter: Filter) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables.messages.iter().filter(|r| filter.matches(*r)).count() as u64)
    }

    async fn insert_friendship(&self, row: NewFriendship) -> Result<Friendship> {
        let friendship = Friendship {
            id: Uuid::new_v4(),
            requester_id: row.requester_id,
            addressee_id: row.addressee_id,
            status: row.status,
            created_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .friendships
            .push(friendship.clone());
        self.emit(ChangeOp::Insert, ChangeRow::Friendship(friendship.clone()));
        Ok(friendship)
    }

    async fn update_friendship(
        &self,
        id: FriendshipId,
        patch: FriendshipPatch,
    ) -> Result<Friendship> {
        let updated = {
            let mut tables = self.tables.write().await;
            let row = tables
                .friendships
                .iter_mut()
                .find(|f| f.id == id)
                .ok_or_else(|| DuochatSDKError::NotFound(format!("friendship {}", id)))?;
            if let Some(status) = patch.status {
                row.status = status;
            }
            if let Some(requester_id) = patch.requester_id {
                row.requester_id = requester_id;
            }
            if let Some(addressee_id) = patch.addressee_id {
                row.addressee_id = addressee_id;
            }
            row.clone()
        };
        self.emit(ChangeOp::Update, ChangeRow::Friendship(updated.clone()));
        Ok(updated)
    }

    async fn insert_message(&self, row: NewMessage) -> Result<Message> {
        if self.fail_next_message_insert.swap(false, Ordering::SeqCst) {
            return Err(DuochatSDKError::Backend(
                "insert rejected by store".to_string(),
            ));
        }
        let message = Message {
            id: Uuid::new_v4(),
            friendship_id: row.friendship_id,
            sender_id: row.sender_id,
            content: row.content,
            created_at: Utc::now(),
            is_read: false,
            attachment_url: row.attachment_url,
            attachment_type: row.attachment_type,
        };
        self.tables.write().await.messages.push(message.clone());
        self.emit(ChangeOp::Insert, ChangeRow::Message(message.clone()));
        Ok(message)
    }

    async fn update_messages(&self, filter: Filter, patch: MessagePatch) -> Result<u64> {
        let updated: Vec<Message> = {
            let mut tables = self.tables.write().await;
            let mut touched = Vec::new();
            for row in tables.messages.iter_mut() {
                if filter.matches(row) {
                    if let Some(is_read) = patch.is_read {
                        row.is_read = is_read;
                    }
                    touched.push(row.clone());
                }
            }
            touched
        };
        let count = updated.len() as u64;
        for row in updated {
            self.emit(ChangeOp::Update, ChangeRow::Message(row));
        }
        Ok(count)
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(
        &self,
        table: Table,
        filter: Option<(Column, Value)>,
    ) -> Result<ChangeSubscription> {
        Ok(ChangeSubscription::new(self.feed.subscribe(), table, filter))
    }
}

/// 内存文件存储：上传即记录，URL 按 base_url/path 拼出
pub struct MemoryBlobStore {
    base_url: String,
    uploads: RwLock<HashMap<String, (String, Bytes)>>,
    fail_next: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            uploads: RwLock::new(HashMap::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    /// 测试辅助：让下一次上传失败
    pub fn fail_next_upload(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// 已上传内容（按路径取回，供断言用）
    pub async fn stored(&self, path: &str) -> Option<Bytes> {
        self.uploads.read().await.get(path).map(|(_, d)| d.clone())
    }

    pub async fn upload_count(&self) -> usize {
        self.uploads.read().await.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &str, content_type: &str, data: Bytes) -> Result<String> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DuochatSDKError::Upload("upload rejected".to_string()));
        }
        self.uploads
            .write()
            .await
            .insert(path.to_string(), (content_type.to_string(), data));
        Ok(format!("{}/{}", self.base_url.trim_end_matches('/'), path))
    }
}
