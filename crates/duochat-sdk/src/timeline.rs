//! 消息流同步器 - 单个会话的消息时间线
//!
//! 对一条好友关系维护一份本地有序消息序列：
//! - 打开时从完整历史播种
//! - 订阅推送到达时追加
//! - 本地发出的消息先以乐观条目立即可见，再与服务端确认行对账
//! - 序列中不出现重复的服务端 id
//!
//! ## 对账不变式
//!
//! 确认响应与订阅推送在同一事件循环上任意交错。两条规则合起来保证
//! 每个服务端 id 在可见序列中至多出现一次，与到达顺序无关：
//! - 推送去重：推送的行 id 已在序列中 → 丢弃推送
//! - 原位替换：确认到达时服务端行已在序列中（推送先到）→ 移除乐观
//!   条目；否则在原位置用服务端行替换乐观条目
//!
//! 乐观条目的身份是标签联合 [`TimelineKey`]，不靠字符串 id 前缀。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::attachment::{storage_path, AttachmentDraft, AttachmentKind};
use crate::backend::query::{Column, Direction, Filter, Query, Value};
use crate::backend::{Backend, BlobStore, ChangeFeed, ChangeOp, ChangeRow, RemoteStore, Table};
use crate::entities::{FriendshipId, Message, MessageId, MessagePatch, NewMessage, Profile, ProfileId};
use crate::error::{DuochatSDKError, Result};
use crate::events::{event_timestamp, EventManager, SdkEvent};
use crate::utils::time::TimeFormatter;

/// 时间线条目标识：乐观本地条目或服务端确认条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineKey {
    /// 本地合成 id，仅在本端有意义，不持久化、不跨端
    Pending(u64),
    /// 服务端行 id
    Confirmed(MessageId),
}

/// 时间线上的一条可见消息
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub key: TimelineKey,
    pub sender_id: ProfileId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub attachment_url: Option<String>,
    pub attachment_type: Option<AttachmentKind>,
}

impl TimelineEntry {
    fn from_row(row: Message) -> Self {
        Self {
            key: TimelineKey::Confirmed(row.id),
            sender_id: row.sender_id,
            content: row.content,
            created_at: row.created_at,
            is_read: row.is_read,
            attachment_url: row.attachment_url,
            attachment_type: row.attachment_type,
        }
    }

    pub fn server_id(&self) -> Option<MessageId> {
        match self.key {
            TimelineKey::Confirmed(id) => Some(id),
            TimelineKey::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.key, TimelineKey::Pending(_))
    }
}

/// 输入状态：已输入的文本 + 至多一个附件草稿
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Composer {
    pub text: String,
    pub attachment: Option<AttachmentDraft>,
}

impl Composer {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachment.is_none()
    }
}

/// 按显示时区日历日期切出的连续消息段
#[derive(Debug, Clone)]
pub struct DateRun {
    pub date: NaiveDate,
    pub entries: Vec<TimelineEntry>,
}

struct StreamInner {
    backend: Arc<dyn Backend>,
    blobs: Arc<dyn BlobStore>,
    events: Arc<EventManager>,
    current_user: Profile,
    friendship_id: FriendshipId,
    max_attachment_bytes: usize,
    entries: RwLock<Vec<TimelineEntry>>,
    composer: RwLock<Composer>,
    sending: AtomicBool,
    next_local_id: AtomicU64,
}

impl StreamInner {
    /// 从完整历史播种（created_at 升序）
    async fn seed(&self) -> Result<()> {
        let history = self
            .backend
            .query_messages(
                Query::filtered(Filter::eq(Column::FriendshipId, self.friendship_id))
                    .order_by(Column::CreatedAt, Direction::Ascending),
            )
            .await?;
        *self.entries.write().await = history.into_iter().map(TimelineEntry::from_row).collect();
        Ok(())
    }

    /// 订阅推送到达
    async fn handle_push(self: Arc<Self>, op: ChangeOp, row: Message) {
        if row.friendship_id != self.friendship_id {
            return;
        }
        if matches!(op, ChangeOp::Delete) {
            return;
        }
        let inbound = row.sender_id != self.current_user.id;
        {
            let mut entries = self.entries.write().await;
            // 推送去重：同一服务端 id 至多出现一次
            if entries.iter().any(|e| e.server_id() == Some(row.id)) {
                debug!("丢弃重复推送: {}", row.id);
                return;
            }
            entries.push(TimelineEntry::from_row(row));
        }
        self.events
            .emit(SdkEvent::MessageAppended {
                friendship_id: self.friendship_id,
                inbound,
                timestamp: event_timestamp(),
            })
            .await;
        // 入站消息到达即清未读（fire-and-forget）
        if inbound {
            let inner = self.clone();
            tokio::spawn(async move {
                if let Err(e) = inner.mark_read().await {
                    warn!("标记已读失败: {}", e);
                }
            });
        }
    }

    /// 确认响应到达：原位替换，或推送先到时仅移除乐观条目
    async fn confirm_sent(&self, local_id: u64, row: Message) {
        let message_id = row.id;
        {
            let mut entries = self.entries.write().await;
            let already = entries.iter().any(|e| e.server_id() == Some(message_id));
            if let Some(pos) = entries
                .iter()
                .position(|e| e.key == TimelineKey::Pending(local_id))
            {
                if already {
                    entries.remove(pos);
                } else {
                    entries[pos] = TimelineEntry::from_row(row);
                }
            }
        }
        self.events
            .emit(SdkEvent::MessageConfirmed {
                friendship_id: self.friendship_id,
                message_id,
                timestamp: event_timestamp(),
            })
            .await;
    }

    /// 插入失败：移除乐观条目，恢复输入状态供重试
    async fn fail_sent(&self, local_id: u64, text: String, attachment: Option<AttachmentDraft>) {
        self.entries
            .write()
            .await
            .retain(|e| e.key != TimelineKey::Pending(local_id));
        let mut composer = self.composer.write().await;
        composer.text = text;
        composer.attachment = attachment;
    }

    /// 批量把本会话中未读且非本人发送的消息标记为已读
    async fn mark_read(&self) -> Result<u64> {
        let marked = self
            .backend
            .update_messages(
                Filter::and(vec![
                    Filter::eq(Column::FriendshipId, self.friendship_id),
                    Filter::eq(Column::IsRead, false),
                    Filter::neq(Column::SenderId, self.current_user.id),
                ]),
                MessagePatch {
                    is_read: Some(true),
                },
            )
            .await?;
        if marked > 0 {
            self.events
                .emit(SdkEvent::UnreadCleared {
                    friendship_id: self.friendship_id,
                    marked,
                    timestamp: event_timestamp(),
                })
                .await;
        }
        Ok(marked)
    }

    async fn do_send(&self) -> Result<Option<MessageId>> {
        let composer = self.composer.read().await.clone();
        let trimmed = composer.text.trim().to_string();
        // 空输入是无操作：不上传、不插入、不改状态
        if trimmed.is_empty() && composer.attachment.is_none() {
            return Ok(None);
        }

        // 附件先上传，阻塞本次发送；失败时输入状态原样保留
        let mut attachment_url = None;
        let mut attachment_type = None;
        if let Some(draft) = &composer.attachment {
            let path = storage_path(self.friendship_id, &draft.filename);
            let url = self
                .blobs
                .upload(&path, &draft.content_type, draft.data.clone())
                .await?;
            attachment_url = Some(url);
            attachment_type = Some(draft.kind());
        }

        // 清空输入，追加乐观条目：在远端插入完成之前就可见
        *self.composer.write().await = Composer::default();
        let local_id = self.next_local_id.fetch_add(1, Ordering::SeqCst);
        self.entries.write().await.push(TimelineEntry {
            key: TimelineKey::Pending(local_id),
            sender_id: self.current_user.id,
            content: trimmed.clone(),
            created_at: Utc::now(),
            is_read: false,
            attachment_url: attachment_url.clone(),
            attachment_type,
        });
        self.events
            .emit(SdkEvent::MessageAppended {
                friendship_id: self.friendship_id,
                inbound: false,
                timestamp: event_timestamp(),
            })
            .await;

        let inserted = self
            .backend
            .insert_message(NewMessage {
                friendship_id: self.friendship_id,
                sender_id: self.current_user.id,
                content: trimmed.clone(),
                attachment_url,
                attachment_type,
            })
            .await;

        match inserted {
            Ok(row) => {
                let message_id = row.id;
                self.confirm_sent(local_id, row).await;
                Ok(Some(message_id))
            }
            Err(e) => {
                self.fail_sent(local_id, trimmed, composer.attachment).await;
                self.events
                    .emit(SdkEvent::MessageSendFailed {
                        friendship_id: self.friendship_id,
                        error: e.to_string(),
                        timestamp: event_timestamp(),
                    })
                    .await;
                Err(e)
            }
        }
    }
}

/// 消息流同步器
///
/// [`open`](Self::open) 即完成播种、订阅与首次清未读；订阅是作用域
/// 资源，`close()` 或析构时释放，进行中的远程调用不被中止。
pub struct MessageStreamSynchronizer {
    inner: Arc<StreamInner>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
}

impl MessageStreamSynchronizer {
    /// 打开一个会话的消息流
    pub async fn open(
        backend: Arc<dyn Backend>,
        blobs: Arc<dyn BlobStore>,
        events: Arc<EventManager>,
        current_user: Profile,
        friendship_id: FriendshipId,
        max_attachment_bytes: usize,
    ) -> Result<Self> {
        let inner = Arc::new(StreamInner {
            backend,
            blobs,
            events,
            current_user,
            friendship_id,
            max_attachment_bytes,
            entries: RwLock::new(Vec::new()),
            composer: RwLock::new(Composer::default()),
            sending: AtomicBool::new(false),
            next_local_id: AtomicU64::new(1),
        });

        // 先订阅再播种：间隙内插入的行会同时出现在历史和推送里，
        // 由推送去重消化
        let mut subscription = inner
            .backend
            .subscribe(
                Table::Messages,
                Some((Column::FriendshipId, Value::Uuid(friendship_id))),
            )
            .await?;

        inner.seed().await?;

        // 打开即清未读（fire-and-forget）
        {
            let inner = inner.clone();
            tokio::spawn(async move {
                if let Err(e) = inner.mark_read().await {
                    warn!("标记已读失败: {}", e);
                }
            });
        }

        let feed_inner = inner.clone();
        let task = tokio::spawn(async move {
            loop {
                match subscription.recv().await {
                    Ok(event) => {
                        if let ChangeRow::Message(row) = event.row {
                            feed_inner.clone().handle_push(event.op, row).await;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            inner,
            feed_task: Mutex::new(Some(task)),
        })
    }

    pub fn friendship_id(&self) -> FriendshipId {
        self.inner.friendship_id
    }

    /// 当前可见序列快照
    pub async fn entries(&self) -> Vec<TimelineEntry> {
        self.inner.entries.read().await.clone()
    }

    /// 按显示时区日历日期分组的可见序列（保持时间顺序）
    pub async fn grouped(&self) -> Vec<DateRun> {
        let entries = self.inner.entries.read().await;
        let mut runs: Vec<DateRun> = Vec::new();
        for entry in entries.iter() {
            let date = TimeFormatter::display_date(entry.created_at);
            match runs.last_mut() {
                Some(run) if run.date == date => run.entries.push(entry.clone()),
                _ => runs.push(DateRun {
                    date,
                    entries: vec![entry.clone()],
                }),
            }
        }
        runs
    }

    /// 当前输入状态快照
    pub async fn composer(&self) -> Composer {
        self.inner.composer.read().await.clone()
    }

    /// 更新输入文本
    pub async fn set_text(&self, text: impl Into<String>) {
        self.inner.composer.write().await.text = text.into();
    }

    /// 设置附件草稿（替换已有的；每条消息至多一个附件）
    pub async fn attach(&self, draft: AttachmentDraft) -> Result<()> {
        if draft.size() > self.inner.max_attachment_bytes {
            return Err(DuochatSDKError::InvalidInput(format!(
                "attachment exceeds {} bytes",
                self.inner.max_attachment_bytes
            )));
        }
        self.inner.composer.write().await.attachment = Some(draft);
        Ok(())
    }

    /// 移除附件草稿
    pub async fn clear_attachment(&self) {
        self.inner.composer.write().await.attachment = None;
    }

    /// 是否有发送在途（界面用于禁用发送控件）
    pub fn is_sending(&self) -> bool {
        self.inner.sending.load(Ordering::SeqCst)
    }

    /// 发送当前输入
    ///
    /// 空输入或已有发送在途时是无操作，返回 Ok(None)；成功返回服务端
    /// 消息 id；上传或插入失败返回错误，输入状态已恢复。
    pub async fn send(&self) -> Result<Option<MessageId>> {
        if self.inner.sending.swap(true, Ordering::SeqCst) {
            debug!("发送在途，忽略重复触发");
            return Ok(None);
        }
        let result = self.inner.do_send().await;
        self.inner.sending.store(false, Ordering::SeqCst);
        result
    }

    /// 手动清未读（打开与入站推送时会自动触发）
    pub async fn mark_read(&self) -> Result<u64> {
        self.inner.mark_read().await
    }

    /// 释放订阅
    pub fn close(&self) {
        if let Some(task) = self.feed_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for MessageStreamSynchronizer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryBlobStore};
    use crate::backend::RemoteStore;
    use crate::entities::{FriendshipStatus, NewFriendship};
    use crate::events::EventFilter;
    use bytes::Bytes;
    use tokio::time::{sleep, Duration};
    use uuid::Uuid;

    const MAX_ATTACHMENT: usize = 1024 * 1024;

    struct Fixture {
        backend: Arc<MemoryBackend>,
        blobs: Arc<MemoryBlobStore>,
        events: Arc<EventManager>,
        alice: Profile,
        bob: Profile,
        friendship_id: FriendshipId,
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let blobs = Arc::new(MemoryBlobStore::new("https://files.example.com"));
        let events = Arc::new(EventManager::new(64));
        let alice = backend.register_profile("Alice", "alice@example.com").await;
        let bob = backend.register_profile("Bob", "bob@example.com").await;
        let friendship = backend
            .insert_friendship(NewFriendship {
                requester_id: alice.id,
                addressee_id: bob.id,
                status: FriendshipStatus::Accepted,
            })
            .await
            .unwrap();
        Fixture {
            backend,
            blobs,
            events,
            alice,
            bob,
            friendship_id: friendship.id,
        }
    }

    impl Fixture {
        async fn open_for_alice(&self) -> MessageStreamSynchronizer {
            MessageStreamSynchronizer::open(
                self.backend.clone(),
                self.blobs.clone(),
                self.events.clone(),
                self.alice.clone(),
                self.friendship_id,
                MAX_ATTACHMENT,
            )
            .await
            .unwrap()
        }

        async fn insert_from_bob(&self, content: &str) -> Message {
            self.backend
                .insert_message(NewMessage {
                    friendship_id: self.friendship_id,
                    sender_id: self.bob.id,
                    content: content.to_string(),
                    attachment_url: None,
                    attachment_type: None,
                })
                .await
                .unwrap()
        }

        fn unread_for_alice(&self) -> Filter {
            Filter::and(vec![
                Filter::eq(Column::FriendshipId, self.friendship_id),
                Filter::eq(Column::IsRead, false),
                Filter::neq(Column::SenderId, self.alice.id),
            ])
        }
    }

    #[tokio::test]
    async fn test_empty_send_is_noop() {
        let fx = fixture().await;
        let stream = fx.open_for_alice().await;

        assert_eq!(stream.send().await.unwrap(), None);
        stream.set_text("   \n ").await;
        assert_eq!(stream.send().await.unwrap(), None);

        assert!(stream.entries().await.is_empty());
        assert_eq!(
            fx.backend
                .count_messages(Filter::eq(Column::FriendshipId, fx.friendship_id))
                .await
                .unwrap(),
            0
        );
        // 仅空白的输入保持原样
        assert_eq!(stream.composer().await.text, "   \n ");
    }

    #[tokio::test]
    async fn test_send_confirms_in_place() {
        let fx = fixture().await;
        let stream = fx.open_for_alice().await;

        stream.set_text("  hi  ").await;
        let id = stream.send().await.unwrap().unwrap();

        let entries = stream.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, TimelineKey::Confirmed(id));
        assert_eq!(entries[0].content, "hi");
        assert_eq!(entries[0].sender_id, fx.alice.id);
        assert!(!entries[0].is_pending());
        // 输入已清空
        assert!(stream.composer().await.is_empty());
        assert!(!stream.is_sending());

        // 服务端行字段与可见条目一致
        let rows = fx
            .backend
            .query_messages(Query::filtered(Filter::eq(Column::Id, id)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "hi");
        assert_eq!(rows[0].sender_id, fx.alice.id);
        assert_eq!(rows[0].friendship_id, fx.friendship_id);
        assert!(!rows[0].is_read);
        assert_eq!(rows[0].attachment_url, None);

        // 订阅推送随后到达也不会造成第二份
        sleep(Duration::from_millis(50)).await;
        assert_eq!(stream.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_optimistic_entry_matches_confirmed_content() {
        let fx = fixture().await;
        let stream = fx.open_for_alice().await;
        let inner = stream.inner.clone();

        // 手工走一遍乐观路径，检查乐观条目与确认条目的内容一致性
        inner.entries.write().await.push(TimelineEntry {
            key: TimelineKey::Pending(42),
            sender_id: fx.alice.id,
            content: "draft".to_string(),
            created_at: Utc::now(),
            is_read: false,
            attachment_url: None,
            attachment_type: None,
        });
        let optimistic = stream.entries().await[0].clone();

        let row = fx
            .backend
            .insert_message(NewMessage {
                friendship_id: fx.friendship_id,
                sender_id: fx.alice.id,
                content: "draft".to_string(),
                attachment_url: None,
                attachment_type: None,
            })
            .await
            .unwrap();
        inner.confirm_sent(42, row.clone()).await;

        let entries = stream.entries().await;
        let confirmed = entries
            .iter()
            .find(|e| e.server_id() == Some(row.id))
            .unwrap();
        // 内容、发送者一致；只有 id / 时间戳可以变
        assert_eq!(confirmed.content, optimistic.content);
        assert_eq!(confirmed.sender_id, optimistic.sender_id);
    }

    #[tokio::test]
    async fn test_dedup_when_push_arrives_first() {
        let fx = fixture().await;
        let stream = fx.open_for_alice().await;
        let inner = stream.inner.clone();

        inner.entries.write().await.push(TimelineEntry {
            key: TimelineKey::Pending(7),
            sender_id: fx.alice.id,
            content: "race".to_string(),
            created_at: Utc::now(),
            is_read: false,
            attachment_url: None,
            attachment_type: None,
        });

        // 推送先到：插入触发订阅，feed 任务把服务端行追加进序列
        let row = fx
            .backend
            .insert_message(NewMessage {
                friendship_id: fx.friendship_id,
                sender_id: fx.alice.id,
                content: "race".to_string(),
                attachment_url: None,
                attachment_type: None,
            })
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(stream.entries().await.len(), 2); // 乐观条目 + 推送行

        // 确认后到：只应移除乐观条目
        inner.confirm_sent(7, row.clone()).await;
        let entries = stream.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].server_id(), Some(row.id));
    }

    #[tokio::test]
    async fn test_dedup_when_confirm_arrives_first() {
        let fx = fixture().await;
        let stream = fx.open_for_alice().await;
        let inner = stream.inner.clone();

        inner.entries.write().await.push(TimelineEntry {
            key: TimelineKey::Pending(8),
            sender_id: fx.alice.id,
            content: "race".to_string(),
            created_at: Utc::now(),
            is_read: false,
            attachment_url: None,
            attachment_type: None,
        });

        // 手工构造服务端行，先确认、后推送
        let row = Message {
            id: Uuid::new_v4(),
            friendship_id: fx.friendship_id,
            sender_id: fx.alice.id,
            content: "race".to_string(),
            created_at: Utc::now(),
            is_read: false,
            attachment_url: None,
            attachment_type: None,
        };
        inner.confirm_sent(8, row.clone()).await;
        inner.clone().handle_push(ChangeOp::Insert, row.clone()).await;

        let entries = stream.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].server_id(), Some(row.id));
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back_and_restores_composer() {
        let fx = fixture().await;
        let stream = fx.open_for_alice().await;

        let draft = AttachmentDraft::new("doc.pdf", "application/pdf", Bytes::from_static(b"%PDF"));
        stream.set_text("try this").await;
        stream.attach(draft.clone()).await.unwrap();

        fx.backend.fail_next_message_insert();
        let err = stream.send().await.unwrap_err();
        assert!(matches!(err, DuochatSDKError::Backend(_)));

        // 可见序列回到发送前，输入状态恢复
        assert!(stream.entries().await.is_empty());
        let composer = stream.composer().await;
        assert_eq!(composer.text, "try this");
        assert_eq!(composer.attachment, Some(draft));
        assert!(!stream.is_sending());
    }

    #[tokio::test]
    async fn test_failed_upload_aborts_send() {
        let fx = fixture().await;
        let stream = fx.open_for_alice().await;

        let draft = AttachmentDraft::new("pic.png", "image/png", Bytes::from_static(b"png"));
        stream.set_text("look").await;
        stream.attach(draft.clone()).await.unwrap();

        fx.blobs.fail_next_upload();
        let err = stream.send().await.unwrap_err();
        assert!(matches!(err, DuochatSDKError::Upload(_)));

        // 没有插入、序列不变、输入原样
        assert!(stream.entries().await.is_empty());
        assert_eq!(
            fx.backend
                .count_messages(Filter::eq(Column::FriendshipId, fx.friendship_id))
                .await
                .unwrap(),
            0
        );
        let composer = stream.composer().await;
        assert_eq!(composer.text, "look");
        assert_eq!(composer.attachment, Some(draft));
    }

    #[tokio::test]
    async fn test_attachment_send_stores_url_and_kind() {
        let fx = fixture().await;
        let stream = fx.open_for_alice().await;

        stream
            .attach(AttachmentDraft::new(
                "photo.jpg",
                "image/jpeg",
                Bytes::from_static(b"jpeg-bytes"),
            ))
            .await
            .unwrap();
        let id = stream.send().await.unwrap().unwrap();

        let entries = stream.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attachment_type, Some(AttachmentKind::Image));
        let url = entries[0].attachment_url.as_deref().unwrap();
        // URL 带 friendship_id 命名空间
        assert!(url.contains(&fx.friendship_id.to_string()));
        assert!(url.ends_with(".jpg"));

        // 服务端行原样存 URL
        let rows = fx
            .backend
            .query_messages(Query::filtered(Filter::eq(Column::Id, id)))
            .await
            .unwrap();
        assert_eq!(rows[0].attachment_url.as_deref(), Some(url));
        assert_eq!(fx.blobs.upload_count().await, 1);
    }

    #[tokio::test]
    async fn test_oversized_attachment_rejected() {
        let fx = fixture().await;
        let stream = fx.open_for_alice().await;

        let big = AttachmentDraft::new(
            "big.bin",
            "application/octet-stream",
            Bytes::from(vec![0u8; MAX_ATTACHMENT + 1]),
        );
        let err = stream.attach(big).await.unwrap_err();
        assert!(matches!(err, DuochatSDKError::InvalidInput(_)));
        assert!(stream.composer().await.attachment.is_none());
    }

    #[tokio::test]
    async fn test_open_seeds_history_and_clears_unread() {
        let fx = fixture().await;
        fx.insert_from_bob("one").await;
        fx.insert_from_bob("two").await;
        assert_eq!(fx.backend.count_messages(fx.unread_for_alice()).await.unwrap(), 2);

        let mut cleared = fx.events.subscribe_filtered(
            EventFilter::new().with_event_types(vec!["unread_cleared".to_string()]),
        );
        let stream = fx.open_for_alice().await;

        let entries = stream.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "one");
        assert_eq!(entries[1].content, "two");

        // 打开后未读立即清零
        let event = cleared.recv().await.unwrap();
        assert_eq!(event.friendship_id(), Some(fx.friendship_id));
        assert_eq!(fx.backend.count_messages(fx.unread_for_alice()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_inbound_push_appends_and_marks_read() {
        let fx = fixture().await;
        let stream = fx.open_for_alice().await;
        assert!(stream.entries().await.is_empty());

        fx.insert_from_bob("ping").await;
        sleep(Duration::from_millis(50)).await;

        let entries = stream.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sender_id, fx.bob.id);
        // 入站消息到达后随即被标为已读
        assert_eq!(fx.backend.count_messages(fx.unread_for_alice()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_for_other_friendship_ignored() {
        let fx = fixture().await;
        let stream = fx.open_for_alice().await;

        // 另一条好友关系上的消息不进入本时间线
        let carol = fx.backend.register_profile("Carol", "carol@example.com").await;
        let other = fx
            .backend
            .insert_friendship(NewFriendship {
                requester_id: fx.alice.id,
                addressee_id: carol.id,
                status: FriendshipStatus::Accepted,
            })
            .await
            .unwrap();
        fx.backend
            .insert_message(NewMessage {
                friendship_id: other.id,
                sender_id: carol.id,
                content: "elsewhere".to_string(),
                attachment_url: None,
                attachment_type: None,
            })
            .await
            .unwrap();

        sleep(Duration::from_millis(50)).await;
        assert!(stream.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_grouped_splits_on_date_boundary() {
        let fx = fixture().await;
        let stream = fx.open_for_alice().await;
        let inner = stream.inner.clone();

        let now = Utc::now();
        let mut entries = Vec::new();
        for (offset_days, content) in [(2, "old"), (0, "today-1"), (0, "today-2")] {
            entries.push(TimelineEntry {
                key: TimelineKey::Confirmed(Uuid::new_v4()),
                sender_id: fx.alice.id,
                content: content.to_string(),
                created_at: now - chrono::Duration::days(offset_days),
                is_read: true,
                attachment_url: None,
                attachment_type: None,
            });
        }
        *inner.entries.write().await = entries;

        let runs = stream.grouped().await;
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].entries.len(), 1);
        assert_eq!(runs[0].entries[0].content, "old");
        assert_eq!(runs[1].entries.len(), 2);
        assert_eq!(runs[1].entries[0].content, "today-1");
    }
}
