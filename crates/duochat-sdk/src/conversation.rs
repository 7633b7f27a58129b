//! 会话列表同步器 - 把好友关系聚合成可展示的会话列表
//!
//! 契约：给定当前用户，产出按最近活动排序的 [`ConversationItem`] 序列，
//! 并在系统内任何 Friendship / Message 行变更时刷新。
//!
//! 订阅是全表粒度、不按用户过滤，是用简单换效率的取舍；任何事件
//! 都触发一次完整重拉（不做增量修补），每次可见列表都来自一次
//! 内部一致的整体读取。

use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::query::{Column, Direction, Filter, Query};
use crate::backend::{Backend, ChangeFeed, RemoteStore, Table};
use crate::entities::{ConversationItem, FriendshipStatus, Profile};
use crate::error::Result;
use crate::events::{event_timestamp, EventManager, SdkEvent};

struct ListInner {
    backend: Arc<dyn Backend>,
    events: Arc<EventManager>,
    current_user: Profile,
    conversations: RwLock<Vec<ConversationItem>>,
}

impl ListInner {
    /// 完整重拉会话列表
    ///
    /// 1. 取 status = accepted 且当前用户在任一侧的好友关系
    /// 2. 逐条解析对方资料、最后一条消息、入站未读数
    /// 3. 按最后消息时间（缺省回退关系创建时间）降序排序
    async fn refresh(&self) -> Result<Vec<ConversationItem>> {
        let user_id = self.current_user.id;
        let friendships = self
            .backend
            .query_friendships(Query::filtered(Filter::and(vec![
                Filter::eq(Column::Status, FriendshipStatus::Accepted),
                Filter::or(vec![
                    Filter::eq(Column::RequesterId, user_id),
                    Filter::eq(Column::AddresseeId, user_id),
                ]),
            ])))
            .await?;

        let mut items = Vec::with_capacity(friendships.len());
        for friendship in friendships {
            let friend_id = match friendship.counterpart_of(user_id) {
                Some(id) => id,
                None => continue,
            };

            let friend = self
                .backend
                .query_profiles(Query::filtered(Filter::eq(Column::Id, friend_id)))
                .await?
                .into_iter()
                .next();
            // 资料行缺失的关系直接跳过
            let friend = match friend {
                Some(profile) => profile,
                None => continue,
            };

            let last = self
                .backend
                .query_messages(
                    Query::filtered(Filter::eq(Column::FriendshipId, friendship.id))
                        .order_by(Column::CreatedAt, Direction::Descending)
                        .limit(1),
                )
                .await?
                .into_iter()
                .next();

            let unread_count = self
                .backend
                .count_messages(Filter::and(vec![
                    Filter::eq(Column::FriendshipId, friendship.id),
                    Filter::eq(Column::IsRead, false),
                    Filter::neq(Column::SenderId, user_id),
                ]))
                .await?;

            items.push(ConversationItem {
                friendship_id: friendship.id,
                friend,
                last_message: last.as_ref().map(|m| m.content.clone()),
                last_message_time: last
                    .map(|m| m.created_at)
                    .or(Some(friendship.created_at)),
                unread_count: unread_count as u32,
            });
        }

        items.sort_by_key(|item| std::cmp::Reverse(item.sort_key()));

        *self.conversations.write().await = items.clone();
        self.events
            .emit(SdkEvent::ConversationListChanged {
                conversations: items.len(),
                timestamp: event_timestamp(),
            })
            .await;
        Ok(items)
    }
}

/// 会话列表同步器
///
/// `start()` 之后持有 messages / friendships 两条全表订阅（作用域
/// 资源），任何事件都触发整体刷新；`close()` 或析构时释放，进行中
/// 的远程调用不被中止。
pub struct ConversationListSynchronizer {
    inner: Arc<ListInner>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationListSynchronizer {
    pub fn new(
        backend: Arc<dyn Backend>,
        events: Arc<EventManager>,
        current_user: Profile,
    ) -> Self {
        Self {
            inner: Arc::new(ListInner {
                backend,
                events,
                current_user,
                conversations: RwLock::new(Vec::new()),
            }),
            feed_task: Mutex::new(None),
        }
    }

    /// 当前列表快照
    pub async fn conversations(&self) -> Vec<ConversationItem> {
        self.inner.conversations.read().await.clone()
    }

    /// 按好友昵称过滤当前快照（大小写不敏感的子串匹配，纯内存）
    pub async fn search(&self, query: &str) -> Vec<ConversationItem> {
        let needle = query.to_lowercase();
        self.inner
            .conversations
            .read()
            .await
            .iter()
            .filter(|c| c.friend.display_name.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    /// 立即完整重拉一次
    pub async fn refresh(&self) -> Result<Vec<ConversationItem>> {
        self.inner.refresh().await
    }

    /// 启动：先全量拉取一次，然后订阅两张表的变更持续刷新
    pub async fn start(&self) -> Result<()> {
        self.inner.refresh().await?;

        let mut messages_sub = self.inner.backend.subscribe(Table::Messages, None).await?;
        let mut friendships_sub = self
            .inner
            .backend
            .subscribe(Table::Friendships, None)
            .await?;

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    event = messages_sub.recv() => event,
                    event = friendships_sub.recv() => event,
                };
                match received {
                    Ok(event) => {
                        debug!("{} 表变更，重拉会话列表", event.table().as_str());
                        if let Err(e) = inner.refresh().await {
                            warn!("会话列表刷新失败: {}", e);
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut slot = self.feed_task.lock().unwrap();
        if let Some(old) = slot.replace(task) {
            old.abort();
        }
        Ok(())
    }

    /// 释放订阅
    pub fn close(&self) {
        if let Some(task) = self.feed_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for ConversationListSynchronizer {
    fn drop(&mut self) {
        self.close();
    }
}
