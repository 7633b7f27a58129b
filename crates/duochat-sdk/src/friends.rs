//! 好友请求服务 - 发起 / 回应好友请求与待处理列表
//!
//! 功能包括：
//! - 按邮箱发起好友请求（含重复关系检查、rejected 复用）
//! - 接受 / 拒绝收到的请求
//! - 待处理请求列表（含请求方资料），随 friendships 表变更自动重取
//!
//! 检查-再-写入的流程跨多次远程调用，不具原子性；并发客户端之间
//! 的丢失更新只能靠存储侧的唯一性约束兜底。

use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::query::{Column, Filter, Query};
use crate::backend::{Backend, ChangeFeed, RemoteStore, Table};
use crate::entities::{
    Friendship, FriendshipId, FriendshipPatch, FriendshipStatus, NewFriendship, Profile,
};
use crate::error::{DuochatSDKError, Result};
use crate::events::{event_timestamp, EventManager, SdkEvent};

/// 一条待处理的入站好友请求
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub friendship: Friendship,
    /// 请求方资料；资料行缺失时为 None（界面显示占位）
    pub requester: Option<Profile>,
}

struct FriendsInner {
    backend: Arc<dyn Backend>,
    events: Arc<EventManager>,
    current_user: Profile,
    pending: RwLock<Vec<PendingRequest>>,
}

impl FriendsInner {
    /// 重新拉取发给当前用户的 pending 请求，并解析请求方资料
    async fn refresh_pending(&self) -> Result<Vec<PendingRequest>> {
        let incoming = self
            .backend
            .query_friendships(Query::filtered(Filter::and(vec![
                Filter::eq(Column::AddresseeId, self.current_user.id),
                Filter::eq(Column::Status, FriendshipStatus::Pending),
            ])))
            .await?;

        let mut requests = Vec::with_capacity(incoming.len());
        for friendship in incoming {
            let requester = self
                .backend
                .query_profiles(Query::filtered(Filter::eq(
                    Column::Id,
                    friendship.requester_id,
                )))
                .await?
                .into_iter()
                .next();
            requests.push(PendingRequest {
                friendship,
                requester,
            });
        }

        *self.pending.write().await = requests.clone();
        self.events
            .emit(SdkEvent::FriendRequestsChanged {
                pending: requests.len(),
                timestamp: event_timestamp(),
            })
            .await;
        Ok(requests)
    }
}

/// 好友请求服务
///
/// `start()` 之后持有一条 friendships 表的全表订阅（作用域资源），
/// 任何事件都触发待处理列表全量重取；`close()` 或析构时释放。
pub struct FriendRequestService {
    inner: Arc<FriendsInner>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
}

impl FriendRequestService {
    pub fn new(
        backend: Arc<dyn Backend>,
        events: Arc<EventManager>,
        current_user: Profile,
    ) -> Self {
        Self {
            inner: Arc::new(FriendsInner {
                backend,
                events,
                current_user,
                pending: RwLock::new(Vec::new()),
            }),
            feed_task: Mutex::new(None),
        }
    }

    /// 发起好友请求
    ///
    /// 流程：归一化邮箱 → 拒绝自己 → 按邮箱找人 → 查两个方向的既有
    /// 关系 → accepted/pending 报错；rejected 复用同一条记录换向回到
    /// pending；没有则插入新的 pending 记录。
    pub async fn send_request(&self, email: &str) -> Result<Friendship> {
        let inner = &self.inner;
        let normalized = email.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(DuochatSDKError::InvalidInput("email is empty".to_string()));
        }
        if normalized == inner.current_user.email.to_lowercase() {
            return Err(DuochatSDKError::SelfFriendRequest);
        }

        let target = inner
            .backend
            .query_profiles(Query::filtered(Filter::eq(
                Column::Email,
                normalized.clone(),
            )))
            .await?
            .into_iter()
            .next()
            .ok_or(DuochatSDKError::UserNotFound(normalized))?;

        let existing = inner
            .backend
            .query_friendships(Query::filtered(Filter::friendship_between(
                inner.current_user.id,
                target.id,
            )))
            .await?;

        let friendship = if let Some(relation) = existing.into_iter().next() {
            match relation.status {
                FriendshipStatus::Accepted => return Err(DuochatSDKError::AlreadyFriends),
                FriendshipStatus::Pending => return Err(DuochatSDKError::RequestAlreadyPending),
                FriendshipStatus::Rejected => {
                    // 复用记录，换向到新的发起方
                    inner
                        .backend
                        .update_friendship(
                            relation.id,
                            FriendshipPatch {
                                status: Some(FriendshipStatus::Pending),
                                requester_id: Some(inner.current_user.id),
                                addressee_id: Some(target.id),
                            },
                        )
                        .await?
                }
            }
        } else {
            inner
                .backend
                .insert_friendship(NewFriendship {
                    requester_id: inner.current_user.id,
                    addressee_id: target.id,
                    status: FriendshipStatus::Pending,
                })
                .await?
        };

        info!(
            "好友请求已发出: {} -> {}",
            inner.current_user.email, target.email
        );
        inner
            .events
            .emit(SdkEvent::FriendRequestSent {
                friendship_id: friendship.id,
                timestamp: event_timestamp(),
            })
            .await;
        // 动作后刷新本端请求列表
        if let Err(e) = inner.refresh_pending().await {
            warn!("刷新待处理请求失败: {}", e);
        }
        Ok(friendship)
    }

    /// 接受收到的好友请求
    pub async fn accept(&self, friendship_id: FriendshipId) -> Result<Friendship> {
        self.answer(friendship_id, FriendshipStatus::Accepted).await
    }

    /// 拒绝收到的好友请求
    pub async fn reject(&self, friendship_id: FriendshipId) -> Result<Friendship> {
        self.answer(friendship_id, FriendshipStatus::Rejected).await
    }

    async fn answer(
        &self,
        friendship_id: FriendshipId,
        status: FriendshipStatus,
    ) -> Result<Friendship> {
        let inner = &self.inner;
        let relation = inner
            .backend
            .query_friendships(Query::filtered(Filter::eq(Column::Id, friendship_id)))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DuochatSDKError::NotFound(format!("friendship {}", friendship_id)))?;

        // 只有被请求方可以回应；服务端的访问控制这里不替它兜底，
        // 但先在客户端挡掉明显的误用
        if relation.addressee_id != inner.current_user.id {
            return Err(DuochatSDKError::InvalidOperation(
                "only the addressee can answer a friend request".to_string(),
            ));
        }

        let updated = inner
            .backend
            .update_friendship(
                friendship_id,
                FriendshipPatch {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await?;

        inner
            .events
            .emit(SdkEvent::FriendRequestAnswered {
                friendship_id,
                accepted: status == FriendshipStatus::Accepted,
                timestamp: event_timestamp(),
            })
            .await;
        if let Err(e) = inner.refresh_pending().await {
            warn!("刷新待处理请求失败: {}", e);
        }
        Ok(updated)
    }

    /// 当前缓存的待处理请求快照
    pub async fn pending(&self) -> Vec<PendingRequest> {
        self.inner.pending.read().await.clone()
    }

    /// 立即重新拉取待处理请求
    pub async fn refresh(&self) -> Result<Vec<PendingRequest>> {
        self.inner.refresh_pending().await
    }

    /// 启动：先全量拉取一次，然后订阅 friendships 表变更持续刷新
    pub async fn start(&self) -> Result<()> {
        self.inner.refresh_pending().await?;

        let mut subscription = self
            .inner
            .backend
            .subscribe(Table::Friendships, None)
            .await?;
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            loop {
                match subscription.recv().await {
                    Ok(_event) => {
                        debug!("friendships 表变更，重取待处理请求");
                        if let Err(e) = inner.refresh_pending().await {
                            warn!("刷新待处理请求失败: {}", e);
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

    /// 释放订阅；进行中的远程调用不被中止
    pub fn close(&self) {
        if let Some(task) = self.feed_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for FriendRequestService {
    fn drop(&mut self) {
        self.close();
    }
}
