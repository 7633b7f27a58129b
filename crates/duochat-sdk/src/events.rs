//! 事件系统模块 - SDK 内部状态变化的统一出口
//!
//! 功能包括：
//! - 会话列表 / 好友请求列表变化通知
//! - 消息追加、确认、发送失败事件
//! - 未读清零事件
//! - 事件广播和订阅机制
//!
//! 同步器只改内部状态并发事件，界面层订阅事件后自行取快照渲染。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::entities::{FriendshipId, MessageId};

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SdkEvent {
    /// 会话列表已重新拉取
    ConversationListChanged {
        conversations: usize,
        timestamp: u64,
    },
    /// 待处理好友请求列表已重新拉取
    FriendRequestsChanged { pending: usize, timestamp: u64 },
    /// 好友请求已发出（新建或 rejected 复用回 pending）
    FriendRequestSent {
        friendship_id: FriendshipId,
        timestamp: u64,
    },
    /// 好友请求已被回应
    FriendRequestAnswered {
        friendship_id: FriendshipId,
        accepted: bool,
        timestamp: u64,
    },
    /// 时间线追加了一条消息（乐观本地条目或订阅推送的入站消息）
    MessageAppended {
        friendship_id: FriendshipId,
        inbound: bool,
        timestamp: u64,
    },
    /// 乐观消息已被服务端行确认替换
    MessageConfirmed {
        friendship_id: FriendshipId,
        message_id: MessageId,
        timestamp: u64,
    },
    /// 消息发送失败，乐观条目已回滚
    MessageSendFailed {
        friendship_id: FriendshipId,
        error: String,
        timestamp: u64,
    },
    /// 本会话的入站未读消息已批量标记已读
    UnreadCleared {
        friendship_id: FriendshipId,
        marked: u64,
        timestamp: u64,
    },
}

impl SdkEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SdkEvent::ConversationListChanged { .. } => "conversation_list_changed",
            SdkEvent::FriendRequestsChanged { .. } => "friend_requests_changed",
            SdkEvent::FriendRequestSent { .. } => "friend_request_sent",
            SdkEvent::FriendRequestAnswered { .. } => "friend_request_answered",
            SdkEvent::MessageAppended { .. } => "message_appended",
            SdkEvent::MessageConfirmed { .. } => "message_confirmed",
            SdkEvent::MessageSendFailed { .. } => "message_send_failed",
            SdkEvent::UnreadCleared { .. } => "unread_cleared",
        }
    }

    /// 获取事件关联的好友关系 id（列表级事件没有）
    pub fn friendship_id(&self) -> Option<FriendshipId> {
        match self {
            SdkEvent::FriendRequestSent { friendship_id, .. }
            | SdkEvent::FriendRequestAnswered { friendship_id, .. }
            | SdkEvent::MessageAppended { friendship_id, .. }
            | SdkEvent::MessageConfirmed { friendship_id, .. }
            | SdkEvent::MessageSendFailed { friendship_id, .. }
            | SdkEvent::UnreadCleared { friendship_id, .. } => Some(*friendship_id),
            _ => None,
        }
    }

    /// 获取事件时间戳（UTC 毫秒）
    pub fn timestamp(&self) -> u64 {
        match self {
            SdkEvent::ConversationListChanged { timestamp, .. }
            | SdkEvent::FriendRequestsChanged { timestamp, .. }
            | SdkEvent::FriendRequestSent { timestamp, .. }
            | SdkEvent::FriendRequestAnswered { timestamp, .. }
            | SdkEvent::MessageAppended { timestamp, .. }
            | SdkEvent::MessageConfirmed { timestamp, .. }
            | SdkEvent::MessageSendFailed { timestamp, .. }
            | SdkEvent::UnreadCleared { timestamp, .. } => *timestamp,
        }
    }
}

/// 事件时间戳（UTC 毫秒）
pub(crate) fn event_timestamp() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// 事件过滤器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFilter {
    /// 事件类型过滤器
    pub event_types: Option<Vec<String>>,
    /// 好友关系 id 过滤器
    pub friendship_ids: Option<Vec<FriendshipId>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self {
            event_types: None,
            friendship_ids: None,
        }
    }

    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn with_friendship_ids(mut self, friendship_ids: Vec<FriendshipId>) -> Self {
        self.friendship_ids = Some(friendship_ids);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &SdkEvent) -> bool {
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref friendship_ids) = self.friendship_ids {
            match event.friendship_id() {
                Some(id) => {
                    if !friendship_ids.contains(&id) {
                        return false;
                    }
                }
                // 事件没有好友关系 id 但过滤器要求有
                None => return false,
            }
        }

        true
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&SdkEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<u64>,
}

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<SdkEvent>,
    /// 事件监听器映射
    listeners: Arc<RwLock<HashMap<String, Vec<EventListener>>>>,
    /// 事件统计
    stats: Arc<RwLock<EventStats>>,
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            listeners: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: SdkEvent) {
        debug!("Emitting event: {}", event.event_type());

        // 更新统计
        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 广播事件（无订阅者时 send 会失败，属正常场景，仅打 debug）
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        // 调用监听器
        let listeners = self.listeners.read().await;
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }

        // 调用通用监听器
        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
        self.sender.subscribe()
    }

    /// 订阅匹配过滤器的事件
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 添加事件监听器；event_type 为 "*" 时监听所有事件
    pub async fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SdkEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().await;
        listeners
            .entry(event_type.to_string())
            .or_insert_with(Vec::new)
            .push(Box::new(listener));

        let mut stats = self.stats.write().await;
        stats.listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub async fn clear_listeners(&self) {
        let mut listeners = self.listeners.write().await;
        listeners.clear();

        let mut stats = self.stats.write().await;
        stats.listener_count = 0;
    }

    /// 获取事件统计
    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 过滤事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<SdkEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<SdkEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件
    pub async fn recv(&mut self) -> Result<SdkEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// 尝试接收事件（非阻塞）
    pub fn try_recv(&mut self) -> Result<SdkEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Duration};
    use uuid::Uuid;

    fn appended(friendship_id: FriendshipId, inbound: bool) -> SdkEvent {
        SdkEvent::MessageAppended {
            friendship_id,
            inbound,
            timestamp: event_timestamp(),
        }
    }

    #[tokio::test]
    async fn test_event_manager_basic_functionality() {
        let manager = EventManager::new(100);
        let mut receiver = manager.subscribe();

        let fid = Uuid::new_v4();
        manager.emit(appended(fid, true)).await;

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "message_appended");
        assert_eq!(received.friendship_id(), Some(fid));

        let stats = manager.get_stats().await;
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.events_by_type.get("message_appended"), Some(&1));
    }

    #[tokio::test]
    async fn test_event_filter_by_friendship() {
        let manager = EventManager::new(100);
        let target = Uuid::new_v4();
        let other = Uuid::new_v4();

        let filter = EventFilter::new()
            .with_event_types(vec!["message_appended".to_string()])
            .with_friendship_ids(vec![target]);
        let mut filtered = manager.subscribe_filtered(filter);

        manager.emit(appended(other, false)).await;
        manager.emit(appended(target, true)).await;

        // 只应收到目标会话的事件
        let received = filtered.recv().await.unwrap();
        assert_eq!(received.friendship_id(), Some(target));
    }

    #[tokio::test]
    async fn test_event_listeners() {
        let manager = EventManager::new(100);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        manager
            .add_listener("message_appended", move |_event| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        let fid = Uuid::new_v4();
        for _ in 0..3 {
            manager.emit(appended(fid, false)).await;
        }

        sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        manager.clear_listeners().await;
        let stats = manager.get_stats().await;
        assert_eq!(stats.listener_count, 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let manager = EventManager::new(100);
        let mut receiver1 = manager.subscribe();
        let mut receiver2 = manager.subscribe();

        assert_eq!(manager.subscriber_count(), 2);

        manager
            .emit(SdkEvent::ConversationListChanged {
                conversations: 2,
                timestamp: event_timestamp(),
            })
            .await;

        assert_eq!(receiver1.recv().await.unwrap().event_type(), "conversation_list_changed");
        assert_eq!(receiver2.recv().await.unwrap().event_type(), "conversation_list_changed");
    }
}
