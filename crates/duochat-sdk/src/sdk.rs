//! SDK 入口 - 配置与组件装配
//!
//! [`DuochatSDK`] 持有注入的后端能力与事件总线，按需创建三个
//! 同步组件：会话列表同步器、好友请求服务、消息流同步器。
//! 鉴权身份（当前用户 Profile）在构造时注入。

use std::sync::Arc;

use tracing::info;

use crate::backend::{Backend, BlobStore};
use crate::conversation::ConversationListSynchronizer;
use crate::entities::{FriendshipId, Profile};
use crate::error::Result;
use crate::events::EventManager;
use crate::friends::FriendRequestService;
use crate::timeline::MessageStreamSynchronizer;
use crate::utils::time::{TimeFormatter, TimezoneConfig};

/// 附件大小上限默认值：25 MB
const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 25 * 1024 * 1024;

/// SDK 配置
#[derive(Debug, Clone)]
pub struct DuochatConfig {
    /// 事件总线容量
    pub event_capacity: usize,
    /// 单个附件大小上限（字节）
    pub max_attachment_bytes: usize,
    /// 显示时区偏移秒数（例如 +8 小时 = 28800）；None 表示系统本地时区
    pub timezone_offset_seconds: Option<i32>,
}

impl Default for DuochatConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            timezone_offset_seconds: None,
        }
    }
}

impl DuochatConfig {
    pub fn builder() -> DuochatConfigBuilder {
        DuochatConfigBuilder::new()
    }
}

/// 配置构建器
pub struct DuochatConfigBuilder {
    config: DuochatConfig,
}

impl DuochatConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: DuochatConfig::default(),
        }
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn max_attachment_bytes(mut self, bytes: usize) -> Self {
        self.config.max_attachment_bytes = bytes;
        self
    }

    /// 设置显示时区偏移（秒）
    pub fn timezone_offset_seconds(mut self, seconds: i32) -> Self {
        self.config.timezone_offset_seconds = Some(seconds);
        self
    }

    pub fn build(self) -> DuochatConfig {
        self.config
    }
}

impl Default for DuochatConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Duochat SDK
pub struct DuochatSDK {
    backend: Arc<dyn Backend>,
    blobs: Arc<dyn BlobStore>,
    events: Arc<EventManager>,
    current_user: Profile,
    config: DuochatConfig,
}

impl DuochatSDK {
    /// 创建 SDK 实例
    ///
    /// `current_user` 来自账号子系统的身份查询；`backend` / `blobs`
    /// 是平台能力的具体实现。
    pub fn new(
        config: DuochatConfig,
        current_user: Profile,
        backend: Arc<dyn Backend>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        if let Some(seconds) = config.timezone_offset_seconds {
            TimeFormatter::set_timezone(TimezoneConfig::from_seconds(seconds));
        }
        let events = Arc::new(EventManager::new(config.event_capacity));
        info!("✅ Duochat SDK 已初始化: user={}", current_user.email);
        Self {
            backend,
            blobs,
            events,
            current_user,
            config,
        }
    }

    /// 事件总线
    pub fn events(&self) -> Arc<EventManager> {
        self.events.clone()
    }

    /// 当前用户
    pub fn current_user(&self) -> &Profile {
        &self.current_user
    }

    pub fn config(&self) -> &DuochatConfig {
        &self.config
    }

    /// 创建会话列表同步器（调用方负责 `start()`）
    pub fn conversations(&self) -> ConversationListSynchronizer {
        ConversationListSynchronizer::new(
            self.backend.clone(),
            self.events.clone(),
            self.current_user.clone(),
        )
    }

    /// 创建好友请求服务（调用方负责 `start()`）
    pub fn friends(&self) -> FriendRequestService {
        FriendRequestService::new(
            self.backend.clone(),
            self.events.clone(),
            self.current_user.clone(),
        )
    }

    /// 打开一个会话的消息流（播种历史、建立订阅、清未读）
    pub async fn open_conversation(
        &self,
        friendship_id: FriendshipId,
    ) -> Result<MessageStreamSynchronizer> {
        MessageStreamSynchronizer::open(
            self.backend.clone(),
            self.blobs.clone(),
            self.events.clone(),
            self.current_user.clone(),
            friendship_id,
            self.config.max_attachment_bytes,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryBlobStore};

    #[test]
    fn test_config_builder() {
        let config = DuochatConfig::builder()
            .event_capacity(32)
            .max_attachment_bytes(1024)
            .timezone_offset_seconds(8 * 3600)
            .build();
        assert_eq!(config.event_capacity, 32);
        assert_eq!(config.max_attachment_bytes, 1024);
        assert_eq!(config.timezone_offset_seconds, Some(8 * 3600));

        let default = DuochatConfig::default();
        assert_eq!(default.max_attachment_bytes, DEFAULT_MAX_ATTACHMENT_BYTES);
        assert_eq!(default.timezone_offset_seconds, None);
    }

    #[tokio::test]
    async fn test_end_to_end_request_accept_and_chat() {
        let backend = Arc::new(MemoryBackend::new());
        let blobs = Arc::new(MemoryBlobStore::new("https://files.example.com"));
        let alice = backend.register_profile("Alice", "alice@example.com").await;
        let bob = backend.register_profile("Bob", "bob@example.com").await;

        let alice_sdk = DuochatSDK::new(
            DuochatConfig::default(),
            alice.clone(),
            backend.clone(),
            blobs.clone(),
        );
        let bob_sdk = DuochatSDK::new(
            DuochatConfig::default(),
            bob.clone(),
            backend.clone(),
            blobs.clone(),
        );

        // Alice 发起请求，Bob 接受
        let alice_friends = alice_sdk.friends();
        let friendship = alice_friends.send_request("bob@example.com").await.unwrap();
        let bob_friends = bob_sdk.friends();
        let pending = bob_friends.refresh().await.unwrap();
        assert_eq!(pending.len(), 1);
        bob_friends.accept(friendship.id).await.unwrap();

        // 双方会话列表都有对方
        let alice_list = alice_sdk.conversations();
        let items = alice_list.refresh().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].friend.id, bob.id);

        // Alice 发 "hi"，Bob 未读 +1
        let alice_stream = alice_sdk.open_conversation(friendship.id).await.unwrap();
        alice_stream.set_text("hi").await;
        alice_stream.send().await.unwrap().unwrap();

        let bob_list = bob_sdk.conversations();
        let items = bob_list.refresh().await.unwrap();
        assert_eq!(items[0].unread_count, 1);
        assert_eq!(items[0].last_message.as_deref(), Some("hi"));

        // Bob 打开会话后未读清零
        let bob_stream = bob_sdk.open_conversation(friendship.id).await.unwrap();
        assert_eq!(bob_stream.entries().await.len(), 1);
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        let items = bob_list.refresh().await.unwrap();
        assert_eq!(items[0].unread_count, 0);
    }
}
