//! Duochat SDK - 双人私聊客户端 SDK
//!
//! 本 SDK 实现私聊应用面向客户端的一层：好友请求管理与双人会话视图，
//! 全部数据能力由平台后端（鉴权、带行级订阅的关系存储、文件存储）
//! 提供。核心是两个状态同步组件：
//! - 💬 会话列表同步器：把好友关系聚合成带最后消息/未读数的会话列表，
//!   随变更订阅保持新鲜
//! - 📨 消息流同步器：播种历史、追加推送、对乐观发送的本地消息与
//!   服务端确认行做对账
//! - 👥 好友请求服务：按邮箱发起请求、接受/拒绝、待处理列表
//! - ⚙️ 事件系统：统一的事件广播和订阅机制
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use duochat_sdk::backend::memory::{MemoryBackend, MemoryBlobStore};
//! use duochat_sdk::{DuochatConfig, DuochatSDK};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(MemoryBackend::new());
//!     let blobs = Arc::new(MemoryBlobStore::new("https://files.example.com"));
//!
//!     // 身份来自账号子系统；这里用内存后端直接注册
//!     let me = backend.register_profile("Alice", "alice@example.com").await;
//!     let sdk = DuochatSDK::new(DuochatConfig::default(), me, backend, blobs);
//!
//!     // 发起好友请求
//!     let friends = sdk.friends();
//!     let friendship = friends.send_request("bob@example.com").await?;
//!
//!     // 会话列表，随变更订阅自动刷新
//!     let conversations = sdk.conversations();
//!     conversations.start().await?;
//!
//!     // 打开会话并发消息
//!     let stream = sdk.open_conversation(friendship.id).await?;
//!     stream.set_text("Hello!").await;
//!     let _ = stream.send().await?;
//!
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod attachment;
pub mod backend;
pub mod conversation;
pub mod entities;
pub mod error;
pub mod events;
pub mod friends;
pub mod sdk;
pub mod timeline;
pub mod utils;
pub mod version;

// 重新导出核心类型，方便使用
pub use attachment::{storage_path, AttachmentDraft, AttachmentKind};
pub use backend::{
    Backend, BlobStore, ChangeEvent, ChangeFeed, ChangeOp, ChangeRow, ChangeSubscription,
    RemoteStore, Table,
};
pub use conversation::ConversationListSynchronizer;
pub use entities::{
    ConversationItem, Friendship, FriendshipId, FriendshipPatch, FriendshipStatus, Message,
    MessageId, MessagePatch, NewFriendship, NewMessage, Profile, ProfileId,
};
pub use error::{DuochatSDKError, Result};
pub use events::{EventFilter, EventManager, EventStats, FilteredEventReceiver, SdkEvent};
pub use friends::{FriendRequestService, PendingRequest};
pub use sdk::{DuochatConfig, DuochatConfigBuilder, DuochatSDK};
pub use timeline::{Composer, DateRun, MessageStreamSynchronizer, TimelineEntry, TimelineKey};
pub use utils::time::{TimeFormatter, TimezoneConfig};
pub use version::SDK_VERSION;
