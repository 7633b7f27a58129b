//! 附件处理 - 类型分类与上传路径
//!
//! 每条外发消息最多一个附件；按 MIME 前缀分成两类：
//! 图片（内联预览）和普通文件（链接展示）。上传路径以
//! friendship_id 做命名空间，文件名随机化避免碰撞。

use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::entities::FriendshipId;

/// 附件分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// 图片，界面内联预览
    Image,
    /// 其他文件，以链接展示
    File,
}

impl AttachmentKind {
    /// 按 MIME 前缀分类：`image/*` 为图片，其余一律按文件处理
    pub fn from_mime(content_type: &str) -> Self {
        if content_type.starts_with("image/") {
            AttachmentKind::Image
        } else {
            AttachmentKind::File
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::File => "file",
        }
    }
}

/// 待发送的附件草稿
///
/// `data` 用 Bytes 持有，克隆零拷贝，发送失败时恢复输入状态
/// 不需要复制内容。
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentDraft {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

impl AttachmentDraft {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    pub fn kind(&self) -> AttachmentKind {
        AttachmentKind::from_mime(&self.content_type)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

const RANDOM_NAME_LEN: usize = 16;

/// 生成上传路径：`{friendship_id}/{随机名}.{原扩展名}`
pub fn storage_path(friendship_id: FriendshipId, filename: &str) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_NAME_LEN)
        .map(char::from)
        .collect();
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => {
            format!("{}/{}.{}", friendship_id, random, ext)
        }
        _ => format!("{}/{}", friendship_id, random),
    }
}
