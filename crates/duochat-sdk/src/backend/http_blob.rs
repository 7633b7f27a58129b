//! HTTP 文件存储 - 走普通 HTTP 文件服务的 BlobStore 实现
//!
//! 使用 reqwest 作为底层 HTTP 客户端，multipart 上传，
//! 服务端返回 JSON `{ "url": "..." }`。

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Client};
use tracing::{error, info};

use super::BlobStore;
use crate::error::{DuochatSDKError, Result};

/// HTTP 客户端配置
#[derive(Debug, Clone)]
pub struct HttpBlobConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpBlobConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(60),
        }
    }
}

/// 上传响应
#[derive(Debug, Clone, serde::Deserialize)]
struct UploadResponse {
    url: String,
}

/// 基于 HTTP 文件服务的附件存储
pub struct HttpBlobStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBlobStore {
    /// 创建客户端；`base_url` 形如 `https://files.example.com/api`
    pub fn new(base_url: impl Into<String>, config: &HttpBlobConfig) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }
        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| DuochatSDKError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token: None,
        })
    }

    /// 设置上传凭证（Bearer token）
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, path: &str, content_type: &str, data: Bytes) -> Result<String> {
        let size = data.len();
        let filename = path.rsplit('/').next().unwrap_or("file").to_string();

        let part = multipart::Part::bytes(data.to_vec())
            .file_name(filename)
            .mime_str(content_type)
            .map_err(|e| DuochatSDKError::Upload(format!("创建 multipart part 失败: {}", e)))?;
        let form = multipart::Form::new()
            .text("path", path.to_string())
            .part("file", part);

        let mut request = self
            .client
            .post(format!("{}/upload", self.base_url.trim_end_matches('/')))
            .multipart(form);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "无法读取错误信息".to_string());
            error!("❌ 上传失败，HTTP 状态码: {}, 错误: {}", status, body);
            return Err(DuochatSDKError::Upload(format!(
                "HTTP {} ({})",
                status, body
            )));
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| DuochatSDKError::Serialization(format!("解析上传响应失败: {}", e)))?;

        info!("✅ 附件上传成功: path={}, {} bytes", path, size);
        Ok(parsed.url)
    }
}
