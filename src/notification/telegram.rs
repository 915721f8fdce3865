//! Telegram 投递客户端
//!
//! 每条消息一次 `sendMessage` POST。投递失败（非 2xx 或传输错误）
//! 被封装为 [`SendResult::Failed`] 返回给队列 worker 记录后丢弃，
//! 从不向上抛错：单条消息失败不能阻塞或中断后续消息的转发。

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::Destination;

/// Telegram Bot API 地址
pub const TELEGRAM_API_HOST: &str = "https://api.telegram.org";

/// 请求超时（秒）
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// 单次投递的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    /// 投递成功（HTTP 2xx）
    Sent,
    /// 投递失败（非 2xx 状态码或传输错误）
    Failed(String),
}

/// 投递接口 - 队列 worker 对接的唯一出口
///
/// 实现必须保证不 panic、不返回错误：失败用 [`SendResult::Failed`]
/// 表达，由调用方记录日志后继续处理下一条。
pub trait Deliver: Send + Sync + 'static {
    /// 向目的地投递一条已净化的消息
    fn deliver(
        &self,
        dest: &Destination,
        text: &str,
    ) -> impl Future<Output = SendResult> + Send;
}

/// `sendMessage` 请求体
#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<&'a str>,
}

/// Telegram 客户端
#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: Client,
    api_host: String,
}

impl TelegramClient {
    /// 创建客户端
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| anyhow!("Cannot create HTTP client: {}", e))?;

        Ok(Self {
            client,
            api_host: TELEGRAM_API_HOST.to_string(),
        })
    }

    async fn send(&self, dest: &Destination, text: &str) -> SendResult {
        let url = format!("{}/bot{}/sendMessage", self.api_host, dest.bot_token);
        let body = SendMessageRequest {
            chat_id: &dest.chat_id,
            text,
            parse_mode: "MarkdownV2",
            message_thread_id: dest.message_thread_id.as_deref(),
        };

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => return SendResult::Failed(format!("Request failed: {}", e)),
        };

        let status = response.status();
        if status.is_success() {
            debug!(chat_id = %dest.chat_id, "Message delivered");
            SendResult::Sent
        } else {
            let body = response.text().await.unwrap_or_default();
            SendResult::Failed(format!("Status: {}\n{}", status.as_u16(), body))
        }
    }
}

impl Deliver for TelegramClient {
    fn deliver(
        &self,
        dest: &Destination,
        text: &str,
    ) -> impl Future<Output = SendResult> + Send {
        self.send(dest, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_omits_missing_thread_id() {
        let body = SendMessageRequest {
            chat_id: "12345",
            text: "hello",
            parse_mode: "MarkdownV2",
            message_thread_id: None,
        };

        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(
            json,
            r#"{"chat_id":"12345","text":"hello","parse_mode":"MarkdownV2"}"#
        );
    }

    #[test]
    fn test_request_body_includes_thread_id() {
        let body = SendMessageRequest {
            chat_id: "12345",
            text: "hello",
            parse_mode: "MarkdownV2",
            message_thread_id: Some("7"),
        };

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains(r#""message_thread_id":"7""#));
    }

    #[test]
    fn test_client_construction() {
        let client = TelegramClient::new().unwrap();
        assert_eq!(client.api_host, TELEGRAM_API_HOST);
    }
}
