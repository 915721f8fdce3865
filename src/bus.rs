//! 事件总线 - 进程管理器生命周期事件的进程内广播
//!
//! [`BusEvent`] 按外部进程管理器的总线线格式建模（`type` 字段区分
//! 事件类别），[`Bus`] 是 [`tokio::sync::broadcast`] 的薄封装：
//! 多个生产者非阻塞发布，路由器作为订阅者消费。
//! 落后的订阅者会收到 `RecvError::Lagged(n)` 并跳过最旧的 n 条。

use serde::Deserialize;
use tokio::sync::broadcast;

/// 事件携带的进程标识
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessInfo {
    /// 来源进程名
    pub name: String,
}

/// 进程管理器总线事件
///
/// 线格式：`{"type": "log:out", "process": {"name": "api"}, "data": "..."}`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum BusEvent {
    /// stdout 日志片段
    #[serde(rename = "log:out")]
    LogOut { process: ProcessInfo, data: String },
    /// stderr 日志片段
    #[serde(rename = "log:err")]
    LogErr { process: ProcessInfo, data: String },
    /// 进程管理器 kill
    #[serde(rename = "pm2:kill")]
    Kill { process: ProcessInfo, msg: String },
    /// 未捕获异常，载荷结构不定
    #[serde(rename = "process:exception")]
    Exception {
        process: ProcessInfo,
        data: serde_json::Value,
    },
    /// 命名的自定义事件
    #[serde(rename = "process:event")]
    ProcessEvent {
        process: ProcessInfo,
        event: String,
        #[serde(default)]
        manually: bool,
    },
}

impl BusEvent {
    /// 来源进程名
    pub fn source_name(&self) -> &str {
        match self {
            BusEvent::LogOut { process, .. }
            | BusEvent::LogErr { process, .. }
            | BusEvent::Kill { process, .. }
            | BusEvent::Exception { process, .. }
            | BusEvent::ProcessEvent { process, .. } => &process.name,
        }
    }
}

/// 进程内事件广播通道
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<BusEvent>,
}

impl Bus {
    /// 创建指定容量的总线（容量至少为 1）
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 非阻塞发布；没有订阅者时事件被丢弃
    pub fn publish(&self, event: BusEvent) {
        let _ = self.tx.send(event);
    }

    /// 创建独立的订阅者，只接收订阅之后发布的事件
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}
