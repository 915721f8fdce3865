//! 事件路由器 - 按类别过滤总线事件并决定入队或丢弃
//!
//! 路由器本身无状态（逐事件独立判定），持有配置句柄和队列句柄。
//! 准入控制在这里完成：日志类事件在入队前检查队列积压是否超过
//! `queue_limit`。该检查是 check-then-act 的尽力而为：并发入队
//! 竞争最多多放进一条，不会破坏一致性，因此无需同步。

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::bus::BusEvent;
use crate::config::ModuleConfig;
use crate::notification::queue::{NotifyRequest, QueueHandle};

/// 事件路由器
pub struct EventRouter {
    config: Arc<ModuleConfig>,
    queue: QueueHandle,
    /// 中继自身的进程名，命中则丢弃（避免通知风暴反馈回路）
    module_name: String,
    queue_limit: usize,
}

impl EventRouter {
    /// 创建路由器
    pub fn new(config: Arc<ModuleConfig>, queue: QueueHandle) -> Self {
        let module_name = config.module_name();
        let queue_limit = config.queue_limit();
        Self {
            config,
            queue,
            module_name,
            queue_limit,
        }
    }

    fn is_self(&self, source: &str) -> bool {
        source == self.module_name
    }

    fn over_limit(&self) -> bool {
        self.queue.pending() > self.queue_limit
    }

    fn enqueue(&self, source: String, text: String) {
        self.queue.enqueue(NotifyRequest { source, text });
    }

    /// 日志类事件（stdout/stderr）的共同判定：自我排除 + 积压上限
    fn dispatch_log(&self, source: String, data: String) {
        if self.is_self(&source) {
            return;
        }
        if self.over_limit() {
            debug!(source = %source, pending = self.queue.pending(), "Queue over limit, dropping log event");
            return;
        }
        self.enqueue(source, data);
    }

    /// 对单个事件应用类别过滤规则，入队或静默丢弃
    pub fn dispatch(&self, event: BusEvent) {
        match event {
            BusEvent::LogOut { process, data } => {
                if !self.config.log_enabled() {
                    return;
                }
                self.dispatch_log(process.name, data);
            }
            BusEvent::LogErr { process, data } => {
                if !self.config.error_enabled() {
                    return;
                }
                self.dispatch_log(process.name, data);
            }
            BusEvent::Kill { process, msg } => {
                if !self.config.kill_enabled() {
                    return;
                }
                // kill 事件不做任何过滤，自我排除和积压上限都不适用
                self.enqueue(process.name, msg);
            }
            BusEvent::Exception { process, data } => {
                if !self.config.exception_enabled() {
                    return;
                }
                if self.is_self(&process.name) {
                    return;
                }
                let text = data
                    .get("message")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| data.to_string());
                self.enqueue(process.name, text);
            }
            BusEvent::ProcessEvent {
                process,
                event,
                manually,
            } => {
                if !self.config.event_enabled(&event) {
                    return;
                }
                if self.config.auto_event_only() && manually {
                    return;
                }
                if self.is_self(&process.name) {
                    return;
                }
                self.enqueue(process.name, format!("{} event occurred", event));
            }
        }
    }

    /// 消费总线订阅直到通道关闭
    pub async fn run(&self, mut rx: broadcast::Receiver<BusEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.dispatch(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event bus receiver lagged, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
