//! 有界串行队列 - 并发生产者、单一消费者的通知管道
//!
//! 任意数量的并发生产者通过 [`QueueHandle::enqueue`] 非阻塞入队；
//! 唯一的 [`QueueWorker`] 按 FIFO 逐条出队（并发度固定为 1），
//! 净化后交给投递客户端。并发度 1 保证消息按产生顺序到达目的地，
//! 且任意时刻至多一个出站请求在途，天然契合目的地 API 的限流。
//!
//! 入队本身永远成功；准入控制在上一层（路由器）通过
//! [`QueueHandle::pending`] 与配置上限比较完成。投递客户端从不报错，
//! worker 因此没有自己的失败分支，记录结果后直接处理下一条。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::DestinationResolver;
use crate::notification::sanitizer;
use crate::notification::telegram::{Deliver, SendResult};

/// 一次通知请求；单次投递尝试后即被消费丢弃，不重入队
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyRequest {
    /// 来源进程名（作为消息标题）
    pub source: String,
    /// 原始事件文本
    pub text: String,
}

/// 队列的生产者句柄，可克隆
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<NotifyRequest>,
    pending: Arc<AtomicUsize>,
}

impl QueueHandle {
    /// 非阻塞入队，总是成功（worker 退出后静默丢弃）
    pub fn enqueue(&self, request: NotifyRequest) {
        // 先计数再发送：worker 的递减只发生在成功发送之后的出队，
        // 保证计数器不会下溢
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(request).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// 当前等待中的请求数；不阻塞投递，不含在途的那一条
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// 队列构造器
pub struct NotifyQueue;

impl NotifyQueue {
    /// 创建队列，返回生产者句柄和待启动的 worker
    pub fn new() -> (QueueHandle, QueueWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        (
            QueueHandle {
                tx,
                pending: pending.clone(),
            },
            QueueWorker { rx, pending },
        )
    }
}

/// 队列的唯一消费者
pub struct QueueWorker {
    rx: mpsc::UnboundedReceiver<NotifyRequest>,
    pending: Arc<AtomicUsize>,
}

impl QueueWorker {
    /// 运行消费循环，直到所有生产者句柄被丢弃
    ///
    /// 每条请求恰好尝试投递一次：解析目的地（未配置则跳过）、
    /// 截断并转义正文、投递、记录结果。没有重试，没有重入队。
    pub async fn run<D: Deliver>(mut self, resolver: DestinationResolver, deliverer: D) {
        while let Some(request) = self.rx.recv().await {
            self.pending.fetch_sub(1, Ordering::SeqCst);

            let dest = match resolver.resolve(&request.source) {
                Some(dest) => dest,
                None => {
                    debug!(source = %request.source, "No destination configured, skipping");
                    continue;
                }
            };

            let text = sanitizer::format_message(&request.source, &request.text);
            match deliverer.deliver(&dest, &text).await {
                SendResult::Sent => {
                    debug!(source = %request.source, "Notification sent");
                }
                SendResult::Failed(error) => {
                    // 失败只记录，不传播：下一条消息照常处理
                    warn!(source = %request.source, error = %error, "Notification delivery failed");
                }
            }
        }
    }
}

#[cfg(test)]
impl QueueWorker {
    /// 测试用：直接窥视队列中的下一条请求（不经过投递管道）
    pub(crate) fn try_next(&mut self) -> Option<NotifyRequest> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Destination, ModuleConfig};
    use serde_json::json;
    use std::future::Future;
    use std::sync::Mutex;
    use std::time::Duration;

    /// 记录投递顺序的 mock 客户端
    struct RecordingDeliver {
        log: Arc<Mutex<Vec<String>>>,
        fail_marker: Option<&'static str>,
    }

    impl Deliver for RecordingDeliver {
        fn deliver(
            &self,
            _dest: &Destination,
            text: &str,
        ) -> impl Future<Output = SendResult> + Send {
            let log = self.log.clone();
            let text = text.to_string();
            let fail_marker = self.fail_marker;
            async move {
                log.lock().unwrap().push(format!("start {}", marker(&text)));
                // 模拟网络耗时，暴露潜在的交错投递
                tokio::time::sleep(Duration::from_millis(10)).await;
                log.lock().unwrap().push(format!("end {}", marker(&text)));
                match fail_marker {
                    Some(m) if text.contains(m) => SendResult::Failed("Status: 429".to_string()),
                    _ => SendResult::Sent,
                }
            }
        }
    }

    /// 从格式化消息里提取正文标记（R1/R2/R3）
    fn marker(text: &str) -> String {
        ["R1", "R2", "R3"]
            .iter()
            .find(|m| text.contains(**m))
            .map(|m| m.to_string())
            .unwrap_or_else(|| "?".to_string())
    }

    fn resolver_with_credentials() -> DestinationResolver {
        DestinationResolver::new(Arc::new(
            ModuleConfig::from_value(json!({
                "telegram_bot_token": "123:abc",
                "telegram_chat_id": "12345"
            }))
            .unwrap(),
        ))
    }

    fn request(text: &str) -> NotifyRequest {
        NotifyRequest {
            source: "api".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_pending_counts_waiting_requests() {
        let (handle, _worker) = NotifyQueue::new();
        assert_eq!(handle.pending(), 0);

        handle.enqueue(request("R1"));
        handle.enqueue(request("R2"));
        handle.enqueue(request("R3"));

        assert_eq!(handle.pending(), 3);
    }

    #[tokio::test]
    async fn test_worker_delivers_in_fifo_order_without_overlap() {
        let (handle, worker) = NotifyQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let deliver = RecordingDeliver {
            log: log.clone(),
            fail_marker: None,
        };

        handle.enqueue(request("R1"));
        handle.enqueue(request("R2"));
        handle.enqueue(request("R3"));
        drop(handle); // 关闭通道，worker 排空后退出

        worker.run(resolver_with_credentials(), deliver).await;

        // 严格 FIFO，且 R2 的投递在 R1 完成之后才开始
        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec!["start R1", "end R1", "start R2", "end R2", "start R3", "end R3"]
        );
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_block_next_request() {
        let (handle, worker) = NotifyQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let deliver = RecordingDeliver {
            log: log.clone(),
            fail_marker: Some("R1"),
        };

        handle.enqueue(request("R1"));
        handle.enqueue(request("R2"));
        drop(handle);

        worker.run(resolver_with_credentials(), deliver).await;

        // R1 投递失败，R2 仍被尝试
        let log = log.lock().unwrap();
        assert!(log.contains(&"end R1".to_string()));
        assert!(log.contains(&"end R2".to_string()));
    }

    #[tokio::test]
    async fn test_worker_skips_sources_without_destination() {
        let (handle, worker) = NotifyQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let deliver = RecordingDeliver {
            log: log.clone(),
            fail_marker: None,
        };
        // 空配置：所有来源都未启用通知
        let resolver =
            DestinationResolver::new(Arc::new(ModuleConfig::from_value(json!({})).unwrap()));

        handle.enqueue(request("R1"));
        drop(handle);

        worker.run(resolver, deliver).await;

        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_drains_to_zero() {
        let (handle, worker) = NotifyQueue::new();
        let probe = handle.clone();
        let deliver = RecordingDeliver {
            log: Arc::new(Mutex::new(Vec::new())),
            fail_marker: None,
        };

        handle.enqueue(request("R1"));
        handle.enqueue(request("R2"));
        assert_eq!(probe.pending(), 2);
        drop(handle);

        let worker_task = tokio::spawn(worker.run(resolver_with_credentials(), deliver));

        // probe 句柄保持通道存活，worker 不会退出；等队列排空
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while probe.pending() > 0 {
            assert!(tokio::time::Instant::now() < deadline, "queue did not drain");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(probe.pending(), 0);

        drop(probe);
        worker_task.await.unwrap();
    }
}
