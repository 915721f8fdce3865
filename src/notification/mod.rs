//! 通知管道 - 净化、串行队列与 Telegram 投递
//!
//! 数据流：路由器入队 → 队列 worker 逐条出队 → 净化正文 →
//! Telegram 客户端投递。投递失败被记录后吞掉，不影响后续消息。

pub mod queue;
pub mod sanitizer;
pub mod telegram;

pub use queue::{NotifyQueue, NotifyRequest, QueueHandle, QueueWorker};
pub use telegram::{Deliver, SendResult, TelegramClient};
