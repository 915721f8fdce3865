//! pm-telegram-relay - 进程管理器生命周期事件 → Telegram 通知中继
//!
//! 数据流：外部总线事件 → [`EventRouter`]（类别过滤、自我排除、
//! 积压上限）→ 有界串行队列（FIFO，并发度 1）→ 净化 →
//! [`TelegramClient`] 投递。投递失败被记录后吞掉，永不重试、
//! 永不阻塞后续消息。

pub mod bus;
pub mod config;
pub mod notification;
pub mod router;

pub use bus::{Bus, BusEvent, ProcessInfo};
pub use config::{Destination, DestinationResolver, ModuleConfig};
pub use notification::{
    Deliver, NotifyQueue, NotifyRequest, QueueHandle, QueueWorker, SendResult, TelegramClient,
};
pub use router::EventRouter;
