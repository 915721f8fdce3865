//! pm-telegram-relay CLI
//!
//! 把进程管理器的生命周期事件中继到 Telegram 聊天。
//! `run` 子命令从 stdin 读取换行分隔的 JSON 总线事件并常驻运行；
//! `check-config` 和 `send-test` 用于部署时验证配置和凭据。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use pm_telegram_relay::notification::sanitizer;
use pm_telegram_relay::{
    Bus, BusEvent, Deliver, DestinationResolver, EventRouter, ModuleConfig, NotifyQueue,
    SendResult, TelegramClient,
};

#[derive(Parser)]
#[command(name = "pmtr")]
#[command(about = "进程管理器事件 → Telegram 通知中继")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行中继（从 stdin 读取总线事件，常驻直到 Ctrl+C）
    Run {
        /// 配置文件路径（默认 ~/.config/pm-telegram-relay/config.json）
        #[arg(long)]
        config: Option<PathBuf>,
        /// 进程内事件总线容量
        #[arg(long, default_value = "256")]
        bus_capacity: usize,
    },
    /// 检查配置并显示某来源解析出的目的地
    CheckConfig {
        /// 要解析的来源进程名（缺省时展示全局目的地）
        source: Option<String>,
        /// 配置文件路径
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// 通过真实管道发送一条测试消息验证凭据
    SendTest {
        /// 来源进程名（决定目的地和消息标题）
        source: String,
        /// 消息正文
        text: String,
        /// 配置文件路径
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 环境变量控制日志级别，默认 info
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pm_telegram_relay=info,pmtr=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            bus_capacity,
        } => run_relay(config.as_deref(), bus_capacity).await?,
        Commands::CheckConfig { source, config } => check_config(config.as_deref(), source)?,
        Commands::SendTest {
            source,
            text,
            config,
        } => send_test(config.as_deref(), source, text).await?,
    }

    Ok(())
}

/// 启动完整管道并常驻运行
async fn run_relay(config_path: Option<&Path>, bus_capacity: usize) -> Result<()> {
    // 启动期错误是致命的：配置不可读或客户端无法构建时直接退出非零
    let config = Arc::new(ModuleConfig::load(config_path)?);
    let resolver = DestinationResolver::new(config.clone());
    let client = TelegramClient::new()?;

    let (handle, worker) = NotifyQueue::new();
    tokio::spawn(worker.run(resolver, client));

    let router = EventRouter::new(config.clone(), handle);
    let bus = Bus::new(bus_capacity);
    let subscription = bus.subscribe();

    tokio::spawn(read_bus_from_stdin(bus));
    tokio::spawn(async move { router.run(subscription).await });

    info!(
        module = %config.module_name(),
        queue_limit = config.queue_limit(),
        "Relay started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

/// 从 stdin 读取换行分隔的 JSON 事件并发布到总线
///
/// 无法解析的行记录后跳过；输入关闭不终止中继本身。
async fn read_bus_from_stdin(bus: Bus) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<BusEvent>(line) {
                    Ok(event) => bus.publish(event),
                    Err(e) => warn!(error = %e, "Ignoring unparseable bus event"),
                }
            }
            Ok(None) => {
                info!("Event input closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read event input");
                break;
            }
        }
    }
}

/// 打印生效的配置和解析出的目的地
fn check_config(config_path: Option<&Path>, source: Option<String>) -> Result<()> {
    let config = Arc::new(ModuleConfig::load(config_path)?);

    println!("module_name:     {}", config.module_name());
    println!("queue_limit:     {}", config.queue_limit());
    println!(
        "categories:      log={} error={} kill={} exception={}",
        config.log_enabled(),
        config.error_enabled(),
        config.kill_enabled(),
        config.exception_enabled()
    );
    println!("auto_event_only: {}", config.auto_event_only());

    let probe = source.unwrap_or_else(|| "default".to_string());
    let resolver = DestinationResolver::new(config);
    match resolver.resolve(&probe) {
        Some(dest) => {
            println!(
                "destination[{}]: chat_id={} thread_id={} token={}",
                probe,
                dest.chat_id,
                dest.message_thread_id.as_deref().unwrap_or("-"),
                mask_token(&dest.bot_token)
            );
        }
        None => {
            println!(
                "destination[{}]: disabled (missing bot token or chat id)",
                probe
            );
        }
    }
    Ok(())
}

/// 发送一条测试消息；投递失败以非零状态退出
async fn send_test(config_path: Option<&Path>, source: String, text: String) -> Result<()> {
    let config = Arc::new(ModuleConfig::load(config_path)?);
    let resolver = DestinationResolver::new(config);

    let dest = match resolver.resolve(&source) {
        Some(dest) => dest,
        None => bail!("No destination configured for source: {}", source),
    };

    let client = TelegramClient::new()?;
    let message = sanitizer::format_message(&source, &text);
    match client.deliver(&dest, &message).await {
        SendResult::Sent => {
            println!("Sent to chat {}", dest.chat_id);
            Ok(())
        }
        SendResult::Failed(error) => {
            eprintln!("Delivery failed: {}", error);
            std::process::exit(1);
        }
    }
}

/// 脱敏显示 bot token
fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    format!("{}***", visible)
}
