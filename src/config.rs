//! 模块配置 - 启动时读取一次的扁平 key/value 配置
//!
//! 配置文件读取优先级：
//! 1. `--config` 指定的路径
//! 2. 环境变量 `PMTR_CONFIG`
//! 3. `~/.config/pm-telegram-relay/config.json`
//!
//! 配置来源于进程管理器的模块配置，值可能以字符串形式存储
//! （例如 `"true"`、`"100"`），因此读取时做宽松的类型转换。
//! 配置在进程生命周期内不可变。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use tracing::debug;

/// 配置文件路径环境变量
pub const CONFIG_ENV: &str = "PMTR_CONFIG";

/// 默认队列长度上限（超过则丢弃日志类事件）
pub const DEFAULT_QUEUE_LIMIT: usize = 100;

/// 中继自身的默认进程名（用于自我排除）
pub const DEFAULT_MODULE_NAME: &str = "pm-telegram-relay";

/// 群组 chat id 的前缀标记（配置格式约定，发送前剥除）
const GROUP_CHAT_MARKER: char = 'g';

/// 扁平 key/value 模块配置
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    values: Map<String, Value>,
}

impl ModuleConfig {
    /// 从 JSON 对象构造（测试和内嵌场景使用）
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            other => Err(anyhow!("Config must be a JSON object, got: {}", other)),
        }
    }

    /// 从文件加载配置；文件不存在或不可解析视为致命启动错误
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config file: {}", path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Cannot parse config file: {}", path.display()))?;
        debug!(path = %path.display(), "Loaded module config");
        Self::from_value(value)
    }

    /// 默认配置路径：`$PMTR_CONFIG` 或 `~/.config/pm-telegram-relay/config.json`
    fn default_path() -> Result<PathBuf> {
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            if !p.is_empty() {
                return Ok(PathBuf::from(p));
            }
        }
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        Ok(home.join(".config/pm-telegram-relay/config.json"))
    }

    /// 读取字符串值；数字也转为字符串（chat id 常以数字存储）
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// 先查 `<key>-<source>` 覆盖项，再回退到全局 `<key>`
    pub fn get_scoped_str(&self, key: &str, source: &str) -> Option<String> {
        self.get_str(&format!("{}-{}", key, source))
            .or_else(|| self.get_str(key))
    }

    /// 布尔开关；兼容字符串形式的配置值
    pub fn flag(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Some(Value::String(s)) => !s.is_empty() && s != "false" && s != "0",
            _ => false,
        }
    }

    /// 队列长度上限
    pub fn queue_limit(&self) -> usize {
        match self.values.get("queue_limit") {
            Some(Value::Number(n)) => n.as_u64().map(|v| v as usize).unwrap_or(DEFAULT_QUEUE_LIMIT),
            Some(Value::String(s)) => s.parse().unwrap_or(DEFAULT_QUEUE_LIMIT),
            _ => DEFAULT_QUEUE_LIMIT,
        }
    }

    /// 中继自身的进程名
    pub fn module_name(&self) -> String {
        self.get_str("module_name")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_MODULE_NAME.to_string())
    }

    /// stdout 日志事件开关
    pub fn log_enabled(&self) -> bool {
        self.flag("log")
    }

    /// stderr 日志事件开关
    pub fn error_enabled(&self) -> bool {
        self.flag("error")
    }

    /// kill 事件开关
    pub fn kill_enabled(&self) -> bool {
        self.flag("kill")
    }

    /// 未捕获异常事件开关
    pub fn exception_enabled(&self) -> bool {
        self.flag("exception")
    }

    /// 仅转发自动触发的自定义事件
    pub fn auto_event_only(&self) -> bool {
        self.flag("auto_event_only")
    }

    /// 自定义事件按事件名启用（配置中动态的布尔键）
    pub fn event_enabled(&self, event: &str) -> bool {
        self.flag(event)
    }
}

/// 解析后的通知目的地
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Bot token
    pub bot_token: String,
    /// Chat ID（已剥除群组前缀标记）
    pub chat_id: String,
    /// 话题 thread id（可选）
    pub message_thread_id: Option<String>,
}

/// 按来源进程名解析通知目的地，结果（含禁用态）进程级缓存
///
/// 配置在启动后不可变，因此缓存永不失效；首个未命中的查询写入，
/// 写入幂等，竞争只会导致一次重复解析而非不一致状态。
pub struct DestinationResolver {
    config: Arc<ModuleConfig>,
    cache: Mutex<HashMap<String, Option<Destination>>>,
}

impl DestinationResolver {
    /// 创建解析器
    pub fn new(config: Arc<ModuleConfig>) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 解析来源对应的目的地；token 或 chat id 缺失/为空时返回 None
    ///
    /// 该方法从不报错：配置缺失是合法的禁用状态，同样会被缓存，
    /// 使被禁用来源的重复查询只付一次解析成本。
    pub fn resolve(&self, source: &str) -> Option<Destination> {
        if let Some(hit) = self.cache.lock().unwrap().get(source) {
            return hit.clone();
        }

        let token = self
            .config
            .get_scoped_str("telegram_bot_token", source)
            .filter(|s| !s.is_empty());
        let chat_id = self
            .config
            .get_scoped_str("telegram_chat_id", source)
            .filter(|s| !s.is_empty());

        let dest = match (token, chat_id) {
            (Some(bot_token), Some(chat_id)) => Some(Destination {
                bot_token,
                chat_id: chat_id
                    .strip_prefix(GROUP_CHAT_MARKER)
                    .map(|s| s.to_string())
                    .unwrap_or(chat_id),
                message_thread_id: self
                    .config
                    .get_scoped_str("telegram_message_thread_id", source)
                    .filter(|s| !s.is_empty()),
            }),
            _ => {
                debug!(source = %source, "No telegram destination configured, notifications disabled");
                None
            }
        };

        self.cache
            .lock()
            .unwrap()
            .insert(source.to_string(), dest.clone());
        dest
    }

    #[cfg(test)]
    fn cache_contains(&self, source: &str) -> bool {
        self.cache.lock().unwrap().contains_key(source)
    }
}
