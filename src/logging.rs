//! 日志模块
//!
//! 客户端通过 `Logger` 输出 NSQ 风格的日志行（`INF    1 [topic/channel] ...`），
//! 默认实现转发到 `tracing`

use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{QueueError, Result};

/// 日志输出接口
pub trait Logger: Send + Sync {
    /// 输出一行日志
    ///
    /// # 参数
    /// * `call_depth` - 调用深度（供需要定位调用位置的实现使用）
    /// * `message` - 已格式化的日志内容
    fn output(&self, call_depth: usize, message: &str) -> Result<()>;
}

/// 日志级别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
    /// 关闭所有日志
    Max,
}

impl LogLevel {
    /// 日志行前缀
    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DBG",
            LogLevel::Info => "INF",
            LogLevel::Warning => "WRN",
            LogLevel::Error => "ERR",
            LogLevel::Max => "",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "DBG" => Some(LogLevel::Debug),
            "INF" => Some(LogLevel::Info),
            "WRN" => Some(LogLevel::Warning),
            "ERR" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "max" | "off" => Ok(LogLevel::Max),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// 转发到 `tracing` 的默认日志实现
///
/// 根据日志行前缀选择 `tracing` 级别，无前缀的行按 info 输出
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn output(&self, _call_depth: usize, message: &str) -> Result<()> {
        let level = message
            .split_whitespace()
            .next()
            .and_then(LogLevel::from_tag)
            .unwrap_or(LogLevel::Info);

        match level {
            LogLevel::Debug => tracing::debug!(target: "nsq", "{}", message),
            LogLevel::Info | LogLevel::Max => tracing::info!(target: "nsq", "{}", message),
            LogLevel::Warning => tracing::warn!(target: "nsq", "{}", message),
            LogLevel::Error => tracing::error!(target: "nsq", "{}", message),
        }
        Ok(())
    }
}

/// 写入任意 `Write` 的日志实现
pub struct WriterLogger<W: Write + Send> {
    writer: Mutex<W>,
    prefix: String,
}

impl<W: Write + Send> WriterLogger<W> {
    pub fn new(writer: W) -> Self {
        Self::with_prefix(writer, "")
    }

    /// 每行日志前附加前缀
    pub fn with_prefix(writer: W, prefix: impl Into<String>) -> Self {
        Self {
            writer: Mutex::new(writer),
            prefix: prefix.into(),
        }
    }
}

impl WriterLogger<Vec<u8>> {
    /// 获取已写入的内容（用于测试捕获日志）
    pub fn contents(&self) -> String {
        match self.writer.lock() {
            Ok(buffer) => String::from_utf8_lossy(&buffer).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

impl<W: Write + Send> Logger for WriterLogger<W> {
    fn output(&self, _call_depth: usize, message: &str) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| QueueError::Logger("writer lock poisoned".to_string()))?;
        writeln!(writer, "{}{}", self.prefix, message)
            .map_err(|e| QueueError::Logger(e.to_string()))
    }
}

/// 客户端内部使用的日志上下文
///
/// 负责级别过滤和 NSQ 风格的行格式
#[derive(Clone)]
pub struct ClientLog {
    logger: Arc<dyn Logger>,
    level: LogLevel,
    id: u64,
    prefix: String,
}

impl ClientLog {
    pub fn new(logger: Arc<dyn Logger>, level: LogLevel, id: u64, topic: &str, channel: &str) -> Self {
        Self {
            logger,
            level,
            id,
            prefix: format!("{}/{}", topic, channel),
        }
    }

    /// 替换日志输出和级别
    pub fn set_logger(&mut self, logger: Arc<dyn Logger>, level: LogLevel) {
        self.logger = logger;
        self.level = level;
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Max && level >= self.level
    }

    /// 按级别输出一行日志
    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        if !self.enabled(level) {
            return;
        }
        let line = format!(
            "{:<4} {:>3} [{}] {}",
            level.tag(),
            self.id,
            self.prefix,
            message.as_ref()
        );
        if let Err(err) = self.logger.output(2, &line) {
            tracing::warn!(error = %err, "Failed to write consumer log line");
        }
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message);
    }
}

/// 初始化 `tracing` 订阅器
///
/// `RUST_LOG` 优先，未设置时使用 `default_directive`（例如 `"info"` 或 `"nsq_queue=debug"`）
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| QueueError::Logger(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| QueueError::Logger(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse_and_order() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert!(LogLevel::Debug < LogLevel::Info);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_client_log_filters_by_level() {
        let writer = Arc::new(WriterLogger::new(Vec::new()));
        let log = ClientLog::new(writer.clone(), LogLevel::Info, 1, "events", "ingestion");

        log.debug("hidden");
        log.info("connecting to nsqd");

        let contents = writer.contents();
        assert!(!contents.contains("hidden"));
        assert_eq!(contents, "INF    1 [events/ingestion] connecting to nsqd\n");
    }

    #[test]
    fn test_max_level_disables_output() {
        let writer = Arc::new(WriterLogger::new(Vec::new()));
        let log = ClientLog::new(writer.clone(), LogLevel::Max, 1, "events", "ingestion");
        log.error("nothing");
        assert!(writer.contents().is_empty());
    }

    #[test]
    fn test_writer_logger_prefix() {
        let writer = WriterLogger::with_prefix(Vec::new(), "queue: ");
        writer.output(1, "hello").unwrap();
        assert_eq!(writer.contents(), "queue: hello\n");
    }

    #[test]
    fn test_tracing_logger_never_fails() {
        assert!(TracingLogger.output(2, "WRN    1 [a/b] slow").is_ok());
        assert!(TracingLogger.output(2, "plain line").is_ok());
    }
}
