//! 统一错误类型
//!
//! 错误信息文本与 NSQ 客户端保持一致，调用方可以直接比较 `to_string()`

use super::code::ErrorCode;
use thiserror::Error;

/// 消费者错误类型
///
/// 需要 `Clone`：延迟错误在每次 `start` 时都会返回一份拷贝
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// 自定义选项类型不匹配，例如 `"nsqds": string expected, got 5`
    #[error("{option:?}: {reason}")]
    Option { option: String, reason: String },

    /// 客户端原生选项无法转换为目标类型
    #[error("failed to coerce option {option} ({value}) - {reason}")]
    Coerce {
        option: String,
        value: String,
        reason: String,
    },

    /// 客户端原生选项超出允许范围，`bound` 形如 `< 100ms`
    #[error("invalid {option} ! {value} {bound}")]
    Range {
        option: String,
        value: String,
        bound: String,
    },

    /// 客户端不认识的选项
    #[error("invalid option {0}")]
    InvalidOption(String),

    /// 选项组合不合法
    #[error("{0}")]
    InvalidConfig(String),

    /// topic / channel 名称不合法
    #[error("invalid {kind} name")]
    InvalidName { kind: &'static str, name: String },

    /// 既没有 nsqd 地址也没有 nsqlookupd 地址
    #[error("at least one \"nsqd\" or \"nsqlookupd\" address must be configured")]
    MissingAddress,

    /// 底层客户端连接失败
    #[error("failed to connect to {address}: {reason}")]
    Connection { address: String, reason: String },

    /// 消费者已经启动过
    #[error("consumer already started")]
    AlreadyStarted,

    /// 配置文件读取或解析失败
    #[error("config file error: {0}")]
    ConfigFile(String),

    /// 日志输出失败
    #[error("logger error: {0}")]
    Logger(String),
}

impl QueueError {
    /// 创建自定义选项类型错误
    pub fn option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        QueueError::Option {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// 创建原生选项转换错误
    pub fn coerce(
        option: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        QueueError::Coerce {
            option: option.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// 创建原生选项范围错误
    pub fn range(option: impl Into<String>, value: impl ToString, bound: impl Into<String>) -> Self {
        QueueError::Range {
            option: option.into(),
            value: value.to_string(),
            bound: bound.into(),
        }
    }

    /// 创建名称错误
    pub fn invalid_name(kind: &'static str, name: impl Into<String>) -> Self {
        QueueError::InvalidName {
            kind,
            name: name.into(),
        }
    }

    /// 创建连接错误
    pub fn connection(address: impl Into<String>, reason: impl ToString) -> Self {
        QueueError::Connection {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            QueueError::Option { .. } => ErrorCode::OptionTypeMismatch,
            QueueError::Coerce { .. } => ErrorCode::OptionCoerceFailed,
            QueueError::Range { .. } => ErrorCode::OptionOutOfRange,
            QueueError::InvalidOption(_) => ErrorCode::OptionUnknown,
            QueueError::InvalidConfig(_) => ErrorCode::ConfigInvalid,
            QueueError::InvalidName { .. } => ErrorCode::NameInvalid,
            QueueError::MissingAddress => ErrorCode::AddressMissing,
            QueueError::Connection { .. } => ErrorCode::ConnectionFailed,
            QueueError::AlreadyStarted => ErrorCode::AlreadyStarted,
            QueueError::ConfigFile(_) => ErrorCode::ConfigFileError,
            QueueError::Logger(_) => ErrorCode::LoggerFailed,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

impl From<toml::de::Error> for QueueError {
    fn from(err: toml::de::Error) -> Self {
        QueueError::ConfigFile(err.to_string())
    }
}

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        QueueError::ConfigFile(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, QueueError>;
