//! 错误代码和错误类别定义
//!
//! 错误代码按来源分组：
//! - 配置相关：自定义选项类型不匹配、客户端原生选项的转换/范围错误
//! - 连接相关：缺少地址、连接失败
//! - 生命周期相关：重复启动
//! - 基础设施相关：配置文件、日志输出

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ============================================================
    // 配置相关错误
    // ============================================================
    OptionTypeMismatch,
    OptionCoerceFailed,
    OptionOutOfRange,
    OptionUnknown,
    ConfigInvalid,
    NameInvalid,

    // ============================================================
    // 连接相关错误
    // ============================================================
    AddressMissing,
    ConnectionFailed,

    // ============================================================
    // 生命周期相关错误
    // ============================================================
    AlreadyStarted,

    // ============================================================
    // 基础设施相关错误
    // ============================================================
    ConfigFileError,
    LoggerFailed,
}

impl ErrorCode {
    /// 获取错误代码的字符串表示
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::OptionTypeMismatch => "OPTION_TYPE_MISMATCH",
            ErrorCode::OptionCoerceFailed => "OPTION_COERCE_FAILED",
            ErrorCode::OptionOutOfRange => "OPTION_OUT_OF_RANGE",
            ErrorCode::OptionUnknown => "OPTION_UNKNOWN",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::NameInvalid => "NAME_INVALID",
            ErrorCode::AddressMissing => "ADDRESS_MISSING",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::AlreadyStarted => "ALREADY_STARTED",
            ErrorCode::ConfigFileError => "CONFIG_FILE_ERROR",
            ErrorCode::LoggerFailed => "LOGGER_FAILED",
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::OptionTypeMismatch
            | ErrorCode::OptionCoerceFailed
            | ErrorCode::OptionOutOfRange
            | ErrorCode::OptionUnknown
            | ErrorCode::ConfigInvalid
            | ErrorCode::NameInvalid => ErrorCategory::Configuration,
            ErrorCode::AddressMissing | ErrorCode::ConnectionFailed => ErrorCategory::Connection,
            ErrorCode::AlreadyStarted => ErrorCategory::Lifecycle,
            ErrorCode::ConfigFileError | ErrorCode::LoggerFailed => ErrorCategory::Infrastructure,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 只有连接失败值得重试，配置错误重试也不会成功
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::ConnectionFailed)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// 配置错误（延迟到 start 时返回）
    Configuration,
    /// 连接错误
    Connection,
    /// 生命周期错误
    Lifecycle,
    /// 基础设施错误
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Lifecycle => "lifecycle",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::OptionCoerceFailed.category(), ErrorCategory::Configuration);
        assert_eq!(ErrorCode::AddressMissing.category(), ErrorCategory::Connection);
        assert_eq!(ErrorCode::AlreadyStarted.category(), ErrorCategory::Lifecycle);
        assert_eq!(ErrorCode::LoggerFailed.category(), ErrorCategory::Infrastructure);
    }

    #[test]
    fn test_error_code_serde() {
        let json = serde_json::to_string(&ErrorCode::OptionTypeMismatch).unwrap();
        assert_eq!(json, "\"OPTION_TYPE_MISMATCH\"");
        assert_eq!(ErrorCode::OptionTypeMismatch.to_string(), "OPTION_TYPE_MISMATCH");
    }

    #[test]
    fn test_only_connection_failures_retry() {
        assert!(ErrorCode::ConnectionFailed.is_retryable());
        assert!(!ErrorCode::AddressMissing.is_retryable());
        assert!(!ErrorCode::OptionCoerceFailed.is_retryable());
    }
}
