//! 错误处理模块
//!
//! 配置阶段的错误不会立即返回，而是保存在消费者中，直到 `start` 时才报告

pub mod code;
pub mod queue_error;

// 重新导出公共类型
pub use code::{ErrorCategory, ErrorCode};
pub use queue_error::{QueueError, Result};

/// 消息处理函数的结果类型
pub type HandlerResult = anyhow::Result<()>;
