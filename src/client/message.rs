//! 消息类型

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// 消息 ID（16 字节 ASCII 十六进制）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; 16]);

impl MessageId {
    /// 生成进程内唯一的 ID
    pub fn next() -> Self {
        static SEQUENCE: AtomicU64 = AtomicU64::new(1);
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(format!("{:016x}", sequence).as_bytes());
        Self(bytes)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// 投递给处理函数的消息
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub body: Bytes,
    /// 投递次数，从 1 开始
    pub attempts: u16,
    pub timestamp: DateTime<Utc>,
    /// 投递该消息的 nsqd 地址
    pub nsqd_address: String,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            id: MessageId::next(),
            body: body.into(),
            attempts: 1,
            timestamp: Utc::now(),
            nsqd_address: String::new(),
        }
    }

    /// 以 UTF-8 读取消息体
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}
