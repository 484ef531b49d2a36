//! topic / channel 名称校验与地址规范化

use crate::error::{QueueError, Result};

const MAX_NAME_LENGTH: usize = 64;
const EPHEMERAL_SUFFIX: &str = "#ephemeral";

/// 校验名称：1..=64 个字符，只允许 `[.a-zA-Z0-9_-]`，可带 `#ephemeral` 后缀
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return false;
    }
    let base = name.strip_suffix(EPHEMERAL_SUFFIX).unwrap_or(name);
    !base.is_empty()
        && base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// 校验 topic 和 channel，任一不合法即返回错误
pub fn validate(topic: &str, channel: &str) -> Result<()> {
    if !is_valid_name(topic) {
        return Err(QueueError::invalid_name("topic", topic));
    }
    if !is_valid_name(channel) {
        return Err(QueueError::invalid_name("channel", channel));
    }
    Ok(())
}

/// 规范化 nsqd TCP 地址：`:4150` 补全为 `127.0.0.1:4150`
pub fn normalize_nsqd(address: &str) -> String {
    let address = address.trim();
    match address.strip_prefix(':') {
        Some(port) => format!("127.0.0.1:{}", port),
        None => address.to_string(),
    }
}

/// 规范化 nsqlookupd HTTP 地址：补全 `http://` 前缀并去掉尾部 `/`
pub fn normalize_lookupd(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        return address.to_string();
    }
    format!("http://{}", normalize_nsqd(address))
}
