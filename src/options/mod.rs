//! 选项模块
//!
//! 自定义选项是一个封闭的枚举，其余选项全部交给客户端的原生配置处理

pub mod coerce;
pub mod value;

pub use value::{OptionValue, format_duration};

use std::fmt;

/// 由消费者自身处理的选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomOption {
    /// 消费的 topic
    Topic,
    /// 消费的 channel
    Channel,
    /// 单个 nsqd 地址
    Nsqd,
    /// nsqd 地址列表
    Nsqds,
    /// 单个 nsqlookupd 地址
    Nsqlookupd,
    /// nsqlookupd 地址列表
    Nsqlookupds,
    /// 并发处理函数数量
    Concurrency,
}

impl CustomOption {
    /// 所有自定义选项
    pub const ALL: [CustomOption; 7] = [
        CustomOption::Topic,
        CustomOption::Channel,
        CustomOption::Nsqd,
        CustomOption::Nsqds,
        CustomOption::Nsqlookupd,
        CustomOption::Nsqlookupds,
        CustomOption::Concurrency,
    ];

    /// 按选项名查找，未知选项返回 `None`
    pub fn parse(option: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|custom| custom.as_str() == option)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CustomOption::Topic => "topic",
            CustomOption::Channel => "channel",
            CustomOption::Nsqd => "nsqd",
            CustomOption::Nsqds => "nsqds",
            CustomOption::Nsqlookupd => "nsqlookupd",
            CustomOption::Nsqlookupds => "nsqlookupds",
            CustomOption::Concurrency => "concurrency",
        }
    }
}

impl fmt::Display for CustomOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_custom_options() {
        for custom in CustomOption::ALL {
            assert_eq!(CustomOption::parse(custom.as_str()), Some(custom));
        }
        assert_eq!(CustomOption::parse("max_in_flight"), None);
        assert_eq!(CustomOption::parse("NSQD"), None);
    }
}
