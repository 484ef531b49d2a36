//! NSQ 客户端原生配置
//!
//! 以字符串键设置，键中的 `-` 会被替换为 `_`。每个选项都有固定的类型和取值范围，
//! 转换失败或越界时返回与 NSQ 客户端一致的错误文本

use std::time::Duration;

use crate::error::{QueueError, Result};
use crate::options::coerce;
use crate::options::{OptionValue, format_duration};

const MINUTE: Duration = Duration::from_secs(60);

/// 客户端原生配置
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// 连接超时
    pub dial_timeout: Duration,
    /// 读超时
    pub read_timeout: Duration,
    /// 写超时
    pub write_timeout: Duration,
    /// nsqlookupd 轮询间隔
    pub lookupd_poll_interval: Duration,
    /// nsqlookupd 轮询抖动系数（0..1）
    pub lookupd_poll_jitter: f64,
    /// 最大重新入队延迟
    pub max_requeue_delay: Duration,
    /// 默认重新入队延迟
    pub default_requeue_delay: Duration,
    /// 最大退避时长
    pub max_backoff_duration: Duration,
    /// 退避倍数
    pub backoff_multiplier: Duration,
    /// 消息最大尝试次数，0 表示不限制
    pub max_attempts: u16,
    /// 低 RDY 空闲超时
    pub low_rdy_idle_timeout: Duration,
    /// RDY 重新分配间隔
    pub rdy_redistribute_interval: Duration,
    pub client_id: String,
    pub hostname: String,
    pub user_agent: String,
    /// 心跳间隔
    pub heartbeat_interval: Duration,
    /// 采样率（0..99），0 表示不采样
    pub sample_rate: i32,
    pub deflate: bool,
    pub deflate_level: i32,
    pub snappy: bool,
    /// 是否请求 TLS（由底层连接负责协商）
    pub tls_v1: bool,
    pub output_buffer_size: i64,
    pub output_buffer_timeout: Duration,
    /// 最大在途消息数
    pub max_in_flight: i32,
    /// 消息超时，0 表示使用 nsqd 的默认值
    pub msg_timeout: Duration,
    pub auth_secret: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let client_id = hostname.split('.').next().unwrap_or(&hostname).to_string();

        Self {
            dial_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(1),
            lookupd_poll_interval: Duration::from_secs(60),
            lookupd_poll_jitter: 0.3,
            max_requeue_delay: 15 * MINUTE,
            default_requeue_delay: Duration::from_secs(90),
            max_backoff_duration: 2 * MINUTE,
            backoff_multiplier: Duration::from_secs(1),
            max_attempts: 5,
            low_rdy_idle_timeout: Duration::from_secs(10),
            rdy_redistribute_interval: Duration::from_secs(5),
            client_id,
            hostname,
            user_agent: format!("nsq-queue/{}", env!("CARGO_PKG_VERSION")),
            heartbeat_interval: Duration::from_secs(30),
            sample_rate: 0,
            deflate: false,
            deflate_level: 6,
            snappy: false,
            tls_v1: false,
            output_buffer_size: 16384,
            output_buffer_timeout: Duration::from_millis(250),
            max_in_flight: 1,
            msg_timeout: Duration::ZERO,
            auth_secret: String::new(),
        }
    }
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有支持的选项名
    pub const OPTIONS: [&'static str; 26] = [
        "dial_timeout",
        "read_timeout",
        "write_timeout",
        "lookupd_poll_interval",
        "lookupd_poll_jitter",
        "max_requeue_delay",
        "default_requeue_delay",
        "max_backoff_duration",
        "backoff_multiplier",
        "max_attempts",
        "low_rdy_idle_timeout",
        "rdy_redistribute_interval",
        "client_id",
        "hostname",
        "user_agent",
        "heartbeat_interval",
        "sample_rate",
        "deflate",
        "deflate_level",
        "snappy",
        "output_buffer_size",
        "output_buffer_timeout",
        "max_in_flight",
        "msg_timeout",
        "auth_secret",
        "tls_v1",
    ];

    /// 设置选项
    ///
    /// # 参数
    /// * `option` - 选项名，`-` 与 `_` 等价
    /// * `value` - 选项值
    pub fn set(&mut self, option: &str, value: &OptionValue) -> Result<()> {
        let option = option.replace('-', "_");
        let name = option.as_str();

        match name {
            "dial_timeout" => self.dial_timeout = duration(name, value, None, None)?,
            "read_timeout" => {
                self.read_timeout =
                    duration(name, value, Some(Duration::from_millis(100)), Some(5 * MINUTE))?
            }
            "write_timeout" => {
                self.write_timeout =
                    duration(name, value, Some(Duration::from_millis(100)), Some(5 * MINUTE))?
            }
            "lookupd_poll_interval" => {
                self.lookupd_poll_interval =
                    duration(name, value, Some(Duration::from_millis(10)), Some(5 * MINUTE))?
            }
            "lookupd_poll_jitter" => self.lookupd_poll_jitter = float(name, value, 0.0, 1.0)?,
            "max_requeue_delay" => {
                self.max_requeue_delay = duration(name, value, Some(Duration::ZERO), Some(60 * MINUTE))?
            }
            "default_requeue_delay" => {
                self.default_requeue_delay =
                    duration(name, value, Some(Duration::ZERO), Some(60 * MINUTE))?
            }
            "max_backoff_duration" => {
                self.max_backoff_duration =
                    duration(name, value, Some(Duration::ZERO), Some(60 * MINUTE))?
            }
            "backoff_multiplier" => {
                self.backoff_multiplier =
                    duration(name, value, Some(Duration::ZERO), Some(60 * MINUTE))?
            }
            "max_attempts" => self.max_attempts = integer(name, value, Some(0), Some(65535))? as u16,
            "low_rdy_idle_timeout" => {
                self.low_rdy_idle_timeout =
                    duration(name, value, Some(Duration::from_secs(1)), Some(5 * MINUTE))?
            }
            "rdy_redistribute_interval" => {
                self.rdy_redistribute_interval = duration(
                    name,
                    value,
                    Some(Duration::from_millis(1)),
                    Some(Duration::from_secs(5)),
                )?
            }
            "client_id" => self.client_id = text(name, value)?,
            "hostname" => self.hostname = text(name, value)?,
            "user_agent" => self.user_agent = text(name, value)?,
            "heartbeat_interval" => self.heartbeat_interval = duration(name, value, None, None)?,
            "sample_rate" => self.sample_rate = integer(name, value, Some(0), Some(99))? as i32,
            "deflate" => self.deflate = boolean(name, value)?,
            "deflate_level" => self.deflate_level = integer(name, value, Some(1), Some(9))? as i32,
            "snappy" => self.snappy = boolean(name, value)?,
            "output_buffer_size" => self.output_buffer_size = integer(name, value, None, None)?,
            "output_buffer_timeout" => {
                self.output_buffer_timeout = duration(name, value, None, None)?
            }
            "max_in_flight" => {
                self.max_in_flight = integer(name, value, Some(0), Some(i64::from(i32::MAX)))? as i32
            }
            "msg_timeout" => self.msg_timeout = duration(name, value, Some(Duration::ZERO), None)?,
            "auth_secret" => self.auth_secret = text(name, value)?,
            "tls_v1" => self.tls_v1 = boolean(name, value)?,
            _ => return Err(QueueError::InvalidOption(name.to_string())),
        }

        Ok(())
    }

    /// 校验选项组合
    pub fn validate(&self) -> Result<()> {
        if self.deflate && self.snappy {
            return Err(QueueError::InvalidConfig(
                "cannot enable both deflate and snappy compression".to_string(),
            ));
        }
        Ok(())
    }

    /// 计算第 `attempts` 次失败后的重新入队延迟
    pub fn requeue_delay(&self, attempts: u16) -> Duration {
        self.default_requeue_delay
            .saturating_mul(u32::from(attempts.max(1)))
            .min(self.max_requeue_delay)
    }
}

fn duration(
    option: &str,
    value: &OptionValue,
    min: Option<Duration>,
    max: Option<Duration>,
) -> Result<Duration> {
    let v = coerce::duration(value).map_err(|reason| QueueError::coerce(option, value, reason))?;
    if let Some(min) = min.filter(|min| v < *min) {
        return Err(QueueError::range(
            option,
            format_duration(v),
            format!("< {}", format_duration(min)),
        ));
    }
    if let Some(max) = max.filter(|max| v > *max) {
        return Err(QueueError::range(
            option,
            format_duration(v),
            format!("> {}", format_duration(max)),
        ));
    }
    Ok(v)
}

fn integer(option: &str, value: &OptionValue, min: Option<i64>, max: Option<i64>) -> Result<i64> {
    let v = coerce::integer(value).map_err(|reason| QueueError::coerce(option, value, reason))?;
    if let Some(min) = min.filter(|min| v < *min) {
        return Err(QueueError::range(option, v, format!("< {}", min)));
    }
    if let Some(max) = max.filter(|max| v > *max) {
        return Err(QueueError::range(option, v, format!("> {}", max)));
    }
    Ok(v)
}

fn float(option: &str, value: &OptionValue, min: f64, max: f64) -> Result<f64> {
    let v = coerce::float(value).map_err(|reason| QueueError::coerce(option, value, reason))?;
    if v < min {
        return Err(QueueError::range(option, v, format!("< {}", min)));
    }
    if v > max {
        return Err(QueueError::range(option, v, format!("> {}", max)));
    }
    Ok(v)
}

fn boolean(option: &str, value: &OptionValue) -> Result<bool> {
    coerce::boolean(value).map_err(|reason| QueueError::coerce(option, value, reason))
}

fn text(option: &str, value: &OptionValue) -> Result<String> {
    coerce::text(value).map_err(|reason| QueueError::coerce(option, value, reason))
}
