//! NSQ 客户端抽象
//!
//! 消费者只通过这里的 trait 驱动底层客户端：
//! - `Connector`：根据 topic / channel / 原生配置构造客户端
//! - `NsqClient`：安装日志、注册处理函数、连接、停止
//! - `Handler`：每条消息调用一次的处理函数

pub mod config;
pub mod message;
pub mod names;

pub use config::ClientConfig;
pub use message::{Message, MessageId};

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{HandlerResult, Result};
use crate::logging::{LogLevel, Logger};

/// 消息处理函数
///
/// 返回 `Err` 时消息会被重新入队，直到超过 `max_attempts`
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle_message(&self, message: &Message) -> HandlerResult;
}

/// 由闭包构造的处理函数
pub struct HandlerFn<F> {
    f: F,
}

/// 将异步闭包包装成 `Handler`
///
/// # 示例
/// ```rust,no_run
/// use nsq_queue::client::handler_fn;
///
/// let handler = handler_fn(|message| async move {
///     tracing::info!(attempts = message.attempts, "got message");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle_message(&self, message: &Message) -> HandlerResult {
        (self.f)(message.clone()).await
    }
}

/// 底层 NSQ 客户端
#[async_trait]
pub trait NsqClient: Send + Sync {
    /// 替换日志输出和级别
    fn set_logger(&mut self, logger: Arc<dyn Logger>, level: LogLevel);

    /// 注册处理函数，最多 `concurrency` 个调用并发执行
    fn add_concurrent_handlers(&mut self, handler: Arc<dyn Handler>, concurrency: usize);

    /// 连接所有 nsqd，遇到第一个错误即返回
    async fn connect_to_nsqds(&mut self, addresses: &[String]) -> Result<()>;

    /// 连接所有 nsqlookupd，遇到第一个错误即返回
    async fn connect_to_lookupds(&mut self, addresses: &[String]) -> Result<()>;

    /// 发出停止信号，不等待
    fn stop(&self);

    /// 等待客户端完全停止（在途的处理函数全部返回）
    async fn stopped(&self);
}

/// 客户端构造器
pub trait Connector: Send + Sync {
    type Client: NsqClient;

    /// 构造客户端
    ///
    /// # 参数
    /// * `topic` - 消费的 topic
    /// * `channel` - 消费的 channel
    /// * `config` - 客户端原生配置
    fn new_client(&self, topic: &str, channel: &str, config: &ClientConfig) -> Result<Self::Client>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_handler_fn_receives_message() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = handler_fn(move |message: Message| {
            let counter = counter.clone();
            async move {
                assert_eq!(message.body_str(), Some("hello"));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        handler.handle_message(&Message::new("hello")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
