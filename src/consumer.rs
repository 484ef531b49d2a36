//! 消费者便捷层
//!
//! 减少每个程序启动 NSQ 消费者所需的样板代码，并不试图完全隐藏 NSQ：
//! - `set` / `set_map` 接受松散类型的选项，自定义选项由消费者处理，其余交给客户端原生配置
//! - 配置阶段的第一个错误会被保存，`start` 时才返回
//! - `stop` 发出停止信号并等待客户端完全退出

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::{ClientConfig, Connector, Handler, NsqClient};
use crate::error::{QueueError, Result};
use crate::logging::{LogLevel, Logger, TracingLogger};
use crate::options::{CustomOption, OptionValue, coerce};

/// 消费者状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerState {
    /// 刚创建，尚未设置任何选项
    Unconfigured,
    /// 已设置过选项
    Configured,
    /// 客户端已构造，正在连接
    Connecting,
    /// 已连接并在消费
    Running,
    /// 已停止
    Stopped,
}

impl ConsumerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerState::Unconfigured => "unconfigured",
            ConsumerState::Configured => "configured",
            ConsumerState::Connecting => "connecting",
            ConsumerState::Running => "running",
            ConsumerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// NSQ 消费者
///
/// # 使用示例
/// ```rust,no_run
/// use nsq_queue::{Consumer, MemoryBroker, handler_fn};
///
/// # async fn example() -> nsq_queue::Result<()> {
/// let broker = MemoryBroker::new();
/// broker.listen_nsqd(":5001");
///
/// let mut consumer = Consumer::with_connector("events", "ingestion", broker.connector());
/// consumer.set("nsqd", ":5001");
/// consumer.set("concurrency", 5);
/// consumer.set("max_in_flight", 150);
///
/// consumer
///     .start(handler_fn(|message| async move {
///         tracing::info!(id = %message.id, "received");
///         Ok(())
///     }))
///     .await?;
///
/// consumer.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Consumer<C: Connector> {
    connector: C,
    client: Option<C::Client>,
    config: ClientConfig,
    nsqds: Vec<String>,
    nsqlookupds: Vec<String>,
    concurrency: usize,
    channel: String,
    topic: String,
    level: LogLevel,
    logger: Arc<dyn Logger>,
    err: Option<QueueError>,
    state: ConsumerState,
}

impl<C: Connector> Consumer<C> {
    /// 创建 `topic` / `channel` 的消费者，使用指定的客户端构造器
    pub fn with_connector(topic: impl Into<String>, channel: impl Into<String>, connector: C) -> Self {
        Self {
            connector,
            client: None,
            config: ClientConfig::new(),
            nsqds: Vec::new(),
            nsqlookupds: Vec::new(),
            concurrency: 1,
            channel: channel.into(),
            topic: topic.into(),
            level: LogLevel::Info,
            logger: Arc::new(TracingLogger),
            err: None,
            state: ConsumerState::Unconfigured,
        }
    }

    /// 替换默认日志输出
    pub fn set_logger(&mut self, logger: Arc<dyn Logger>, level: LogLevel) {
        self.level = level;
        self.logger = logger;
    }

    /// 批量设置选项
    ///
    /// 按映射自身的迭代顺序逐个应用；相互影响的选项不要依赖顺序
    pub fn set_map<I, K, V>(&mut self, options: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<OptionValue>,
    {
        for (option, value) in options {
            self.set(option.as_ref(), value);
        }
    }

    /// 设置选项，错误会在 `start` 时返回
    ///
    /// 自定义选项：
    ///
    ///  - `topic` 消费的 topic
    ///  - `channel` 消费的 channel
    ///  - `nsqd` nsqd 地址
    ///  - `nsqds` nsqd 地址列表
    ///  - `nsqlookupd` nsqlookupd 地址
    ///  - `nsqlookupds` nsqlookupd 地址列表
    ///  - `concurrency` 并发处理函数数量 [1]
    ///
    /// 其余选项交给 `ClientConfig::set`
    pub fn set(&mut self, option: &str, value: impl Into<OptionValue>) {
        let value = value.into();
        if let Err(err) = self.apply(option, &value) {
            debug!(option = %option, error = %err, "Deferring consumer option error until start");
            if self.err.is_none() {
                self.err = Some(err);
            }
        }
        if self.state == ConsumerState::Unconfigured {
            self.state = ConsumerState::Configured;
        }
    }

    fn apply(&mut self, option: &str, value: &OptionValue) -> Result<()> {
        let Some(custom) = CustomOption::parse(option) else {
            return self.config.set(option, value);
        };
        let wrap = |reason: String| QueueError::option(custom.as_str(), reason);

        match custom {
            CustomOption::Topic => self.topic = coerce::string(value).map_err(wrap)?,
            CustomOption::Channel => self.channel = coerce::string(value).map_err(wrap)?,
            CustomOption::Nsqd => self.nsqds = vec![coerce::string(value).map_err(wrap)?],
            CustomOption::Nsqds => self.nsqds = coerce::strings(value).map_err(wrap)?,
            CustomOption::Nsqlookupd => {
                self.nsqlookupds = vec![coerce::string(value).map_err(wrap)?]
            }
            CustomOption::Nsqlookupds => self.nsqlookupds = coerce::strings(value).map_err(wrap)?,
            CustomOption::Concurrency => {
                self.concurrency = coerce::positive_int(value).map_err(wrap)?
            }
        }
        Ok(())
    }

    /// 使用 `handler` 启动消费者
    ///
    /// 依次返回：重复启动错误、延迟的配置错误、客户端构造错误、地址缺失错误、第一个连接错误
    pub async fn start(&mut self, handler: impl Handler) -> Result<()> {
        if matches!(
            self.state,
            ConsumerState::Connecting | ConsumerState::Running | ConsumerState::Stopped
        ) {
            return Err(QueueError::AlreadyStarted);
        }
        if let Some(err) = &self.err {
            warn!(
                topic = %self.topic,
                channel = %self.channel,
                category = %err.code().category(),
                error = %err,
                "Consumer configuration error"
            );
            return Err(err.clone());
        }

        let mut client = self.connector.new_client(&self.topic, &self.channel, &self.config)?;
        client.set_logger(self.logger.clone(), self.level);
        client.add_concurrent_handlers(Arc::new(handler), self.concurrency);
        self.state = ConsumerState::Connecting;

        let result = Self::connect(&mut client, &self.nsqds, &self.nsqlookupds).await;
        match result {
            Ok(()) => {
                info!(
                    topic = %self.topic,
                    channel = %self.channel,
                    nsqds = ?self.nsqds,
                    nsqlookupds = ?self.nsqlookupds,
                    concurrency = self.concurrency,
                    "Consumer started"
                );
                self.client = Some(client);
                self.state = ConsumerState::Running;
                Ok(())
            }
            Err(err) => {
                warn!(
                    topic = %self.topic,
                    channel = %self.channel,
                    category = %err.code().category(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "Consumer failed to connect"
                );
                client.stop();
                client.stopped().await;
                self.client = Some(client);
                self.state = ConsumerState::Stopped;
                Err(err)
            }
        }
    }

    /// 停止并等待
    ///
    /// 等待所有在途的处理函数返回，总是返回 `Ok(())`
    pub async fn stop(&mut self) -> Result<()> {
        let Some(client) = self.client.as_ref() else {
            debug!(topic = %self.topic, channel = %self.channel, "Stop called on a consumer that was never started");
            return Ok(());
        };

        client.stop();
        client.stopped().await;
        if self.state != ConsumerState::Stopped {
            info!(topic = %self.topic, channel = %self.channel, "Consumer stopped");
        }
        self.state = ConsumerState::Stopped;
        Ok(())
    }

    /// 连接配置的 nsqd 或 nsqlookupd
    async fn connect(client: &mut C::Client, nsqds: &[String], nsqlookupds: &[String]) -> Result<()> {
        if nsqds.is_empty() && nsqlookupds.is_empty() {
            return Err(QueueError::MissingAddress);
        }

        if !nsqds.is_empty() {
            client.connect_to_nsqds(nsqds).await?;
        }

        if !nsqlookupds.is_empty() {
            client.connect_to_lookupds(nsqlookupds).await?;
        }

        Ok(())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn nsqds(&self) -> &[String] {
        &self.nsqds
    }

    pub fn nsqlookupds(&self) -> &[String] {
        &self.nsqlookupds
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn log_level(&self) -> LogLevel {
        self.level
    }

    /// 客户端原生配置
    pub fn client_config(&self) -> &ClientConfig {
        &self.config
    }

    /// 尚未报告的配置错误
    pub fn pending_error(&self) -> Option<&QueueError> {
        self.err.as_ref()
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// 底层客户端（`start` 之后才存在）
    pub fn client(&self) -> Option<&C::Client> {
        self.client.as_ref()
    }
}

#[cfg(feature = "nsq")]
impl Consumer<crate::nsqd::NsqdConnector> {
    /// 返回 `topic` / `channel` 的消费者，连接真实的 nsqd / nsqlookupd
    pub fn new(topic: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::with_connector(topic, channel, crate::nsqd::NsqdConnector)
    }
}

impl<C: Connector> fmt::Debug for Consumer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("topic", &self.topic)
            .field("channel", &self.channel)
            .field("nsqds", &self.nsqds)
            .field("nsqlookupds", &self.nsqlookupds)
            .field("concurrency", &self.concurrency)
            .field("level", &self.level)
            .field("err", &self.err)
            .field("state", &self.state)
            .finish()
    }
}
