//! 进程内 NSQ 实现
//!
//! `MemoryBroker` 在进程内模拟一组 nsqd / nsqlookupd：
//! - 每个 channel 都会收到 topic 的一份消息拷贝
//! - 同一 channel 的多个客户端竞争消费
//! - topic 还没有 channel 时，消息暂存在 topic 上，第一个 channel 创建时转入
//! - 处理失败的消息按 `default_requeue_delay` 重新入队，超过 `max_attempts` 后丢弃
//!
//! 用于测试和本地开发，不需要运行 nsqd

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::client::names::{self, normalize_lookupd, normalize_nsqd};
use crate::client::{ClientConfig, Connector, Handler, Message, NsqClient};
use crate::error::{QueueError, Result};
use crate::logging::{ClientLog, LogLevel, Logger, TracingLogger};

/// 进程内消息代理
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerState>,
}

#[derive(Default)]
struct BrokerState {
    nsqds: Mutex<Vec<String>>,
    lookupds: Mutex<HashSet<String>>,
    topics: Mutex<HashMap<String, TopicState>>,
    clients: AtomicU64,
}

#[derive(Default)]
struct TopicState {
    channels: HashMap<String, ChannelQueue>,
    backlog: VecDeque<Message>,
}

/// 单个 channel 的队列，同一 channel 的客户端共享接收端
#[derive(Clone)]
struct ChannelQueue {
    sender: mpsc::UnboundedSender<Message>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>>,
    depth: Arc<AtomicUsize>,
}

impl ChannelQueue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn push(&self, message: Message) {
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(message).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn recv(&self) -> Option<Message> {
        self.receiver.lock().await.recv().await
    }

    fn finish(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }

    /// 重新入队，不改变 depth
    fn requeue(&self, message: Message, delay: Duration) {
        if delay.is_zero() {
            let _ = self.sender.send(message);
            return;
        }
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(message);
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在 `address` 上提供 nsqd
    pub fn listen_nsqd(&self, address: &str) {
        let address = normalize_nsqd(address);
        let mut nsqds = lock(&self.inner.nsqds);
        if !nsqds.contains(&address) {
            debug!(address = %address, "Memory broker listening as nsqd");
            nsqds.push(address);
        }
    }

    /// 在 `address` 上提供 nsqlookupd，查询结果为该代理的所有 nsqd
    pub fn listen_lookupd(&self, address: &str) {
        let address = normalize_lookupd(address);
        debug!(address = %address, "Memory broker listening as nsqlookupd");
        lock(&self.inner.lookupds).insert(address);
    }

    fn has_nsqd(&self, address: &str) -> bool {
        lock(&self.inner.nsqds).iter().any(|a| a == address)
    }

    fn has_lookupd(&self, address: &str) -> bool {
        lock(&self.inner.lookupds).contains(address)
    }

    fn first_nsqd(&self) -> Option<String> {
        lock(&self.inner.nsqds).first().cloned()
    }

    /// 发布一条消息
    pub fn publish(&self, topic: &str, body: impl Into<Bytes>) -> Result<()> {
        if !names::is_valid_name(topic) {
            return Err(QueueError::invalid_name("topic", topic));
        }

        let message = Message::new(body);
        let mut topics = lock(&self.inner.topics);
        let state = topics.entry(topic.to_string()).or_default();

        if state.channels.is_empty() {
            state.backlog.push_back(message);
            return Ok(());
        }
        for queue in state.channels.values() {
            queue.push(message.clone());
        }
        Ok(())
    }

    /// channel 中尚未完成（排队或处理中）的消息数
    pub fn depth(&self, topic: &str, channel: &str) -> usize {
        lock(&self.inner.topics)
            .get(topic)
            .and_then(|state| state.channels.get(channel))
            .map(|queue| queue.depth.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// 创建使用该代理的客户端构造器
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    fn channel(&self, topic: &str, channel: &str) -> ChannelQueue {
        let mut topics = lock(&self.inner.topics);
        let state = topics.entry(topic.to_string()).or_default();

        if let Some(queue) = state.channels.get(channel) {
            return queue.clone();
        }

        let queue = ChannelQueue::new();
        for message in state.backlog.drain(..) {
            queue.push(message);
        }
        state.channels.insert(channel.to_string(), queue.clone());
        queue
    }

    fn next_client_id(&self) -> u64 {
        self.inner.clients.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// 进程内客户端构造器
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

impl Connector for MemoryConnector {
    type Client = MemoryClient;

    fn new_client(&self, topic: &str, channel: &str, config: &ClientConfig) -> Result<MemoryClient> {
        names::validate(topic, channel)?;
        config.validate()?;

        let id = self.broker.next_client_id();
        Ok(MemoryClient {
            broker: self.broker.clone(),
            topic: topic.to_string(),
            channel: channel.to_string(),
            config: Arc::new(config.clone()),
            log: ClientLog::new(Arc::new(TracingLogger), LogLevel::Info, id, topic, channel),
            handler: None,
            nsqds: Vec::new(),
            lookupds: Vec::new(),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            subscribed: false,
        })
    }
}

/// 进程内客户端
pub struct MemoryClient {
    broker: MemoryBroker,
    topic: String,
    channel: String,
    config: Arc<ClientConfig>,
    log: ClientLog,
    handler: Option<(Arc<dyn Handler>, usize)>,
    nsqds: Vec<String>,
    lookupds: Vec<String>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    subscribed: bool,
}

impl MemoryClient {
    /// 已连接的 nsqd 地址
    pub fn connected_nsqds(&self) -> &[String] {
        &self.nsqds
    }

    /// 已查询的 nsqlookupd 地址
    pub fn connected_lookupds(&self) -> &[String] {
        &self.lookupds
    }

    fn ensure_running(&self, address: &str) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::connection(address, "consumer stopped"));
        }
        Ok(())
    }

    /// 第一次连接成功时启动处理任务
    fn subscribe(&mut self, source: &str) -> Result<()> {
        if self.subscribed {
            return Ok(());
        }
        let Some((handler, concurrency)) = self.handler.clone() else {
            return Err(QueueError::connection(source, "no handlers"));
        };

        let queue = self.broker.channel(&self.topic, &self.channel);
        for _ in 0..concurrency {
            let worker = Worker {
                queue: queue.clone(),
                handler: handler.clone(),
                config: self.config.clone(),
                log: self.log.clone(),
                shutdown: self.shutdown.clone(),
                source: source.to_string(),
            };
            self.tracker.spawn(worker.run());
        }

        self.subscribed = true;
        self.log.debug(format!("started {} handler(s)", concurrency));
        Ok(())
    }
}

#[async_trait]
impl NsqClient for MemoryClient {
    fn set_logger(&mut self, logger: Arc<dyn Logger>, level: LogLevel) {
        self.log.set_logger(logger, level);
    }

    fn add_concurrent_handlers(&mut self, handler: Arc<dyn Handler>, concurrency: usize) {
        self.handler = Some((handler, concurrency.max(1)));
    }

    async fn connect_to_nsqds(&mut self, addresses: &[String]) -> Result<()> {
        for address in addresses {
            let address = normalize_nsqd(address);
            self.ensure_running(&address)?;
            if self.nsqds.contains(&address) {
                return Err(QueueError::connection(address, "already connected"));
            }

            self.log.info(format!("({}) connecting to nsqd", address));
            if !self.broker.has_nsqd(&address) {
                self.log.error(format!("({}) error connecting to nsqd - connection refused", address));
                return Err(QueueError::connection(address, "connection refused"));
            }

            self.nsqds.push(address.clone());
            self.subscribe(&address)?;
        }
        Ok(())
    }

    async fn connect_to_lookupds(&mut self, addresses: &[String]) -> Result<()> {
        for address in addresses {
            let address = normalize_lookupd(address);
            self.ensure_running(&address)?;
            if self.lookupds.contains(&address) {
                self.log.debug(format!("nsqlookupd {} already configured", address));
                continue;
            }

            self.log.info(format!("querying nsqlookupd {}", address));
            if !self.broker.has_lookupd(&address) {
                self.log.error(format!("error querying nsqlookupd ({}) - connection refused", address));
                return Err(QueueError::connection(address, "connection refused"));
            }
            self.lookupds.push(address.clone());

            let Some(source) = self.broker.first_nsqd() else {
                self.log.debug(format!("nsqlookupd {} returned no producers", address));
                continue;
            };
            if !self.nsqds.contains(&source) {
                self.log.info(format!("({}) connecting to nsqd", source));
                self.nsqds.push(source.clone());
            }
            self.subscribe(&source)?;
        }
        Ok(())
    }

    fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            self.log.info("stopping...");
        }
        self.shutdown.cancel();
        self.tracker.close();
    }

    async fn stopped(&self) {
        self.tracker.wait().await;
    }
}

/// 单个处理任务
struct Worker {
    queue: ChannelQueue,
    handler: Arc<dyn Handler>,
    config: Arc<ClientConfig>,
    log: ClientLog,
    shutdown: CancellationToken,
    source: String,
}

impl Worker {
    async fn run(self) {
        loop {
            // 停止信号只打断等待，正在执行的处理函数会先完成
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => None,
                message = self.queue.recv() => message,
            };
            let Some(mut message) = next else {
                break;
            };
            message.nsqd_address = self.source.clone();
            self.deliver(message).await;
        }
    }

    async fn deliver(&self, mut message: Message) {
        match self.handler.handle_message(&message).await {
            Ok(()) => {
                self.log.debug(format!("FIN {}", message.id));
                self.queue.finish();
            }
            Err(err) => {
                let max_attempts = self.config.max_attempts;
                if max_attempts > 0 && message.attempts >= max_attempts {
                    self.log.warn(format!(
                        "msg {} attempted {} times, giving up",
                        message.id, message.attempts
                    ));
                    self.queue.finish();
                    return;
                }

                let delay = self.config.requeue_delay(message.attempts);
                self.log.warn(format!(
                    "msg {} handler returned error ({:#}), requeueing in {:?}",
                    message.id, err, delay
                ));
                message.attempts = message.attempts.saturating_add(1);
                self.queue.requeue(message, delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::handler_fn;
    use crate::options::OptionValue;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio::time::timeout;

    fn counting_handler(tx: mpsc::UnboundedSender<Message>) -> Arc<dyn Handler> {
        Arc::new(handler_fn(move |message: Message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
                Ok(())
            }
        }))
    }

    #[tokio::test]
    async fn test_backlog_is_delivered_to_first_channel() {
        let broker = MemoryBroker::new();
        broker.listen_nsqd(":4150");
        broker.publish("events", "early").unwrap();

        let (tx, mut rx) = unbounded_channel();
        let mut client = broker
            .connector()
            .new_client("events", "ingestion", &ClientConfig::new())
            .unwrap();
        client.add_concurrent_handlers(counting_handler(tx), 1);
        client.connect_to_nsqds(&[":4150".to_string()]).await.unwrap();

        let message = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(message.body_str(), Some("early"));
        assert_eq!(message.nsqd_address, "127.0.0.1:4150");

        client.stop();
        client.stopped().await;
        assert_eq!(broker.depth("events", "ingestion"), 0);
    }

    #[tokio::test]
    async fn test_every_channel_gets_a_copy() {
        let broker = MemoryBroker::new();
        broker.listen_nsqd("127.0.0.1:4150");

        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        let mut a = broker.connector().new_client("events", "a", &ClientConfig::new()).unwrap();
        let mut b = broker.connector().new_client("events", "b", &ClientConfig::new()).unwrap();
        a.add_concurrent_handlers(counting_handler(tx_a), 1);
        b.add_concurrent_handlers(counting_handler(tx_b), 1);
        a.connect_to_nsqds(&["127.0.0.1:4150".to_string()]).await.unwrap();
        b.connect_to_nsqds(&["127.0.0.1:4150".to_string()]).await.unwrap();

        broker.publish("events", "fan-out").unwrap();

        let got_a = timeout(Duration::from_secs(1), rx_a.recv()).await.unwrap().unwrap();
        let got_b = timeout(Duration::from_secs(1), rx_b.recv()).await.unwrap().unwrap();
        assert_eq!(got_a.id, got_b.id);

        a.stop();
        b.stop();
        a.stopped().await;
        b.stopped().await;
    }

    #[tokio::test]
    async fn test_failed_messages_are_requeued_until_max_attempts() {
        let broker = MemoryBroker::new();
        broker.listen_nsqd(":4150");

        let mut config = ClientConfig::new();
        config.set("max_attempts", &OptionValue::from(3)).unwrap();
        config.set("default_requeue_delay", &OptionValue::from("0s")).unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let handler = Arc::new(handler_fn(move |_message: Message| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("boom"))
            }
        }));

        let mut client = broker.connector().new_client("events", "ingestion", &config).unwrap();
        client.add_concurrent_handlers(handler, 1);
        client.connect_to_nsqds(&[":4150".to_string()]).await.unwrap();
        broker.publish("events", "poison").unwrap();

        timeout(Duration::from_secs(2), async {
            while broker.depth("events", "ingestion") > 0 || attempts.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        client.stop();
        client.stopped().await;
    }

    #[tokio::test]
    async fn test_connect_refused_and_duplicates() {
        let broker = MemoryBroker::new();
        broker.listen_nsqd(":4150");

        let (tx, _rx) = unbounded_channel();
        let mut client = broker
            .connector()
            .new_client("events", "ingestion", &ClientConfig::new())
            .unwrap();
        client.add_concurrent_handlers(counting_handler(tx), 1);

        let err = client.connect_to_nsqds(&[":9999".to_string()]).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to connect to 127.0.0.1:9999: connection refused");

        client.connect_to_nsqds(&[":4150".to_string()]).await.unwrap();
        let err = client.connect_to_nsqds(&["127.0.0.1:4150".to_string()]).await.unwrap_err();
        assert!(err.to_string().ends_with("already connected"));

        client.stop();
        client.stopped().await;
        let err = client.connect_to_lookupds(&[":4161".to_string()]).await.unwrap_err();
        assert!(err.to_string().ends_with("consumer stopped"));
    }

    #[tokio::test]
    async fn test_lookupd_discovers_nsqd() {
        let broker = MemoryBroker::new();
        broker.listen_nsqd(":4150");
        broker.listen_lookupd(":4161");

        let (tx, mut rx) = unbounded_channel();
        let mut client = broker
            .connector()
            .new_client("events", "ingestion", &ClientConfig::new())
            .unwrap();
        client.add_concurrent_handlers(counting_handler(tx), 2);
        client.connect_to_lookupds(&["127.0.0.1:4161".to_string()]).await.unwrap();
        assert_eq!(client.connected_lookupds(), ["http://127.0.0.1:4161".to_string()]);
        assert_eq!(client.connected_nsqds(), ["127.0.0.1:4150".to_string()]);

        broker.publish("events", "via lookupd").unwrap();
        let message = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(message.body_str(), Some("via lookupd"));

        client.stop();
        client.stopped().await;
    }

    #[tokio::test]
    async fn test_lookupd_without_producers_records_no_nsqd() {
        let broker = MemoryBroker::new();
        broker.listen_lookupd(":4161");

        let (tx, _rx) = unbounded_channel();
        let mut client = broker
            .connector()
            .new_client("events", "ingestion", &ClientConfig::new())
            .unwrap();
        client.add_concurrent_handlers(counting_handler(tx), 1);
        client.connect_to_lookupds(&[":4161".to_string()]).await.unwrap();

        assert_eq!(client.connected_lookupds(), ["http://127.0.0.1:4161".to_string()]);
        assert!(client.connected_nsqds().is_empty());

        client.stop();
        client.stopped().await;
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_handler() {
        let broker = MemoryBroker::new();
        broker.listen_nsqd(":4150");

        let finished = Arc::new(AtomicUsize::new(0));
        let (started_tx, mut started_rx) = unbounded_channel::<()>();
        let done = finished.clone();
        let handler = Arc::new(handler_fn(move |_message: Message| {
            let done = done.clone();
            let started_tx = started_tx.clone();
            async move {
                let _ = started_tx.send(());
                tokio::time::sleep(Duration::from_millis(100)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        let mut client = broker
            .connector()
            .new_client("events", "ingestion", &ClientConfig::new())
            .unwrap();
        client.add_concurrent_handlers(handler, 1);
        client.connect_to_nsqds(&[":4150".to_string()]).await.unwrap();
        broker.publish("events", "slow").unwrap();

        started_rx.recv().await.unwrap();
        client.stop();
        client.stopped().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_rejects_bad_topic() {
        let broker = MemoryBroker::new();
        assert_eq!(
            broker.publish("bad topic", "x").unwrap_err().to_string(),
            "invalid topic name"
        );
    }
}
