//! 基于 tokio-nsq 的客户端
//!
//! 连接真实的 nsqd / nsqlookupd：
//! - 连接前用 TCP 探测地址，使连接错误在 `start` 时返回
//! - 每组地址对应一个 `NSQConsumer`，由一个拉取任务分发给处理函数
//! - 处理函数的并发由信号量限制，跨所有地址组共享

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_nsq::{
    NSQChannel, NSQConsumer, NSQConsumerConfig, NSQConsumerConfigSources, NSQConsumerLookupConfig,
    NSQMessage, NSQRequeueDelay, NSQTopic,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::client::names::{self, normalize_lookupd, normalize_nsqd};
use crate::client::{ClientConfig, Connector, Handler, Message, MessageId, NsqClient};
use crate::error::{QueueError, Result};
use crate::logging::{ClientLog, LogLevel, Logger, TracingLogger};

/// tokio-nsq 客户端构造器
#[derive(Debug, Clone, Copy, Default)]
pub struct NsqdConnector;

impl Connector for NsqdConnector {
    type Client = NsqdClient;

    fn new_client(&self, topic: &str, channel: &str, config: &ClientConfig) -> Result<NsqdClient> {
        names::validate(topic, channel)?;
        config.validate()?;

        let nsq_topic = NSQTopic::new(topic).ok_or_else(|| QueueError::invalid_name("topic", topic))?;
        let nsq_channel =
            NSQChannel::new(channel).ok_or_else(|| QueueError::invalid_name("channel", channel))?;

        Ok(NsqdClient {
            topic: nsq_topic,
            channel: nsq_channel,
            config: Arc::new(config.clone()),
            log: ClientLog::new(Arc::new(TracingLogger), LogLevel::Info, 1, topic, channel),
            handler: None,
            nsqds: Vec::new(),
            lookupds: Vec::new(),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }
}

/// tokio-nsq 客户端
pub struct NsqdClient {
    topic: Arc<NSQTopic>,
    channel: Arc<NSQChannel>,
    config: Arc<ClientConfig>,
    log: ClientLog,
    handler: Option<(Arc<dyn Handler>, Arc<Semaphore>, usize)>,
    nsqds: Vec<String>,
    lookupds: Vec<String>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl NsqdClient {
    pub fn connected_nsqds(&self) -> &[String] {
        &self.nsqds
    }

    pub fn connected_lookupds(&self) -> &[String] {
        &self.lookupds
    }

    fn ensure_running(&self, address: &str) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::connection(address, "consumer stopped"));
        }
        Ok(())
    }

    fn max_in_flight(&self) -> u32 {
        u32::try_from(self.config.max_in_flight).unwrap_or(0).max(1)
    }

    /// 为一组地址启动 `NSQConsumer` 和拉取任务
    fn spawn_consumer(&self, source: String, sources: NSQConsumerConfigSources) -> Result<()> {
        let Some((handler, permits, concurrency)) = self.handler.clone() else {
            return Err(QueueError::connection(source, "no handlers"));
        };

        let consumer = NSQConsumerConfig::new(self.topic.clone(), self.channel.clone())
            .set_max_in_flight(self.max_in_flight())
            .set_sources(sources)
            .build();

        let pump = Pump {
            consumer,
            handler,
            permits,
            concurrency,
            config: self.config.clone(),
            log: self.log.clone(),
            shutdown: self.shutdown.clone(),
            tracker: self.tracker.clone(),
            source,
        };
        self.tracker.spawn(pump.run());
        Ok(())
    }
}

#[async_trait]
impl NsqClient for NsqdClient {
    fn set_logger(&mut self, logger: Arc<dyn Logger>, level: LogLevel) {
        self.log.set_logger(logger, level);
    }

    fn add_concurrent_handlers(&mut self, handler: Arc<dyn Handler>, concurrency: usize) {
        let concurrency = concurrency.max(1);
        self.handler = Some((handler, Arc::new(Semaphore::new(concurrency)), concurrency));
    }

    async fn connect_to_nsqds(&mut self, addresses: &[String]) -> Result<()> {
        let mut batch = Vec::with_capacity(addresses.len());
        for address in addresses {
            let address = normalize_nsqd(address);
            self.ensure_running(&address)?;
            if self.nsqds.contains(&address) || batch.contains(&address) {
                return Err(QueueError::connection(address, "already connected"));
            }

            self.log.info(format!("({}) connecting to nsqd", address));
            if let Err(err) = probe(&address, self.config.dial_timeout).await {
                self.log.error(format!("({}) error connecting to nsqd - {}", address, err));
                return Err(err);
            }
            batch.push(address);
        }

        if let Some(first) = batch.first().cloned() {
            self.spawn_consumer(first, NSQConsumerConfigSources::Daemons(batch.clone()))?;
        }
        self.nsqds.extend(batch);
        Ok(())
    }

    async fn connect_to_lookupds(&mut self, addresses: &[String]) -> Result<()> {
        let mut batch = HashSet::with_capacity(addresses.len());
        for address in addresses {
            let address = normalize_lookupd(address);
            self.ensure_running(&address)?;
            if self.lookupds.contains(&address) || batch.contains(&address) {
                self.log.debug(format!("nsqlookupd {} already configured", address));
                continue;
            }

            self.log.info(format!("querying nsqlookupd {}", address));
            if let Err(err) = probe(&lookupd_host(&address), self.config.dial_timeout).await {
                self.log.error(format!("error querying nsqlookupd ({}) - {}", address, err));
                return Err(QueueError::connection(address, connection_reason(&err)));
            }
            batch.insert(address);
        }

        let Some(first) = batch.iter().next().cloned() else {
            return Ok(());
        };
        let lookup = NSQConsumerLookupConfig::new()
            .set_poll_interval(self.config.lookupd_poll_interval)
            .set_addresses(batch.clone());
        self.spawn_consumer(first, NSQConsumerConfigSources::Lookup(lookup))?;
        self.lookupds.extend(batch);
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

/// 从一个 `NSQConsumer` 拉取消息并分发
struct Pump {
    consumer: NSQConsumer,
    handler: Arc<dyn Handler>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    config: Arc<ClientConfig>,
    log: ClientLog,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    source: String,
}

impl Pump {
    async fn run(mut self) {
        loop {
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                break;
            };

            let message = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                message = self.consumer.consume_filtered() => message,
            };
            let Some(message) = message else {
                break;
            };

            let delivery = Delivery {
                handler: self.handler.clone(),
                config: self.config.clone(),
                log: self.log.clone(),
                source: self.source.clone(),
            };
            self.tracker.spawn(async move {
                delivery.deliver(message).await;
                drop(permit);
            });
        }

        // 在途消息确认完成后才释放连接
        let permits = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        let _ = self.permits.acquire_many(permits).await;
        debug!(source = %self.source, "nsqd consumer closed");
    }
}

struct Delivery {
    handler: Arc<dyn Handler>,
    config: Arc<ClientConfig>,
    log: ClientLog,
    source: String,
}

impl Delivery {
    async fn deliver(self, raw: NSQMessage) {
        let message = Message {
            id: MessageId::next(),
            body: Bytes::copy_from_slice(&raw.body),
            attempts: raw.attempt,
            timestamp: timestamp(raw.timestamp),
            nsqd_address: self.source.clone(),
        };

        let max_attempts = self.config.max_attempts;
        if max_attempts > 0 && message.attempts > max_attempts {
            self.log.warn(format!(
                "msg {} attempted {} times, giving up",
                message.id, message.attempts
            ));
            raw.finish().await;
            return;
        }

        match self.handler.handle_message(&message).await {
            Ok(()) => {
                self.log.debug(format!("FIN {}", message.id));
                raw.finish().await;
            }
            Err(err) => {
                if max_attempts > 0 && message.attempts >= max_attempts {
                    self.log.warn(format!(
                        "msg {} attempted {} times, giving up",
                        message.id, message.attempts
                    ));
                    raw.finish().await;
                    return;
                }

                let delay = self.config.requeue_delay(message.attempts);
                self.log.warn(format!(
                    "msg {} handler returned error ({:#}), requeueing in {:?}",
                    message.id, err, delay
                ));
                raw.requeue(NSQRequeueDelay::CustomDelay(delay)).await;
            }
        }
    }
}

fn timestamp(nanos: u64) -> DateTime<Utc> {
    i64::try_from(nanos)
        .map(DateTime::from_timestamp_nanos)
        .unwrap_or_else(|_| Utc::now())
}

/// 在 `dial_timeout` 内建立一次 TCP 连接，零表示不限时
async fn probe(address: &str, dial_timeout: Duration) -> Result<()> {
    let connect = TcpStream::connect(address);
    let result = if dial_timeout.is_zero() {
        connect.await
    } else {
        match tokio::time::timeout(dial_timeout, connect).await {
            Ok(result) => result,
            Err(_) => return Err(QueueError::connection(address, "i/o timeout")),
        }
    };
    result
        .map(drop)
        .map_err(|err| QueueError::connection(address, err))
}

/// `http://host:port/path` 中的 `host:port`
fn lookupd_host(address: &str) -> String {
    let rest = address
        .strip_prefix("http://")
        .or_else(|| address.strip_prefix("https://"))
        .unwrap_or(address);
    let host = rest.split('/').next().unwrap_or(rest);
    if host.contains(':') {
        host.to_string()
    } else if address.starts_with("https://") {
        format!("{}:443", host)
    } else {
        format!("{}:80", host)
    }
}

fn connection_reason(err: &QueueError) -> String {
    match err {
        QueueError::Connection { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_lookupd_host() {
        assert_eq!(lookupd_host("http://127.0.0.1:4161"), "127.0.0.1:4161");
        assert_eq!(lookupd_host("http://lookupd:4161/lookup"), "lookupd:4161");
        assert_eq!(lookupd_host("http://lookupd"), "lookupd:80");
        assert_eq!(lookupd_host("https://lookupd"), "lookupd:443");
    }

    #[test]
    fn test_timestamp_from_nanos() {
        assert_eq!(timestamp(1_500_000_000_000_000_000).timestamp(), 1_500_000_000);
    }

    #[tokio::test]
    async fn test_probe_open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        assert!(probe(&address, Duration::from_secs(1)).await.is_ok());

        drop(listener);
        let err = probe(&address, Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().starts_with(&format!("failed to connect to {}", address)));
    }

    #[tokio::test]
    async fn test_connect_refused_reports_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut client = NsqdConnector
            .new_client("events", "ingestion", &ClientConfig::new())
            .unwrap();
        let err = client.connect_to_nsqds(&[address.clone()]).await.unwrap_err();
        assert!(matches!(err, QueueError::Connection { address: a, .. } if a == address));
        assert!(client.connected_nsqds().is_empty());

        client.stop();
        client.stopped().await;
    }

    #[tokio::test]
    async fn test_duplicate_lookupds_are_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = NsqdConnector
            .new_client("events", "ingestion", &ClientConfig::new())
            .unwrap();
        client.add_concurrent_handlers(
            Arc::new(crate::client::handler_fn(|_message: Message| async move { Ok(()) })),
            1,
        );
        client
            .connect_to_lookupds(&[format!(":{}", port), format!("127.0.0.1:{}", port)])
            .await
            .unwrap();
        assert_eq!(client.connected_lookupds(), [format!("http://127.0.0.1:{}", port)]);

        client.stop();
        client.stopped().await;
    }

    #[test]
    fn test_invalid_names_rejected() {
        let err = NsqdConnector
            .new_client("bad topic", "ingestion", &ClientConfig::new())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "invalid topic name");
    }
}
