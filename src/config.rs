use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::client::Connector;
use crate::consumer::Consumer;
use crate::error::Result;
use crate::logging::{LogLevel, TracingLogger};

/// 从 TOML 读取的消费者定义
///
/// ```toml
/// topic = "events"
/// channel = "ingestion"
/// log_level = "warning"
///
/// [options]
/// nsqds = [":5001", ":5002"]
/// concurrency = 5
/// max_in_flight = 150
/// default_requeue_delay = "15s"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsumerDefinition {
    pub topic: String,
    pub channel: String,
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    /// 原样交给 `Consumer::set`，按键名顺序应用
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

impl ConsumerDefinition {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let definition: ConsumerDefinition = toml::from_str(content)?;
        Ok(definition)
    }

    /// 构造消费者并应用所有选项
    ///
    /// 选项错误不会在这里返回，而是留到 `start`
    pub fn into_consumer<C: Connector>(self, connector: C) -> Consumer<C> {
        let mut consumer = Consumer::with_connector(self.topic, self.channel, connector);
        if let Some(level) = self.log_level {
            consumer.set_logger(Arc::new(TracingLogger), level);
        }
        consumer.set_map(self.options);
        consumer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use crate::memory::MemoryBroker;
    use std::time::Duration;

    const DEFINITION: &str = r#"
topic = "events"
channel = "ingestion"
log_level = "warn"

[options]
nsqds = [":5001", ":5002"]
concurrency = 5
max_in_flight = 150
default_requeue_delay = "15s"
"#;

    #[test]
    fn test_parse_definition() {
        let definition = ConsumerDefinition::from_toml_str(DEFINITION).unwrap();
        assert_eq!(definition.topic, "events");
        assert_eq!(definition.channel, "ingestion");
        assert_eq!(definition.log_level, Some(LogLevel::Warning));
        assert_eq!(definition.options.len(), 4);
    }

    #[test]
    fn test_into_consumer_applies_options() {
        let definition = ConsumerDefinition::from_toml_str(DEFINITION).unwrap();
        let consumer = definition.into_consumer(MemoryBroker::new().connector());

        assert_eq!(consumer.nsqds(), [":5001".to_string(), ":5002".to_string()]);
        assert_eq!(consumer.concurrency(), 5);
        assert_eq!(consumer.log_level(), LogLevel::Warning);
        assert_eq!(consumer.client_config().max_in_flight, 150);
        assert_eq!(
            consumer.client_config().default_requeue_delay,
            Duration::from_secs(15)
        );
        assert!(consumer.pending_error().is_none());
    }

    #[test]
    fn test_bad_option_is_deferred() {
        let definition = ConsumerDefinition::from_toml_str(
            r#"
topic = "events"
channel = "ingestion"

[options]
max_in_flight = "oh noes"
"#,
        )
        .unwrap();
        let consumer = definition.into_consumer(MemoryBroker::new().connector());
        assert_eq!(consumer.log_level(), LogLevel::Info);
        assert!(matches!(
            consumer.pending_error(),
            Some(QueueError::Coerce { .. })
        ));
    }

    #[test]
    fn test_missing_topic_is_config_file_error() {
        let err = ConsumerDefinition::from_toml_str("channel = \"ingestion\"").unwrap_err();
        assert!(matches!(err, QueueError::ConfigFile(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = ConsumerDefinition::from_file("/nonexistent/consumer.toml").unwrap_err();
        assert!(matches!(err, QueueError::ConfigFile(_)));
    }
}
