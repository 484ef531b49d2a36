//! NSQ Queue Library
//!
//! A convenience layer for NSQ consumers: loosely-typed options with deferred
//! errors, a start/stop lifecycle, pluggable client backends and NSQ-style logging.

pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod memory;
pub mod options;

// tokio-nsq 客户端（可选）
#[cfg(feature = "nsq")]
pub mod nsqd;

// Re-exports
pub use client::{ClientConfig, Connector, Handler, HandlerFn, Message, MessageId, NsqClient, handler_fn};
pub use config::ConsumerDefinition;
pub use consumer::{Consumer, ConsumerState};
pub use error::{ErrorCategory, ErrorCode, HandlerResult, QueueError, Result};
pub use logging::{LogLevel, Logger, TracingLogger, WriterLogger, init_tracing};
pub use memory::{MemoryBroker, MemoryClient, MemoryConnector};
pub use options::{CustomOption, OptionValue};

#[cfg(feature = "nsq")]
pub use nsqd::{NsqdClient, NsqdConnector};
