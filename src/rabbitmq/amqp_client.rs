// src/rabbitmq/amqp_client.rs
//
// The protocol surface the samplers speak. Production code goes through the
// lapin implementations in `lapin_client`; tests swap in an in-memory broker.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::errors::Result;

/// One broker address from the configured host list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything needed to open a connection, resolved once from the config.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Failover order is list order.
    pub endpoints: Vec<Endpoint>,
    pub virtual_host: String,
    pub username: String,
    pub password: String,
    pub tls: Option<TlsSettings>,
    pub timeout: Duration,
    pub heartbeat_secs: u16,
}

#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// PEM bundle to trust in addition to the platform roots.
    pub ca_certificate: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub redeclare: bool,
    /// `x-message-ttl`, `x-expires`, `x-max-priority`, only those explicitly set.
    pub arguments: Vec<(&'static str, i32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub redeclare: bool,
}

/// Basic properties attached to every published message of a sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishProperties {
    pub content_type: String,
    pub delivery_mode: u8,
    pub priority: u8,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub kind: Option<String>,
    pub message_id: Option<String>,
    pub headers: BTreeMap<String, String>,
}

/// A message returned by `basic.get`, with its envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fetched {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    /// Seconds since the epoch, as carried on the wire.
    pub timestamp: Option<u64>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Messages still waiting in the queue after this one.
    pub message_count: u32,
}

/// Opens connections to a single endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn BrokerConnection>>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    fn is_open(&self) -> bool;

    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Identifier used in logs.
    fn id(&self) -> String;

    fn is_open(&self) -> bool;

    async fn queue_declare(&self, queue: &QueueSpec) -> Result<()>;

    async fn queue_delete(&self, queue: &str) -> Result<()>;

    async fn exchange_declare(&self, exchange: &ExchangeSpec) -> Result<()>;

    async fn exchange_delete(&self, exchange: &str) -> Result<()>;

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Returns the number of messages removed.
    async fn queue_purge(&self, queue: &str) -> Result<u32>;

    async fn basic_qos(&self, prefetch_count: u16) -> Result<()>;

    async fn tx_select(&self) -> Result<()>;

    async fn tx_commit(&self) -> Result<()>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: &PublishProperties,
    ) -> Result<()>;

    /// Single non-blocking fetch. `Ok(None)` means the queue was empty.
    async fn basic_get(&self, queue: &str, auto_ack: bool) -> Result<Option<Fetched>>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
