//! In-memory broker used by the unit tests. Records every protocol call in
//! order and can be told to fail specific operations once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::amqp_client::{
    BrokerChannel, BrokerConnection, ConnectionSettings, Connector, Endpoint, ExchangeSpec,
    Fetched, PublishProperties, QueueSpec,
};
use super::errors::{AmqpError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Connect(String),
    CloseConnection,
    OpenChannel(u32),
    CloseChannel(u32),
    QueueDeclare(String),
    QueueDelete(String),
    ExchangeDeclare(String),
    ExchangeDelete(String),
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    QueuePurge(String),
    Qos(u16),
    TxSelect,
    TxCommit,
    Publish {
        exchange: String,
        routing_key: String,
        body: Vec<u8>,
        properties: PublishProperties,
    },
    Get {
        queue: String,
        auto_ack: bool,
    },
    Ack(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    QueueDeclare,
    QueueDelete,
    ExchangeDeclare,
    ExchangeDelete,
    QueueBind,
    QueuePurge,
    Publish,
    Get,
    Ack,
    TxCommit,
    CloseConnection,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    messages: VecDeque<Fetched>,
    unreachable: HashSet<String>,
    hanging: HashSet<String>,
    tls_failure: bool,
    failures: HashMap<Op, VecDeque<AmqpError>>,
    next_channel: u32,
    next_tag: u64,
    connections: Vec<Arc<AtomicBool>>,
    channels: Vec<Arc<AtomicBool>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeBroker {
    state: Arc<Mutex<State>>,
}

impl FakeBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector {
            broker: self.clone(),
        })
    }

    pub(crate) fn settings(&self, hosts: &[&str]) -> ConnectionSettings {
        ConnectionSettings {
            endpoints: hosts
                .iter()
                .map(|host| Endpoint {
                    host: host.to_string(),
                    port: 5672,
                })
                .collect(),
            virtual_host: "/".into(),
            username: "guest".into(),
            password: "guest".into(),
            tls: None,
            timeout: Duration::from_millis(1000),
            heartbeat_secs: 1,
        }
    }

    pub(crate) fn mark_unreachable(&self, host: &str) {
        self.state.lock().unwrap().unreachable.insert(host.to_string());
    }

    /// Connection attempts to `host` never complete.
    pub(crate) fn mark_hanging(&self, host: &str) {
        self.state.lock().unwrap().hanging.insert(host.to_string());
    }

    pub(crate) fn fail_tls(&self) {
        self.state.lock().unwrap().tls_failure = true;
    }

    /// The next `op` fails with `error`. Channel-protocol errors also close
    /// the channel, as the broker would.
    pub(crate) fn fail_next(&self, op: Op, error: AmqpError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Enqueues a message and returns its delivery tag.
    pub(crate) fn push_message(&self, body: &str) -> u64 {
        self.push_fetched(Fetched {
            exchange: "bench".into(),
            routing_key: "orders.new".into(),
            body: body.as_bytes().to_vec(),
            ..Fetched::default()
        })
    }

    pub(crate) fn push_fetched(&self, mut fetched: Fetched) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.next_tag += 1;
        fetched.delivery_tag = state.next_tag;
        state.messages.push_back(fetched);
        state.next_tag
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    /// Closes every channel from the broker side.
    pub(crate) fn close_channels(&self) {
        for channel in &self.state.lock().unwrap().channels {
            channel.store(false, Ordering::SeqCst);
        }
    }

    /// Drops every connection (and with it every channel) from the broker side.
    pub(crate) fn drop_connections(&self) {
        let state = self.state.lock().unwrap();
        for flag in state.connections.iter().chain(state.channels.iter()) {
            flag.store(false, Ordering::SeqCst);
        }
    }

    fn record(&self, call: Call, op: Option<Op>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match op.and_then(|op| state.failures.get_mut(&op).and_then(|q| q.pop_front())) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

struct FakeConnector {
    broker: FakeBroker,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        _settings: &ConnectionSettings,
    ) -> Result<Box<dyn BrokerConnection>> {
        self.broker.record(Call::Connect(endpoint.to_string()), None)?;

        let hangs = self.broker.state.lock().unwrap().hanging.contains(&endpoint.host);
        if hangs {
            std::future::pending::<()>().await;
        }

        let mut state = self.broker.state.lock().unwrap();
        if state.tls_failure {
            return Err(AmqpError::Tls("unable to load CA bundle".into()));
        }
        if state.unreachable.contains(&endpoint.host) {
            return Err(AmqpError::Connection(format!("{} refused connection", endpoint)));
        }

        let open = Arc::new(AtomicBool::new(true));
        state.connections.push(open.clone());
        Ok(Box::new(FakeConnection {
            broker: self.broker.clone(),
            open,
        }))
    }
}

struct FakeConnection {
    broker: FakeBroker,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        if !self.is_open() {
            return Err(AmqpError::Shutdown("connection closed".into()));
        }
        let mut state = self.broker.state.lock().unwrap();
        state.next_channel += 1;
        let id = state.next_channel;
        state.calls.push(Call::OpenChannel(id));
        let open = Arc::new(AtomicBool::new(true));
        state.channels.push(open.clone());

        Ok(Box::new(FakeChannel {
            broker: self.broker.clone(),
            id,
            open,
            connection_open: self.open.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.broker
            .record(Call::CloseConnection, Some(Op::CloseConnection))?;
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeChannel {
    broker: FakeBroker,
    id: u32,
    open: Arc<AtomicBool>,
    connection_open: Arc<AtomicBool>,
}

impl FakeChannel {
    fn call(&self, call: Call, op: Option<Op>) -> Result<()> {
        if !self.is_open() {
            return Err(AmqpError::Cancelled(format!("channel {} is closed", self.id)));
        }
        let outcome = self.broker.record(call, op);
        if let Err(AmqpError::ChannelProtocol(_)) = &outcome {
            self.open.store(false, Ordering::SeqCst);
        }
        outcome
    }
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    fn id(&self) -> String {
        format!("fake-{}", self.id)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.connection_open.load(Ordering::SeqCst)
    }

    async fn queue_declare(&self, queue: &QueueSpec) -> Result<()> {
        self.call(Call::QueueDeclare(queue.name.clone()), Some(Op::QueueDeclare))
    }

    async fn queue_delete(&self, queue: &str) -> Result<()> {
        self.call(Call::QueueDelete(queue.to_string()), Some(Op::QueueDelete))
    }

    async fn exchange_declare(&self, exchange: &ExchangeSpec) -> Result<()> {
        self.call(
            Call::ExchangeDeclare(exchange.name.clone()),
            Some(Op::ExchangeDeclare),
        )
    }

    async fn exchange_delete(&self, exchange: &str) -> Result<()> {
        self.call(Call::ExchangeDelete(exchange.to_string()), Some(Op::ExchangeDelete))
    }

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.call(
            Call::QueueBind {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            },
            Some(Op::QueueBind),
        )
    }

    async fn queue_purge(&self, queue: &str) -> Result<u32> {
        self.call(Call::QueuePurge(queue.to_string()), Some(Op::QueuePurge))?;
        let mut state = self.broker.state.lock().unwrap();
        let purged = state.messages.len() as u32;
        state.messages.clear();
        Ok(purged)
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<()> {
        self.call(Call::Qos(prefetch_count), None)
    }

    async fn tx_select(&self) -> Result<()> {
        self.call(Call::TxSelect, None)
    }

    async fn tx_commit(&self) -> Result<()> {
        self.call(Call::TxCommit, Some(Op::TxCommit))
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: &PublishProperties,
    ) -> Result<()> {
        self.call(
            Call::Publish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                body: payload.to_vec(),
                properties: properties.clone(),
            },
            Some(Op::Publish),
        )
    }

    async fn basic_get(&self, queue: &str, auto_ack: bool) -> Result<Option<Fetched>> {
        self.call(
            Call::Get {
                queue: queue.to_string(),
                auto_ack,
            },
            Some(Op::Get),
        )?;
        let mut state = self.broker.state.lock().unwrap();
        let fetched = state.messages.pop_front();
        let remaining = state.messages.len() as u32;
        Ok(fetched.map(|mut message| {
            message.message_count = remaining;
            message
        }))
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<()> {
        self.call(Call::Ack(delivery_tag), Some(Op::Ack))
    }

    async fn close(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.broker.record(Call::CloseChannel(self.id), None)?;
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}
