// src/rabbitmq/mod.rs
// Broker-facing layer: connection and channel lifecycle, topology, lapin bindings

pub mod amqp_client;
pub mod channel_manager;
pub mod connection;
pub mod errors;
pub mod lapin_client;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// Re-export specific items to simplify imports elsewhere
pub use amqp_client::{
    BrokerChannel, BrokerConnection, ConnectionSettings, Connector, Endpoint, ExchangeSpec,
    Fetched, PublishProperties, QueueSpec, TlsSettings,
};
pub use channel_manager::{ChannelManager, ChannelSetup, Topology};
pub use connection::ConnectionManager;
pub use errors::{AmqpError, Result};
pub use lapin_client::LapinConnector;
pub use session::Session;
