use tracing::{debug, info, warn};
use uuid::Uuid;

use super::amqp_client::{BrokerChannel, BrokerConnection, ExchangeSpec, QueueSpec};
use super::connection::ConnectionManager;
use super::errors::{AmqpError, Result};

/// Broker entities a sampler needs before it can publish or fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub queue: Option<QueueSpec>,
    pub exchange: Option<ExchangeSpec>,
    /// Binding key between the queue and the exchange.
    pub routing_key: String,
}

/// Per-operation channel configuration applied after the topology is declared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSetup {
    /// `basic.qos` prefetch, 0 means unlimited. `None` skips the call.
    pub prefetch_count: Option<u16>,
    /// Put the channel in transactional mode.
    pub use_tx: bool,
}

/// Keeps one provisioned channel alive for a sampler, reopening and
/// redeclaring whenever it is found closed.
pub struct ChannelManager {
    id: String,
    topology: Topology,
    setup: ChannelSetup,
    channel: Option<Box<dyn BrokerChannel>>,
}

enum Entity<'a> {
    Queue(&'a str),
    Exchange(&'a str),
}

impl ChannelManager {
    pub fn new(topology: Topology, setup: ChannelSetup) -> Self {
        let id = format!("sampler-{}", &Uuid::new_v4().to_string()[..8]);
        debug!(
            sampler_id = %id,
            queue = ?topology.queue.as_ref().map(|q| &q.name),
            exchange = ?topology.exchange.as_ref().map(|e| &e.name),
            prefetch = ?setup.prefetch_count,
            use_tx = setup.use_tx,
            "Creating channel manager"
        );

        Self {
            id,
            topology,
            setup,
            channel: None,
        }
    }

    /// Return the channel ID for logging
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current channel, open or not.
    pub fn current(&self) -> Option<&dyn BrokerChannel> {
        self.channel.as_deref()
    }

    pub fn is_healthy(&self) -> bool {
        self.channel.as_ref().map_or(false, |channel| channel.is_open())
    }

    /// Returns the open channel unchanged, or opens and provisions a new one.
    pub async fn ensure_channel(
        &mut self,
        connections: &mut ConnectionManager,
    ) -> Result<&dyn BrokerChannel> {
        if !self.is_healthy() {
            if let Some(stale) = self.channel.take() {
                warn!(sampler_id = %self.id, channel = %stale.id(), "Channel closed, reopening");
            }
            let connection = connections.ensure_connection().await?;
            let channel = self.provision(connection).await?;
            self.channel = Some(channel);
        }

        self.channel
            .as_deref()
            .ok_or_else(|| AmqpError::ChannelProtocol("Channel is not available".to_string()))
    }

    async fn provision(&self, connection: &dyn BrokerConnection) -> Result<Box<dyn BrokerChannel>> {
        // Deletes run on their own channel, closed before the primary one opens.
        self.delete_for_redeclare(connection).await;

        let channel = connection.open_channel().await?;
        debug!(sampler_id = %self.id, channel = %channel.id(), "Opened channel");

        if let Err(e) = self.configure(channel.as_ref()).await {
            if let Err(close_err) = channel.close().await {
                debug!(
                    sampler_id = %self.id,
                    error = %close_err,
                    "Ignoring close failure on rejected channel"
                );
            }
            return Err(e);
        }

        info!(
            sampler_id = %self.id,
            channel = %channel.id(),
            "Channel created and configured successfully"
        );
        Ok(channel)
    }

    async fn delete_for_redeclare(&self, connection: &dyn BrokerConnection) {
        if let Some(queue) = self.topology.queue.as_ref().filter(|q| q.redeclare) {
            self.delete_quietly(connection, Entity::Queue(&queue.name)).await;
        }
        if let Some(exchange) = self.topology.exchange.as_ref().filter(|e| e.redeclare) {
            self.delete_quietly(connection, Entity::Exchange(&exchange.name))
                .await;
        }
    }

    async fn configure(&self, channel: &dyn BrokerChannel) -> Result<()> {
        if let Some(queue) = &self.topology.queue {
            debug!(sampler_id = %self.id, queue = %queue.name, "Declaring queue");
            channel.queue_declare(queue).await?;
        }

        if let Some(exchange) = &self.topology.exchange {
            debug!(
                sampler_id = %self.id,
                exchange = %exchange.name,
                kind = %exchange.kind,
                "Declaring exchange"
            );
            channel.exchange_declare(exchange).await?;

            if let Some(queue) = &self.topology.queue {
                debug!(
                    sampler_id = %self.id,
                    queue = %queue.name,
                    exchange = %exchange.name,
                    routing_key = %self.topology.routing_key,
                    "Binding queue"
                );
                channel
                    .queue_bind(&queue.name, &exchange.name, &self.topology.routing_key)
                    .await?;
            }
        }

        if let Some(prefetch_count) = self.setup.prefetch_count {
            channel.basic_qos(prefetch_count).await?;
        }
        if self.setup.use_tx {
            channel.tx_select().await?;
        }

        Ok(())
    }

    // A failed delete closes the channel it ran on, so use a throwaway one.
    async fn delete_quietly(&self, connection: &dyn BrokerConnection, entity: Entity<'_>) {
        let scratch = match connection.open_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                debug!(sampler_id = %self.id, error = %e, "Could not open channel for delete");
                return;
            }
        };

        let outcome = match entity {
            Entity::Queue(name) => {
                info!(sampler_id = %self.id, queue = %name, "Deleting queue");
                scratch.queue_delete(name).await
            }
            Entity::Exchange(name) => {
                info!(sampler_id = %self.id, exchange = %name, "Deleting exchange");
                scratch.exchange_delete(name).await
            }
        };
        if let Err(e) = outcome {
            debug!(sampler_id = %self.id, error = %e, "Ignoring delete failure");
        }

        if scratch.is_open() {
            if let Err(e) = scratch.close().await {
                debug!(
                    sampler_id = %self.id,
                    error = %e,
                    "Ignoring close failure on delete channel"
                );
            }
        }
    }

    /// Closes the channel if it is still open. Failures are logged only.
    pub async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            if channel.is_open() {
                if let Err(e) = channel.close().await {
                    debug!(sampler_id = %self.id, error = %e, "Failed to close channel");
                }
            }
        }
    }
}
