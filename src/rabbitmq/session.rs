use std::sync::Arc;

use tracing::{debug, error, info};

use super::amqp_client::{BrokerChannel, Connector};
use super::channel_manager::ChannelManager;
use super::connection::ConnectionManager;
use super::errors::Result;
use crate::config::{SamplerConfig, SamplerKind};

/// The connection and channel owned by one sampler instance.
pub struct Session {
    connections: ConnectionManager,
    channels: ChannelManager,
}

impl Session {
    pub fn new(config: &SamplerConfig, kind: SamplerKind, connector: Arc<dyn Connector>) -> Self {
        Self {
            connections: ConnectionManager::new(config.connection_settings(), connector),
            channels: ChannelManager::new(config.topology(), config.channel_setup(kind)),
        }
    }

    pub fn id(&self) -> &str {
        self.channels.id()
    }

    /// Open channel with the topology in place, connecting first if needed.
    pub async fn ensure_channel(&mut self) -> Result<&dyn BrokerChannel> {
        self.channels.ensure_channel(&mut self.connections).await
    }

    /// Purges `queue` on whatever channel is current. The channel may be
    /// mid-operation or already dead, so failures are only logged.
    pub async fn purge_quietly(&self, queue: &str) {
        let Some(channel) = self.channels.current() else {
            debug!(sampler_id = %self.id(), queue, "No channel to purge with");
            return;
        };
        info!(sampler_id = %self.id(), queue, "Purging queue");
        match channel.queue_purge(queue).await {
            Ok(purged) => debug!(sampler_id = %self.id(), queue, purged, "Queue purged"),
            Err(e) => error!(sampler_id = %self.id(), queue, error = %e, "Failed to purge queue"),
        }
    }

    /// Closes channel then connection. Never fails.
    pub async fn close(&mut self) {
        self.channels.close().await;
        self.connections.close().await;
    }
}
