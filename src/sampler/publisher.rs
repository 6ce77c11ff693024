use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::result::{ResponseCode, SampleContext, SampleResult};
use super::{closed_result, Sampler, SamplerState};
use crate::config::{SamplerConfig, SamplerKind};
use crate::rabbitmq::{BrokerChannel, Connector, LapinConnector, PublishProperties, Result, Session};

/// Publishes the configured message `iterations` times per sample.
pub struct Publisher {
    label: String,
    config: Arc<SamplerConfig>,
    session: Session,
    state: SamplerState,
}

/// One sample's worth of publishing.
pub struct PublishOperation<'a> {
    pub exchange: &'a str,
    pub routing_key: &'a str,
    pub payload: &'a [u8],
    pub properties: PublishProperties,
    pub iterations: u32,
    pub use_tx: bool,
}

impl<'a> PublishOperation<'a> {
    pub fn from_config(config: &'a SamplerConfig) -> Self {
        Self {
            exchange: config.publish_exchange(),
            routing_key: config.message_routing_key(),
            payload: config.publish.message.as_bytes(),
            properties: config.publish_properties(),
            iterations: config.iterations,
            use_tx: config.use_tx,
        }
    }

    /// Publishes, then commits when transactional. The first failure ends the
    /// operation; nothing is retried.
    pub async fn execute(&self, channel: &dyn BrokerChannel) -> Result<()> {
        for _ in 0..self.iterations {
            channel
                .basic_publish(self.exchange, self.routing_key, self.payload, &self.properties)
                .await?;
        }
        if self.use_tx {
            channel.tx_commit().await?;
        }
        Ok(())
    }
}

impl Publisher {
    pub fn new(config: Arc<SamplerConfig>) -> Self {
        Self::with_connector(config, Arc::new(LapinConnector))
    }

    pub fn with_connector(config: Arc<SamplerConfig>, connector: Arc<dyn Connector>) -> Self {
        Self {
            label: config.label(SamplerKind::Publish),
            session: Session::new(&config, SamplerKind::Publish, connector),
            config,
            state: SamplerState::Created,
        }
    }

    async fn shutdown(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = SamplerState::Closing;
        self.session.close().await;
        self.state = SamplerState::Closed;
        true
    }
}

#[async_trait]
impl Sampler for Publisher {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> SamplerState {
        self.state
    }

    async fn thread_started(&mut self) {
        info!(sampler_id = %self.session.id(), label = %self.label, "Publisher thread started");
        if self.state == SamplerState::Created {
            self.state = SamplerState::Idle;
        }
    }

    async fn sample(&mut self, context: &SampleContext) -> SampleResult {
        if self.state.is_terminal() {
            warn!(sampler_id = %self.session.id(), "Sample requested on a closed publisher");
            return closed_result(&self.label, context);
        }
        self.state = SamplerState::Active;

        let mut result = SampleResult::new(&self.label, context);
        let channel = match self.session.ensure_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                error!(thread = context.thread, error = %e, "Failed to initialize channel");
                result.set_failure(ResponseCode::Generic, e.to_string());
                self.state = SamplerState::Idle;
                return result;
            }
        };

        let operation = PublishOperation::from_config(&self.config);
        result.sample_start();
        let outcome = operation.execute(channel).await;
        result.sample_end();

        match outcome {
            Ok(()) => {
                debug!(thread = context.thread, iterations = operation.iterations, "Published");
                result.sampler_data = self.config.publish.message.clone();
                result.response_data = String::from_utf8_lossy(operation.payload).into_owned();
                result.set_ok();
            }
            Err(e) => {
                debug!(thread = context.thread, error = %e, "Publish failed");
                result.set_failure(ResponseCode::PublishFailure, e.to_string());
            }
        }

        self.state = SamplerState::Idle;
        result
    }

    async fn thread_finished(&mut self) {
        info!(sampler_id = %self.session.id(), "Publisher thread finished");
        self.shutdown().await;
    }

    async fn interrupt(&mut self) -> bool {
        info!(sampler_id = %self.session.id(), "Publisher interrupted");
        self.shutdown().await
    }
}
