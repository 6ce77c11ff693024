use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::result::{ResponseCode, SampleContext, SampleResult};
use super::{closed_result, Sampler, SamplerState};
use crate::config::{SamplerConfig, SamplerKind};
use crate::rabbitmq::{AmqpError, Connector, Fetched, LapinConnector, Result, Session};

/// Recorded in place of the body when `readResponse` is off.
pub const READ_RESPONSE_SKIPPED: &str = "Read response is false.";

const TIMESTAMP: &str = "Timestamp";
const EXCHANGE: &str = "Exchange";
const ROUTING_KEY: &str = "Routing Key";
const DELIVERY_TAG: &str = "Delivery Tag";

/// Fetches at most one message per sample with `basic.get`.
pub struct Consumer {
    label: String,
    config: Arc<SamplerConfig>,
    session: Session,
    state: SamplerState,
}

/// Renders the envelope as `Key: value` lines. The four envelope keys always
/// come first, custom headers after them in the order they were received.
pub fn format_headers(fetched: &Fetched) -> String {
    let mut block = String::new();
    let timestamp = fetched
        .timestamp
        .map(|secs| secs.saturating_mul(1000).to_string())
        .unwrap_or_default();
    let _ = writeln!(block, "{}: {}", TIMESTAMP, timestamp);
    let _ = writeln!(block, "{}: {}", EXCHANGE, fetched.exchange);
    let _ = writeln!(block, "{}: {}", ROUTING_KEY, fetched.routing_key);
    let _ = writeln!(block, "{}: {}", DELIVERY_TAG, fetched.delivery_tag);
    for (key, value) in &fetched.headers {
        let _ = writeln!(block, "{}: {}", key, value);
    }
    block
}

impl Consumer {
    pub fn new(config: Arc<SamplerConfig>) -> Self {
        Self::with_connector(config, Arc::new(LapinConnector))
    }

    pub fn with_connector(config: Arc<SamplerConfig>, connector: Arc<dyn Connector>) -> Self {
        Self {
            label: config.label(SamplerKind::Consume),
            session: Session::new(&config, SamplerKind::Consume, connector),
            config,
            state: SamplerState::Created,
        }
    }

    fn queue(&self) -> &str {
        self.config.queue_name().unwrap_or_default()
    }

    /// Fetch, acknowledge and commit. `Ok(None)` means the queue was empty.
    async fn consume(&mut self, result: &mut SampleResult) -> Result<Option<u64>> {
        let config = self.config.clone();
        let queue = config.queue_name().unwrap_or_default();
        let channel = self.session.ensure_channel().await?;

        let Some(fetched) = channel.basic_get(queue, config.auto_ack).await? else {
            return Ok(None);
        };

        if !config.auto_ack {
            channel.basic_ack(fetched.delivery_tag).await?;
        }
        if config.use_tx {
            channel.tx_commit().await?;
        }

        // Only a fully acknowledged message is reported.
        if config.read_response {
            result.sampler_data = fetched.message_count.to_string();
            result.response_data = String::from_utf8_lossy(&fetched.body).into_owned();
        } else {
            result.sampler_data = READ_RESPONSE_SKIPPED.to_string();
            result.response_data = READ_RESPONSE_SKIPPED.to_string();
        }
        result.response_headers = format_headers(&fetched);
        Ok(Some(fetched.delivery_tag))
    }

    async fn purge_if_configured(&self) {
        if self.config.purge_queue_on_end {
            self.session.purge_quietly(self.queue()).await;
        }
    }

    async fn shutdown(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = SamplerState::Closing;
        self.purge_if_configured().await;
        self.session.close().await;
        self.state = SamplerState::Closed;
        true
    }

    fn escalate(&self, error: &AmqpError, result: &mut SampleResult) {
        warn!(
            sampler_id = %self.session.id(),
            queue = %self.queue(),
            error = %error,
            "Consumer connection is gone, interrupting thread"
        );
        result.interrupt_requested = true;
    }
}

#[async_trait]
impl Sampler for Consumer {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> SamplerState {
        self.state
    }

    async fn thread_started(&mut self) {
        info!(
            sampler_id = %self.session.id(),
            label = %self.label,
            queue = %self.queue(),
            "Consumer thread started"
        );
        if self.state == SamplerState::Created {
            self.state = SamplerState::Idle;
        }
    }

    async fn sample(&mut self, context: &SampleContext) -> SampleResult {
        if self.state.is_terminal() {
            warn!(sampler_id = %self.session.id(), "Sample requested on a closed consumer");
            return closed_result(&self.label, context);
        }
        self.state = SamplerState::Active;

        let mut result = SampleResult::new(&self.label, context);
        result.sample_start();
        let outcome = self.consume(&mut result).await;
        result.sample_end();
        self.state = SamplerState::Idle;

        match outcome {
            Ok(Some(delivery_tag)) => {
                debug!(thread = context.thread, delivery_tag, "Consumed message");
                result.set_ok();
            }
            Ok(None) => {
                debug!(thread = context.thread, queue = %self.queue(), "Queue is empty");
                result.success = true;
                result.response_code = ResponseCode::NoMessage;
                result.response_message = "No message available".to_string();
            }
            Err(e) => {
                let code = ResponseCode::for_consume_error(&e);
                warn!(thread = context.thread, code = %code, error = %e, "AMQP consumer failed");
                result.set_failure(code, e.to_string());
                if e.escalates() {
                    self.escalate(&e, &mut result);
                    self.interrupt().await;
                }
            }
        }
        result
    }

    async fn thread_finished(&mut self) {
        info!(sampler_id = %self.session.id(), "Consumer thread finished");
        self.shutdown().await;
    }

    async fn interrupt(&mut self) -> bool {
        info!(sampler_id = %self.session.id(), "Consumer interrupted");
        self.shutdown().await
    }
}
