// src/sampler/mod.rs
// Host-facing samplers: one instance per virtual user

mod consumer;
mod publisher;
mod result;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{SamplerConfig, SamplerKind};
use crate::rabbitmq::Connector;

pub use consumer::{format_headers, Consumer, READ_RESPONSE_SKIPPED};
pub use publisher::Publisher;
pub use result::{ResponseCode, SampleContext, SampleResult};

/// Lifecycle of a sampler instance.
///
/// `Created → Idle → Active → Idle → … → Closing → Closed`. Once closing
/// starts there is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Created,
    Idle,
    Active,
    Closing,
    Closed,
}

impl SamplerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SamplerState::Closing | SamplerState::Closed)
    }
}

/// The calls a host makes on each sampler it owns. Every method takes
/// `&mut self`: an instance belongs to a single task for its whole life.
#[async_trait]
pub trait Sampler: Send {
    fn label(&self) -> &str;

    fn state(&self) -> SamplerState;

    async fn thread_started(&mut self);

    /// Always returns a result; broker failures never escape as errors.
    async fn sample(&mut self, context: &SampleContext) -> SampleResult;

    async fn thread_finished(&mut self);

    /// Purge (if configured) and close. Returns false if already closed.
    async fn interrupt(&mut self) -> bool;
}

/// Builds a sampler of `kind` talking to RabbitMQ through lapin.
pub fn new_sampler(kind: SamplerKind, config: Arc<SamplerConfig>) -> Box<dyn Sampler> {
    match kind {
        SamplerKind::Publish => Box::new(Publisher::new(config)),
        SamplerKind::Consume => Box::new(Consumer::new(config)),
    }
}

pub fn new_sampler_with(
    kind: SamplerKind,
    config: Arc<SamplerConfig>,
    connector: Arc<dyn Connector>,
) -> Box<dyn Sampler> {
    match kind {
        SamplerKind::Publish => Box::new(Publisher::with_connector(config, connector)),
        SamplerKind::Consume => Box::new(Consumer::with_connector(config, connector)),
    }
}

fn closed_result(label: &str, context: &SampleContext) -> SampleResult {
    let mut result = SampleResult::new(label, context);
    result.set_failure(ResponseCode::Generic, "Sampler is closed");
    result
}
