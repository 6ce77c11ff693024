// src/lib.rs
// AMQP 0-9-1 publish/consume samplers for load testing RabbitMQ

pub mod config;
pub mod env;
pub mod rabbitmq;
pub mod runner;
pub mod sampler;

pub use config::{SamplerConfig, SamplerKind};
pub use rabbitmq::AmqpError;
pub use runner::{RunPlan, RunSummary};
pub use sampler::{
    new_sampler, Consumer, Publisher, ResponseCode, SampleContext, SampleResult, Sampler,
    SamplerState,
};
