// src/runner.rs
// Reference host: N virtual users, each looping its own sampler
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{SamplerConfig, SamplerKind};
use crate::rabbitmq::{Connector, LapinConnector};
use crate::sampler::{new_sampler_with, SampleContext, SampleResult, Sampler};

/// How the host drives the samplers.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub kind: SamplerKind,
    pub threads: usize,
    /// Samples per user; `None` loops until the duration elapses or shutdown.
    pub loops: Option<u64>,
    pub duration: Option<Duration>,
}

impl Default for RunPlan {
    fn default() -> Self {
        Self {
            kind: SamplerKind::Publish,
            threads: 1,
            loops: Some(1),
            duration: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub samples: u64,
    pub successes: u64,
    pub failures: u64,
    /// Users whose sampler escalated and shut itself down.
    pub interrupted_users: u64,
}

impl RunSummary {
    fn record(&mut self, result: &SampleResult) {
        self.samples += 1;
        if result.success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if result.interrupt_requested {
            self.interrupted_users += 1;
        }
    }
}

enum Step {
    Sampled(SampleResult),
    Shutdown,
}

/// Runs `plan` against RabbitMQ, printing each result as a JSON line.
pub async fn run(
    config: Arc<SamplerConfig>,
    plan: RunPlan,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let (tx, mut rx) = mpsc::channel::<SampleResult>(1024);

    let printer = tokio::spawn(async move {
        let mut summary = RunSummary::default();
        while let Some(result) = rx.recv().await {
            summary.record(&result);
            match serde_json::to_string(&result) {
                Ok(line) => println!("{}", line),
                Err(e) => error!(error = %e, "Failed to serialize sample result"),
            }
        }
        summary
    });

    run_with(config, plan, Arc::new(LapinConnector), shutdown, tx).await;

    let summary = printer.await.context("Result printer task failed")?;
    info!(
        samples = summary.samples,
        successes = summary.successes,
        failures = summary.failures,
        "Run finished"
    );
    Ok(summary)
}

/// Spawns one task per virtual user, each owning its sampler, and forwards
/// every result to `results`. Returns once all users have finished.
pub async fn run_with(
    config: Arc<SamplerConfig>,
    plan: RunPlan,
    connector: Arc<dyn Connector>,
    shutdown: watch::Receiver<bool>,
    results: mpsc::Sender<SampleResult>,
) {
    let deadline = plan.duration.map(|d| Instant::now() + d);
    info!(
        kind = ?plan.kind,
        threads = plan.threads,
        loops = ?plan.loops,
        "Starting virtual users"
    );

    let handles: Vec<_> = (0..plan.threads.max(1))
        .map(|thread| {
            let sampler = new_sampler_with(plan.kind, config.clone(), connector.clone());
            tokio::spawn(virtual_user(
                thread,
                sampler,
                plan.loops,
                deadline,
                shutdown.clone(),
                results.clone(),
            ))
        })
        .collect();
    drop(results);

    for (thread, outcome) in join_all(handles).await.into_iter().enumerate() {
        if let Err(e) = outcome {
            error!(thread, error = %e, "Virtual user task failed");
        }
    }
}

async fn virtual_user(
    thread: usize,
    mut sampler: Box<dyn Sampler>,
    loops: Option<u64>,
    deadline: Option<Instant>,
    mut shutdown: watch::Receiver<bool>,
    results: mpsc::Sender<SampleResult>,
) {
    sampler.thread_started().await;
    let mut iteration = 0u64;

    loop {
        if loops.map_or(false, |limit| iteration >= limit)
            || deadline.map_or(false, |d| Instant::now() >= d)
            || *shutdown.borrow()
        {
            break;
        }

        let context = SampleContext { thread, iteration };
        let step = tokio::select! {
            result = sampler.sample(&context) => Step::Sampled(result),
            Ok(()) = shutdown.changed() => Step::Shutdown,
        };

        match step {
            Step::Sampled(result) => {
                let escalated = result.interrupt_requested;
                if results.send(result).await.is_err() {
                    debug!(thread, "Result receiver dropped");
                    break;
                }
                if escalated {
                    warn!(thread, iteration, "Sampler escalated, stopping virtual user");
                    break;
                }
            }
            Step::Shutdown => {
                info!(thread, iteration, "Shutdown requested, interrupting sampler");
                sampler.interrupt().await;
                break;
            }
        }
        iteration += 1;
    }

    sampler.thread_finished().await;
    debug!(thread, samples = iteration, label = sampler.label(), "Virtual user finished");
}
