// src/config.rs
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::rabbitmq::{
    ChannelSetup, ConnectionSettings, Endpoint, ExchangeSpec, PublishProperties, QueueSpec,
    TlsSettings, Topology,
};

pub const DEFAULT_PORT: u16 = 5672;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_ITERATIONS: u32 = 1;
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";
/// Heartbeat interval; detects silently dead peers.
pub const HEARTBEAT_SECS: u16 = 1;

const CONFIG_FILE_NAME: &str = "amqp-sampler.json";

/// Which operation a sampler performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    Publish,
    Consume,
}

/// Settings for one sampler. Populated once, then shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplerConfig {
    /// Sample label; defaults per operation.
    pub label: Option<String>,
    /// Comma-separated broker list, tried in order. Entries may carry a port.
    pub host: String,
    pub port: u16,
    pub virtual_host: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "useSSL")]
    pub use_ssl: bool,
    pub tls_ca_certificate: Option<PathBuf>,
    /// Milliseconds; 0 falls back to the default.
    pub connection_timeout: u64,
    pub iterations: u32,
    pub exchange: ExchangeConfig,
    pub queue: QueueConfig,
    pub routing_key: String,
    pub prefetch_count: u16,
    pub use_tx: bool,
    pub auto_ack: bool,
    pub read_response: bool,
    pub purge_queue_on_end: bool,
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub redeclare: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub redeclare: bool,
    #[serde(rename = "messageTTL")]
    pub message_ttl: Option<i64>,
    pub message_expires: Option<i64>,
    pub max_priority: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublishConfig {
    pub message: String,
    /// Routing key for published messages; the binding key when unset.
    pub routing_key: Option<String>,
    pub message_type: Option<String>,
    pub reply_to_queue: Option<String>,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub message_id: Option<String>,
    pub persistent: bool,
    pub headers: BTreeMap<String, String>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            label: None,
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            virtual_host: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            use_ssl: false,
            tls_ca_certificate: None,
            connection_timeout: DEFAULT_TIMEOUT_MS,
            iterations: DEFAULT_ITERATIONS,
            exchange: ExchangeConfig::default(),
            queue: QueueConfig::default(),
            routing_key: String::new(),
            prefetch_count: 0,
            use_tx: false,
            auto_ack: false,
            read_response: true,
            purge_queue_on_end: false,
            publish: PublishConfig::default(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: "direct".to_string(),
            durable: true,
            auto_delete: true,
            redeclare: false,
        }
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn non_blank_owned(value: &Option<String>) -> Option<String> {
    value.as_deref().and_then(non_blank).map(str::to_string)
}

fn positive(value: Option<i64>) -> Option<i32> {
    value
        .filter(|v| *v > 0)
        .map(|v| v.min(i32::MAX as i64) as i32)
}

impl SamplerConfig {
    pub fn port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_PORT
        } else {
            self.port
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        if self.connection_timeout == 0 {
            Duration::from_millis(DEFAULT_TIMEOUT_MS)
        } else {
            Duration::from_millis(self.connection_timeout)
        }
    }

    pub fn queue_name(&self) -> Option<&str> {
        non_blank(&self.queue.name)
    }

    pub fn exchange_name(&self) -> Option<&str> {
        non_blank(&self.exchange.name)
    }

    /// Exchange used for publishing; the default exchange when none is set.
    pub fn publish_exchange(&self) -> &str {
        self.exchange_name().unwrap_or("")
    }

    pub fn message_routing_key(&self) -> &str {
        self.publish
            .routing_key
            .as_deref()
            .and_then(non_blank)
            .unwrap_or(self.routing_key.as_str())
    }

    /// Resolves the host list into addresses, in failover order.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.host
            .split(',')
            .filter_map(non_blank)
            .map(|entry| match entry.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() => match port.parse::<u16>() {
                    Ok(port) if port > 0 => Endpoint {
                        host: host.to_string(),
                        port,
                    },
                    _ => Endpoint {
                        host: entry.to_string(),
                        port: self.port(),
                    },
                },
                _ => Endpoint {
                    host: entry.to_string(),
                    port: self.port(),
                },
            })
            .collect()
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            endpoints: self.endpoints(),
            virtual_host: self.virtual_host.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            tls: self.use_ssl.then(|| TlsSettings {
                ca_certificate: self.tls_ca_certificate.clone(),
            }),
            timeout: self.connection_timeout(),
            heartbeat_secs: HEARTBEAT_SECS,
        }
    }

    pub fn queue_arguments(&self) -> Vec<(&'static str, i32)> {
        [
            ("x-message-ttl", positive(self.queue.message_ttl)),
            ("x-expires", positive(self.queue.message_expires)),
            ("x-max-priority", positive(self.queue.max_priority)),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect()
    }

    pub fn topology(&self) -> Topology {
        Topology {
            queue: self.queue_name().map(|name| QueueSpec {
                name: name.to_string(),
                durable: self.queue.durable,
                exclusive: self.queue.exclusive,
                auto_delete: self.queue.auto_delete,
                redeclare: self.queue.redeclare,
                arguments: self.queue_arguments(),
            }),
            exchange: self.exchange_name().map(|name| ExchangeSpec {
                name: name.to_string(),
                kind: non_blank(&self.exchange.kind)
                    .unwrap_or("direct")
                    .to_string(),
                durable: self.exchange.durable,
                auto_delete: self.exchange.auto_delete,
                redeclare: self.exchange.redeclare,
            }),
            routing_key: self.routing_key.clone(),
        }
    }

    pub fn channel_setup(&self, kind: SamplerKind) -> ChannelSetup {
        ChannelSetup {
            prefetch_count: match kind {
                SamplerKind::Consume => Some(self.prefetch_count),
                SamplerKind::Publish => None,
            },
            use_tx: self.use_tx,
        }
    }

    pub fn publish_properties(&self) -> PublishProperties {
        let publish = &self.publish;
        PublishProperties {
            content_type: non_blank_owned(&publish.content_type)
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            delivery_mode: if publish.persistent { 2 } else { 1 },
            priority: 0,
            correlation_id: non_blank_owned(&publish.correlation_id),
            reply_to: non_blank_owned(&publish.reply_to_queue),
            kind: non_blank_owned(&publish.message_type),
            message_id: non_blank_owned(&publish.message_id),
            headers: publish.headers.clone(),
        }
    }

    pub fn label(&self, kind: SamplerKind) -> String {
        non_blank_owned(&self.label).unwrap_or_else(|| match kind {
            SamplerKind::Publish => "AMQP Publisher".to_string(),
            SamplerKind::Consume => "AMQP Consumer".to_string(),
        })
    }

    pub fn validate(&self, kind: SamplerKind) -> Result<()> {
        if self.endpoints().is_empty() {
            return Err(anyhow!("Configuration error: host cannot be empty"));
        }
        if kind == SamplerKind::Consume && self.queue_name().is_none() {
            return Err(anyhow!(
                "Configuration error: queue.name is required for the consumer"
            ));
        }
        Ok(())
    }
}

pub fn find_config_file() -> Result<PathBuf> {
    let config_dir_file = Path::new("config").join(CONFIG_FILE_NAME);
    let locations = [
        ("Current directory", PathBuf::from(CONFIG_FILE_NAME)),
        ("Current directory (alternative)", config_dir_file),
    ];

    for (location_name, path) in locations.iter() {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Ok(path.to_path_buf());
        }
    }

    if let Some(home_dir) = home::home_dir() {
        let home_config = home_dir.join(format!(".{}", CONFIG_FILE_NAME));
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Ok(home_config);
        }
    }

    Err(anyhow!(
        "Could not find {} in the current directory, ./config or your home directory. \
         Pass --config or create one with --init-config.",
        CONFIG_FILE_NAME
    ))
}

pub fn load_config_from(path: &Path) -> Result<SamplerConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;

    serde_json::from_str(&content).with_context(|| {
        format!(
            "Configuration file {} contains invalid JSON or wrongly typed fields",
            path.display()
        )
    })
}

/// Loads from `path` when given, otherwise from the first discovered file.
pub fn load_config(path: Option<&Path>) -> Result<SamplerConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };
    info!("Loading sampler configuration from {}", path.display());
    load_config_from(&path)
}

pub fn create_default_config_file(path: &Path) -> Result<()> {
    let default_config = SamplerConfig {
        exchange: ExchangeConfig {
            name: "amqp-sampler".to_string(),
            ..ExchangeConfig::default()
        },
        queue: QueueConfig {
            name: "amqp-sampler".to_string(),
            ..QueueConfig::default()
        },
        routing_key: "amqp-sampler".to_string(),
        publish: PublishConfig {
            message: "hello".to_string(),
            ..PublishConfig::default()
        },
        ..SamplerConfig::default()
    };

    let json = serde_json::to_string_pretty(&default_config)
        .context("Failed to serialize default configuration")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory at {}", parent.display()))?;
        }
    }

    fs::write(path, json)
        .with_context(|| format!("Failed to write configuration to {}", path.display()))?;

    info!("Created default configuration file at: {}", path.display());
    Ok(())
}
