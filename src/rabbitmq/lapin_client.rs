// src/rabbitmq/lapin_client.rs

use async_trait::async_trait;
use lapin::{
    options::*,
    tcp::OwnedTLSConfig,
    types::{AMQPValue, FieldTable, ShortString},
    uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, info};

use super::amqp_client::{
    BrokerChannel, BrokerConnection, ConnectionSettings, Connector, Endpoint, ExchangeSpec,
    Fetched, PublishProperties, QueueSpec,
};
use super::errors::{AmqpError, Result};

/// Connects to RabbitMQ through lapin.
#[derive(Debug, Default, Clone)]
pub struct LapinConnector;

impl LapinConnector {
    fn uri(endpoint: &Endpoint, settings: &ConnectionSettings) -> AMQPUri {
        AMQPUri {
            scheme: if settings.tls.is_some() {
                AMQPScheme::AMQPS
            } else {
                AMQPScheme::AMQP
            },
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: settings.username.clone(),
                    password: settings.password.clone(),
                },
                host: endpoint.host.clone(),
                port: endpoint.port,
            },
            vhost: settings.virtual_host.clone(),
            query: AMQPQueryString {
                heartbeat: Some(settings.heartbeat_secs),
                connection_timeout: Some(settings.timeout.as_millis() as u64),
                ..AMQPQueryString::default()
            },
        }
    }

    fn tls_config(settings: &ConnectionSettings) -> Result<OwnedTLSConfig> {
        let mut config = OwnedTLSConfig::default();
        if let Some(path) = settings
            .tls
            .as_ref()
            .and_then(|tls| tls.ca_certificate.as_ref())
        {
            let pem = std::fs::read_to_string(path).map_err(|e| {
                AmqpError::Tls(format!("Failed to read CA bundle {}: {}", path.display(), e))
            })?;
            config.cert_chain = Some(pem);
        }
        Ok(config)
    }
}

#[async_trait]
impl Connector for LapinConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn BrokerConnection>> {
        let uri = Self::uri(endpoint, settings);
        let properties = ConnectionProperties::default();

        info!(
            %endpoint,
            vhost = %settings.virtual_host,
            tls = settings.tls.is_some(),
            "Connecting to RabbitMQ"
        );

        let connecting = async {
            if settings.tls.is_some() {
                let tls = Self::tls_config(settings)?;
                Connection::connect_uri_with_config(uri, properties, tls)
                    .await
                    .map_err(connection_error)
            } else {
                Connection::connect_uri(uri, properties)
                    .await
                    .map_err(connection_error)
            }
        };
        let connection = tokio::time::timeout(settings.timeout, connecting).await??;

        debug!(%endpoint, "Successfully connected to RabbitMQ");
        Ok(Box::new(LapinConnection { connection }))
    }
}

// Failures while connecting are connection faults, whatever lapin calls them.
fn connection_error(error: lapin::Error) -> AmqpError {
    AmqpError::Connection(error.to_string())
}

pub struct LapinConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    fn is_open(&self) -> bool {
        self.connection.status().connected()
    }

    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        let channel = self.connection.create_channel().await?;
        Ok(Box::new(LapinChannel { channel }))
    }

    async fn close(&self) -> Result<()> {
        if self.is_open() {
            self.connection.close(200, "Closing sampler connection").await?;
        }
        Ok(())
    }
}

pub struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    fn id(&self) -> String {
        format!("channel-{}", self.channel.id())
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn queue_declare(&self, queue: &QueueSpec) -> Result<()> {
        let mut arguments = FieldTable::default();
        for (key, value) in &queue.arguments {
            arguments.insert(ShortString::from(*key), AMQPValue::LongInt(*value));
        }

        self.channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    exclusive: queue.exclusive,
                    auto_delete: queue.auto_delete,
                    ..QueueDeclareOptions::default()
                },
                arguments,
            )
            .await?;
        Ok(())
    }

    async fn queue_delete(&self, queue: &str) -> Result<()> {
        self.channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await?;
        Ok(())
    }

    async fn exchange_declare(&self, exchange: &ExchangeSpec) -> Result<()> {
        self.channel
            .exchange_declare(
                &exchange.name,
                exchange_kind(&exchange.kind),
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    auto_delete: exchange.auto_delete,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn exchange_delete(&self, exchange: &str) -> Result<()> {
        self.channel
            .exchange_delete(exchange, ExchangeDeleteOptions::default())
            .await?;
        Ok(())
    }

    async fn queue_bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn queue_purge(&self, queue: &str) -> Result<u32> {
        let purged = self
            .channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await?;
        Ok(purged)
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<()> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    async fn tx_select(&self) -> Result<()> {
        self.channel.tx_select().await?;
        Ok(())
    }

    async fn tx_commit(&self) -> Result<()> {
        self.channel.tx_commit().await?;
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: &PublishProperties,
    ) -> Result<()> {
        // No confirm mode: the returned confirm resolves to NotRequested.
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                basic_properties(properties),
            )
            .await?;
        Ok(())
    }

    async fn basic_get(&self, queue: &str, auto_ack: bool) -> Result<Option<Fetched>> {
        let message = self
            .channel
            .basic_get(queue, BasicGetOptions { no_ack: auto_ack })
            .await?;

        Ok(message.map(|message| {
            let delivery = &message.delivery;
            let headers = delivery
                .properties
                .headers()
                .as_ref()
                .map(|table| {
                    table
                        .inner()
                        .iter()
                        .map(|(key, value)| (key.as_str().to_string(), render_value(value)))
                        .collect()
                })
                .unwrap_or_default();

            Fetched {
                delivery_tag: delivery.delivery_tag,
                exchange: delivery.exchange.as_str().to_string(),
                routing_key: delivery.routing_key.as_str().to_string(),
                timestamp: *delivery.properties.timestamp(),
                headers,
                body: delivery.data.clone(),
                message_count: message.message_count,
            }
        }))
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.is_open() {
            self.channel.close(200, "Closing sampler channel").await?;
        }
        Ok(())
    }
}

fn exchange_kind(kind: &str) -> ExchangeKind {
    match kind.to_ascii_lowercase().as_str() {
        "direct" | "" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "headers" => ExchangeKind::Headers,
        "topic" => ExchangeKind::Topic,
        _ => ExchangeKind::Custom(kind.to_string()),
    }
}

fn basic_properties(properties: &PublishProperties) -> BasicProperties {
    let mut basic = BasicProperties::default()
        .with_content_type(properties.content_type.clone().into())
        .with_delivery_mode(properties.delivery_mode)
        .with_priority(properties.priority);

    if let Some(correlation_id) = &properties.correlation_id {
        basic = basic.with_correlation_id(correlation_id.clone().into());
    }
    if let Some(reply_to) = &properties.reply_to {
        basic = basic.with_reply_to(reply_to.clone().into());
    }
    if let Some(kind) = &properties.kind {
        basic = basic.with_type(kind.clone().into());
    }
    if let Some(message_id) = &properties.message_id {
        basic = basic.with_message_id(message_id.clone().into());
    }

    let mut headers = FieldTable::default();
    for (key, value) in &properties.headers {
        headers.insert(
            ShortString::from(key.clone()),
            AMQPValue::LongString(value.clone().into()),
        );
    }
    basic.with_headers(headers)
}

fn render_value(value: &AMQPValue) -> String {
    match value {
        AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        AMQPValue::ShortString(s) => s.as_str().to_string(),
        AMQPValue::Boolean(b) => b.to_string(),
        AMQPValue::ShortShortInt(v) => v.to_string(),
        AMQPValue::ShortShortUInt(v) => v.to_string(),
        AMQPValue::ShortInt(v) => v.to_string(),
        AMQPValue::ShortUInt(v) => v.to_string(),
        AMQPValue::LongInt(v) => v.to_string(),
        AMQPValue::LongUInt(v) => v.to_string(),
        AMQPValue::LongLongInt(v) => v.to_string(),
        AMQPValue::Timestamp(v) => v.to_string(),
        other => format!("{:?}", other),
    }
}
