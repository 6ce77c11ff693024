use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::amqp_client::{BrokerConnection, ConnectionSettings, Connector};
use super::errors::{AmqpError, Result};

/// Owns the single broker connection of one sampler instance.
pub struct ConnectionManager {
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    connection: Option<Box<dyn BrokerConnection>>,
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings, connector: Arc<dyn Connector>) -> Self {
        ConnectionManager {
            settings,
            connector,
            connection: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.connection.as_ref().map_or(false, |conn| conn.is_open())
    }

    /// Returns the open connection, connecting first if there is none.
    pub async fn ensure_connection(&mut self) -> Result<&dyn BrokerConnection> {
        if !self.is_open() {
            if self.connection.take().is_some() {
                debug!("Dropping closed connection");
            }
            let connection = self.establish_connection().await?;
            self.connection = Some(connection);
        }

        self.connection
            .as_deref()
            .ok_or_else(|| AmqpError::Connection("No active connection".to_string()))
    }

    // One attempt per address, in list order. The first to accept wins.
    async fn establish_connection(&self) -> Result<Box<dyn BrokerConnection>> {
        let mut last_error = None;

        for endpoint in &self.settings.endpoints {
            debug!(%endpoint, "Attempting to connect");

            match timeout(
                self.settings.timeout,
                self.connector.connect(endpoint, &self.settings),
            )
            .await
            {
                Ok(Ok(connection)) => {
                    info!(%endpoint, "Connected to broker");
                    return Ok(connection);
                }
                Ok(Err(AmqpError::Tls(reason))) => {
                    error!(%endpoint, %reason, "TLS setup failed");
                    return Err(AmqpError::Tls(reason));
                }
                Ok(Err(err)) => {
                    warn!(%endpoint, error = %err, "Failed to connect");
                    last_error = Some(err);
                }
                Err(_) => {
                    warn!(
                        %endpoint,
                        timeout_ms = self.settings.timeout.as_millis() as u64,
                        "Connection attempt timed out"
                    );
                    last_error = Some(AmqpError::Connection(format!(
                        "Connection to {} timed out after {}ms",
                        endpoint,
                        self.settings.timeout.as_millis()
                    )));
                }
            }
        }

        Err(match last_error {
            Some(AmqpError::Connection(reason)) => AmqpError::Connection(reason),
            Some(other) => AmqpError::Connection(other.to_string()),
            None => AmqpError::Connection("No broker addresses configured".to_string()),
        })
    }

    /// Closes the connection if there is one. Failures are logged, never returned.
    pub async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            if !connection.is_open() {
                debug!("Connection already closed");
                return;
            }
            info!("Closing broker connection");
            if let Err(e) = connection.close().await {
                error!(error = %e, "Failed to close connection");
            }
        }
    }
}
