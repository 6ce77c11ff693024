// src/rabbitmq/errors.rs

use lapin::protocol::AMQPErrorKind;
use lapin::Error as LapinError;
use thiserror::Error;
use tokio::time::error::Elapsed;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AmqpError {
    /// No address accepted the connection, or the broker refused the login.
    #[error("AMQP connection error: {0}")]
    Connection(String),

    /// The broker rejected a declare, bind, publish or get and closed the channel.
    #[error("AMQP channel error: {0}")]
    ChannelProtocol(String),

    /// The broker (or a missed heartbeat) shut the connection down.
    #[error("AMQP shutdown signal: {0}")]
    Shutdown(String),

    /// The channel was torn down underneath an in-flight call.
    #[error("AMQP consumer cancelled: {0}")]
    Cancelled(String),

    #[error("AMQP I/O error: {0}")]
    Io(String),

    #[error("TLS setup error: {0}")]
    Tls(String),
}

pub type Result<T> = std::result::Result<T, AmqpError>;

impl AmqpError {
    /// Whether this failure means the whole session is dead and the sampler
    /// thread must be interrupted, as opposed to this one call failing.
    pub fn escalates(&self) -> bool {
        matches!(self, AmqpError::Shutdown(_) | AmqpError::Cancelled(_))
    }
}

// Converting from lapin errors
impl From<LapinError> for AmqpError {
    fn from(error: LapinError) -> Self {
        let error_text = error.to_string();

        match &error {
            LapinError::IOError(_) => AmqpError::Io(error_text),
            LapinError::ProtocolError(amqp_error) => match amqp_error.kind() {
                AMQPErrorKind::Hard(_) => AmqpError::Shutdown(error_text),
                AMQPErrorKind::Soft(_) => AmqpError::ChannelProtocol(error_text),
            },
            LapinError::InvalidConnectionState(_) | LapinError::MissingHeartbeatError => {
                AmqpError::Shutdown(error_text)
            }
            LapinError::InvalidChannelState(_) => AmqpError::Cancelled(error_text),
            _ => AmqpError::Io(error_text),
        }
    }
}

impl From<Elapsed> for AmqpError {
    fn from(_: Elapsed) -> Self {
        AmqpError::Connection("Connection timed out".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::{ChannelState, ConnectionState};
    use std::sync::Arc;

    #[test]
    fn io_errors_are_local() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let error = AmqpError::from(LapinError::IOError(Arc::new(io)));

        assert!(matches!(error, AmqpError::Io(_)));
        assert!(!error.escalates());
    }

    #[test]
    fn closed_connection_is_a_shutdown_signal() {
        let error = AmqpError::from(LapinError::InvalidConnectionState(ConnectionState::Closed));
        assert!(matches!(error, AmqpError::Shutdown(_)));
        assert!(error.escalates());

        let error = AmqpError::from(LapinError::MissingHeartbeatError);
        assert!(error.escalates());
    }

    #[test]
    fn closed_channel_is_a_cancellation() {
        let error = AmqpError::from(LapinError::InvalidChannelState(ChannelState::Closed));
        assert!(matches!(error, AmqpError::Cancelled(_)));
        assert!(error.escalates());
    }

    #[test]
    fn tls_errors_are_reported_only() {
        let error = AmqpError::Tls("bad bundle".into());
        assert!(!error.escalates());
    }
}
