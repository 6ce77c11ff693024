use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::rabbitmq::AmqpError;

/// Response codes reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    /// The queue was empty; not a failure.
    NoMessage,
    /// Unset, or a setup failure such as TLS.
    Generic,
    Shutdown,
    Cancelled,
    IoFailure,
    PublishFailure,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::Ok => "200",
            ResponseCode::NoMessage => "204",
            ResponseCode::Generic => "500",
            ResponseCode::Shutdown => "400",
            ResponseCode::Cancelled => "300",
            ResponseCode::IoFailure => "100",
            ResponseCode::PublishFailure => "000",
        }
    }

    /// Code for a failed consume. Shutdown and cancellation keep their own
    /// codes; TLS is a setup fault; everything else is I/O.
    pub fn for_consume_error(error: &AmqpError) -> Self {
        match error {
            AmqpError::Shutdown(_) => ResponseCode::Shutdown,
            AmqpError::Cancelled(_) => ResponseCode::Cancelled,
            AmqpError::Tls(_) => ResponseCode::Generic,
            AmqpError::Connection(_) | AmqpError::ChannelProtocol(_) | AmqpError::Io(_) => {
                ResponseCode::IoFailure
            }
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ResponseCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

fn as_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

/// Outcome of one sampling call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleResult {
    pub label: String,
    pub thread: usize,
    pub iteration: u64,
    pub success: bool,
    pub response_code: ResponseCode,
    pub response_message: String,
    pub response_headers: String,
    pub response_data: String,
    pub sampler_data: String,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsedMs", serialize_with = "as_millis")]
    pub elapsed: Duration,
    /// The sample escalated and the sampler has shut itself down.
    pub interrupt_requested: bool,
    #[serde(skip)]
    started: Option<Instant>,
}

impl SampleResult {
    /// A result that reports failure with code 500 until told otherwise.
    pub fn new(label: &str, context: &SampleContext) -> Self {
        Self {
            label: label.to_string(),
            thread: context.thread,
            iteration: context.iteration,
            success: false,
            response_code: ResponseCode::Generic,
            response_message: String::new(),
            response_headers: String::new(),
            response_data: String::new(),
            sampler_data: String::new(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            interrupt_requested: false,
            started: None,
        }
    }

    pub fn sample_start(&mut self) {
        self.started_at = Utc::now();
        self.started = Some(Instant::now());
    }

    pub fn sample_end(&mut self) {
        self.elapsed = self
            .started
            .map(|started| started.elapsed())
            .unwrap_or_default();
    }

    pub fn set_ok(&mut self) {
        self.success = true;
        self.response_code = ResponseCode::Ok;
        self.response_message = "OK".to_string();
    }

    pub fn set_failure(&mut self, code: ResponseCode, message: impl Into<String>) {
        self.success = false;
        self.response_code = code;
        self.response_message = message.into();
    }
}

/// Per-call information from the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleContext {
    /// Virtual user number.
    pub thread: usize,
    pub iteration: u64,
}
