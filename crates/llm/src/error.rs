use std::time::Duration;

use thiserror::Error;

/// A single failed call to a completion endpoint.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EndpointError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("provider returned HTTP {status}: {body}")]
    Status {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("endpoint misconfigured: {0}")]
    Config(String),
}

impl EndpointError {
    /// Timeouts, connection failures, 429 and 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            EndpointError::Timeout(_) | EndpointError::Connection(_) => true,
            EndpointError::Status { status, .. } => *status == 429 || *status >= 500,
            EndpointError::Malformed(_) | EndpointError::Config(_) => false,
        }
    }

    /// Provider-supplied wait hint, only meaningful on 429.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            EndpointError::Status {
                status: 429,
                retry_after,
                ..
            } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmRequestError {
    #[error("completion failed after {attempts} attempts in {elapsed:?}: {last}")]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        last: EndpointError,
    },
    #[error("completion rejected after {elapsed:?}: {last}")]
    Rejected {
        elapsed: Duration,
        last: EndpointError,
    },
}

impl LlmRequestError {
    pub fn last(&self) -> &EndpointError {
        match self {
            LlmRequestError::Exhausted { last, .. } | LlmRequestError::Rejected { last, .. } => {
                last
            }
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            LlmRequestError::Exhausted { elapsed, .. }
            | LlmRequestError::Rejected { elapsed, .. } => *elapsed,
        }
    }
}
