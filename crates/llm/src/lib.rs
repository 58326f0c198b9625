mod backoff;
mod client;
mod config;
mod endpoint;
mod error;

pub use backoff::{BackoffPolicy, RetryFailure, Retryable};
pub use client::CompletionClient;
pub use config::{CompletionConfig, UnknownPreset, DEFAULT_MODEL};
pub use endpoint::{
    Completion, CompletionEndpoint, CompletionRequest, HttpEndpoint, LocalEndpoint, Message,
    Provider,
};
pub use error::{EndpointError, LlmRequestError};
