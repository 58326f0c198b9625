use std::sync::Arc;

use tokio::time::timeout;
use tracing::{error, info};

use crate::config::CompletionConfig;
use crate::endpoint::{Completion, CompletionEndpoint, CompletionRequest, Message};
use crate::error::{EndpointError, LlmRequestError};

/// Retrying front end over a [`CompletionEndpoint`].
///
/// Holds no per-request state, so one client can be shared by every worker.
#[derive(Clone)]
pub struct CompletionClient {
    endpoint: Arc<dyn CompletionEndpoint>,
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("endpoint", &self.endpoint.name())
            .finish()
    }
}

impl CompletionClient {
    pub fn new(endpoint: Arc<dyn CompletionEndpoint>) -> Self {
        Self { endpoint }
    }

    pub fn endpoint_name(&self) -> &str {
        self.endpoint.name()
    }

    pub async fn complete(
        &self,
        messages: Vec<Message>,
        config: &CompletionConfig,
    ) -> Result<Completion, LlmRequestError> {
        let request = CompletionRequest {
            model: config.model.clone(),
            messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };
        info!(
            endpoint = self.endpoint.name(),
            model = %config.model,
            max_tokens = config.max_tokens,
            temperature = config.temperature,
            "starting completion"
        );

        let endpoint = &self.endpoint;
        let request = &request;
        let limit = config.timeout;
        let outcome = config
            .backoff()
            .run(|_| async move {
                match timeout(limit, endpoint.send(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(EndpointError::Timeout(limit)),
                }
            })
            .await;

        match outcome {
            Ok(completion) => {
                info!(
                    model = %config.model,
                    input_tokens = completion.input_tokens,
                    output_tokens = completion.output_tokens,
                    "completion received"
                );
                Ok(completion)
            }
            Err(failure) => {
                error!(
                    model = %config.model,
                    attempts = failure.attempts,
                    elapsed_ms = failure.elapsed.as_millis() as u64,
                    error = %failure.last,
                    "completion failed"
                );
                Err(if failure.exhausted {
                    LlmRequestError::Exhausted {
                        attempts: failure.attempts,
                        elapsed: failure.elapsed,
                        last: failure.last,
                    }
                } else {
                    LlmRequestError::Rejected {
                        elapsed: failure.elapsed,
                        last: failure.last,
                    }
                })
            }
        }
    }
}
