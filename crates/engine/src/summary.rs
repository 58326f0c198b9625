use async_trait::async_trait;
use docmatrix_llm::{CompletionClient, CompletionConfig, LlmRequestError};
use docmatrix_store::SummaryScope;

use crate::prompts;

/// Text stored when a scope has no completed inputs.
pub const EMPTY_SUMMARY: &str = "No data to summarize.";

/// Material for one summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRequest {
    pub scope: SummaryScope,
    /// Document name, column question or project name, depending on the scope.
    pub subject: String,
    /// `(label, text)` pairs built from completed cells or summaries only.
    pub entries: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryOutput {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn summarize(&self, request: &SummaryRequest) -> Result<SummaryOutput, LlmRequestError>;
}

/// Summaries produced by the same completion client that answers cells.
#[derive(Debug, Clone)]
pub struct LlmSummaryGenerator {
    client: CompletionClient,
    config: CompletionConfig,
}

impl LlmSummaryGenerator {
    pub fn new(client: CompletionClient, config: CompletionConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl SummaryGenerator for LlmSummaryGenerator {
    async fn summarize(&self, request: &SummaryRequest) -> Result<SummaryOutput, LlmRequestError> {
        let messages = match &request.scope {
            SummaryScope::Row(_) => prompts::row_summary(&request.subject, &request.entries),
            SummaryScope::Column(_) => prompts::column_summary(&request.subject, &request.entries),
            SummaryScope::Overall => prompts::overall_summary(&request.subject, &request.entries),
        };
        let completion = self.client.complete(messages, &self.config).await?;
        Ok(SummaryOutput {
            text: completion.text.trim().to_string(),
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
        })
    }
}
