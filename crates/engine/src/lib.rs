pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod project;
pub mod prompts;
pub mod status;
pub mod summary;

pub use error::{EngineError, Result};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, RunOptions, RunReport, CANCELLED_BEFORE_DISPATCH,
    DEFAULT_CONCURRENCY,
};
pub use plan::{ExecutionPlan, RunScope, WorkUnit};
pub use project::{Column, DocumentSource, ExecutionMode, Project, ProjectFile};
pub use status::{RunGuard, RunRegistry, RunStatus};
pub use summary::{
    LlmSummaryGenerator, SummaryGenerator, SummaryOutput, SummaryRequest, EMPTY_SUMMARY,
};
