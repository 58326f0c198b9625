//! Runs a project's matrix: dispatches work units under a concurrency cap,
//! attaches resolved citations to every answered cell, and generates summaries
//! once every planned cell is terminal.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docmatrix_core::{
    dedupe_citations, parse, parse_row_wise, parse_single, resolve, resolve_in, Citation,
    Document, ExtractionError, StructuredAnswer, TextCache, NO_ANSWER,
};
use docmatrix_llm::{CompletionClient, CompletionConfig};
use docmatrix_store::{
    spawn_writer, CellKey, CellRecord, CellStatus, ProjectResults, ResultUpdate, ResultWriter,
    ResultsBackend, StoreError, SummaryRecord, SummaryScope,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::plan::{ExecutionPlan, RunScope, WorkUnit};
use crate::project::{Column, ExecutionMode, Project};
use crate::prompts;
use crate::status::{RunGuard, RunRegistry, RunStatus};
use crate::summary::{
    LlmSummaryGenerator, SummaryGenerator, SummaryOutput, SummaryRequest, EMPTY_SUMMARY,
};

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const CANCELLED_BEFORE_DISPATCH: &str = "run cancelled before dispatch";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub cell: CompletionConfig,
    pub row: CompletionConfig,
    pub summary: CompletionConfig,
    pub concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cell: CompletionConfig::document(),
            row: CompletionConfig::row_wise(),
            summary: CompletionConfig::summary(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.cell.model = model.clone();
        self.row.model = model.clone();
        self.summary.model = model;
        self
    }

    pub fn with_retries(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        for config in [&mut self.cell, &mut self.row, &mut self.summary] {
            config.retry_count = retry_count;
            config.retry_delay = retry_delay;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        for config in [&mut self.cell, &mut self.row, &mut self.summary] {
            config.timeout = timeout;
        }
        self
    }
}

/// Per-request overrides of the project's settings.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub scope: RunScope,
    pub mode: Option<ExecutionMode>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub project: String,
    pub mode: ExecutionMode,
    pub total: usize,
    pub completed: usize,
    pub errored: usize,
    /// Cells that were never dispatched; included in `errored`.
    pub undispatched: usize,
    pub summaries_completed: usize,
    pub summaries_failed: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub elapsed: Duration,
    pub fatal: Option<String>,
}

pub struct Orchestrator {
    client: CompletionClient,
    cache: Arc<TextCache>,
    registry: Arc<RunRegistry>,
    summaries: Arc<dyn SummaryGenerator>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        client: CompletionClient,
        cache: Arc<TextCache>,
        config: OrchestratorConfig,
    ) -> Self {
        let summaries = Arc::new(LlmSummaryGenerator::new(
            client.clone(),
            config.summary.clone(),
        ));
        Self {
            client,
            cache,
            registry: Arc::new(RunRegistry::new()),
            summaries,
            config,
        }
    }

    pub fn with_registry(mut self, registry: Arc<RunRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_summary_generator(mut self, summaries: Arc<dyn SummaryGenerator>) -> Self {
        self.summaries = summaries;
        self
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn status(&self, project: &str) -> Option<RunStatus> {
        self.registry.status(project)
    }

    pub fn cancel(&self, project: &str) -> bool {
        self.registry.cancel(project)
    }

    /// Runs `options.scope` of `project`, persisting through `backend`.
    ///
    /// Fails up front when the scope names an unknown row or column, when the
    /// project already has an active run, or when existing results cannot be
    /// loaded. Per-cell failures are recorded on the cells; a persistence
    /// failure during the run stops dispatch and is reported in
    /// [`RunReport::fatal`].
    pub async fn execute<B: ResultsBackend>(
        &self,
        project: &Project,
        backend: B,
        options: RunOptions,
    ) -> Result<RunReport> {
        let mode = options.mode.unwrap_or(project.mode);
        let concurrency = options
            .concurrency
            .or(project.concurrency)
            .unwrap_or(self.config.concurrency);
        let plan = ExecutionPlan::build(project, &options.scope, mode, concurrency)?;
        let guard = Arc::new(self.registry.begin(&project.name, plan.total_cells())?);
        let started = Instant::now();
        info!(
            project = %project.name,
            mode = ?mode,
            cells = plan.total_cells(),
            units = plan.units.len(),
            concurrency = plan.concurrency,
            "starting run"
        );

        let initial = backend.load()?;
        let (writer, writer_task) = spawn_writer(backend, initial);
        let model = project
            .model
            .clone()
            .unwrap_or_else(|| self.config.cell.model.clone());
        let ctx = Arc::new(RunContext {
            project: project.name.clone(),
            model: model.clone(),
            mode,
            client: self.client.clone(),
            cache: Arc::clone(&self.cache),
            writer,
            guard: Arc::clone(&guard),
            cell_config: self.config.cell.clone().with_model(model.clone()),
            row_config: self.config.row.clone().with_model(model),
            fatal: Mutex::new(None),
            finished: Mutex::new(HashSet::new()),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        });

        ctx.store(ResultUpdate::Reset(plan.cell_keys())).await;

        let semaphore = Arc::new(Semaphore::new(plan.concurrency));
        let mut workers = JoinSet::new();
        let mut dispatched: Vec<CellKey> = Vec::new();
        let mut undispatched: Vec<(CellKey, String)> = Vec::new();
        for unit in &plan.units {
            let permit = match ctx.stop_reason() {
                None => Arc::clone(&semaphore).acquire_owned().await.ok(),
                Some(_) => None,
            };
            // Re-checked after waiting for capacity.
            match (permit, ctx.stop_reason()) {
                (Some(permit), None) => {
                    dispatched.extend(unit.keys());
                    let ctx = Arc::clone(&ctx);
                    let unit = unit.clone();
                    workers.spawn(async move {
                        let _permit = permit;
                        ctx.run_unit(unit).await;
                    });
                }
                (_, reason) => {
                    let reason = reason.unwrap_or_else(|| "dispatch queue closed".to_string());
                    undispatched.extend(unit.keys().map(|key| (key, reason.clone())));
                }
            }
        }
        let mut worker_failure = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(project = %project.name, error = %err, "worker task failed");
                worker_failure = Some(err.to_string());
            }
        }
        if let Some(failure) = worker_failure {
            // Cells of a failed worker never reached a terminal state on their own.
            let orphaned: Vec<CellKey> = {
                let finished = ctx.finished.lock();
                dispatched.into_iter().filter(|key| !finished.contains(key)).collect()
            };
            let message = format!("worker panicked: {failure}");
            for key in orphaned {
                ctx.finish_cell(key, CellRecord::failed(&ctx.model, &message)).await;
            }
        }
        if !undispatched.is_empty() {
            warn!(
                project = %project.name,
                cells = undispatched.len(),
                "cells left undispatched"
            );
        }
        let undispatched_count = undispatched.len();
        for (key, reason) in undispatched {
            ctx.finish_cell(key, CellRecord::failed(&ctx.model, reason)).await;
        }

        let mut summaries_completed = 0;
        let mut summaries_failed = 0;
        if ctx.stop_reason().is_none() && !plan.summaries.is_empty() {
            let outcomes = self.generate_summaries(&ctx, project, &plan).await;
            summaries_completed = outcomes.iter().filter(|s| **s == CellStatus::Completed).count();
            summaries_failed = outcomes.len() - summaries_completed;
        }

        let status = guard.status();
        let fatal = ctx.fatal.lock().clone();
        let report = RunReport {
            project: project.name.clone(),
            mode,
            total: status.total,
            completed: status.completed,
            errored: status.errored,
            undispatched: undispatched_count,
            summaries_completed,
            summaries_failed,
            input_tokens: ctx.input_tokens.load(Ordering::SeqCst),
            output_tokens: ctx.output_tokens.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
            fatal,
        };
        drop(ctx);
        if let Err(err) = writer_task.await {
            error!(project = %project.name, error = %err, "result writer stopped abnormally");
        }
        guard.finish();
        info!(
            project = %report.project,
            completed = report.completed,
            errored = report.errored,
            input_tokens = report.input_tokens,
            output_tokens = report.output_tokens,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }

    /// Rows and columns first, concurrently; the overall summary last so it can
    /// read them.
    async fn generate_summaries(
        &self,
        ctx: &Arc<RunContext>,
        project: &Project,
        plan: &ExecutionPlan,
    ) -> Vec<CellStatus> {
        let mut sources = Vec::new();
        for path in &project.documents {
            if let Ok(document) = ctx.load_document(path).await {
                sources.push(document);
            }
        }
        let sources = Arc::new(sources);
        let semaphore = Arc::new(Semaphore::new(plan.concurrency));
        let mut outcomes = Vec::new();

        let (partial, overall): (Vec<_>, Vec<_>) = plan
            .summaries
            .iter()
            .cloned()
            .partition(|scope| *scope != SummaryScope::Overall);
        for phase in [partial, overall] {
            if phase.is_empty() {
                continue;
            }
            let snapshot = match ctx.writer.snapshot().await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    ctx.fail_run(&err);
                    return outcomes;
                }
            };
            let mut tasks = JoinSet::new();
            for scope in phase {
                let request = summary_request(project, &snapshot, &scope);
                let scoped_sources: Vec<Arc<Document>> = match &scope {
                    SummaryScope::Row(name) => {
                        sources.iter().filter(|doc| doc.name == *name).cloned().collect()
                    }
                    _ => sources.as_ref().clone(),
                };
                let ctx = Arc::clone(ctx);
                let generator = Arc::clone(&self.summaries);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let record = summarize(&*generator, &request, &scoped_sources).await;
                    let status = record.status;
                    ctx.add_tokens(record.input_tokens, record.output_tokens);
                    ctx.store(ResultUpdate::Summary { scope, record }).await;
                    status
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(status) => outcomes.push(status),
                    Err(err) => {
                        error!(project = %project.name, error = %err, "summary task failed");
                        outcomes.push(CellStatus::Error);
                    }
                }
            }
        }
        outcomes
    }
}

struct RunContext {
    project: String,
    model: String,
    mode: ExecutionMode,
    client: CompletionClient,
    cache: Arc<TextCache>,
    writer: ResultWriter,
    guard: Arc<RunGuard>,
    cell_config: CompletionConfig,
    row_config: CompletionConfig,
    fatal: Mutex<Option<String>>,
    finished: Mutex<HashSet<CellKey>>,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl RunContext {
    fn stop_reason(&self) -> Option<String> {
        if let Some(fatal) = self.fatal.lock().as_ref() {
            return Some(format!("run aborted: {fatal}"));
        }
        self.guard
            .is_cancelled()
            .then(|| CANCELLED_BEFORE_DISPATCH.to_string())
    }

    fn fail_run(&self, err: &StoreError) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            error!(
                project = %self.project,
                error = %err,
                "results store failed, stopping dispatch"
            );
            *fatal = Some(err.to_string());
        }
    }

    fn add_tokens(&self, input: u64, output: u64) {
        self.input_tokens.fetch_add(input, Ordering::SeqCst);
        self.output_tokens.fetch_add(output, Ordering::SeqCst);
    }

    async fn store(&self, update: ResultUpdate) {
        if let Err(err) = self.writer.submit(update).await {
            self.fail_run(&err);
        }
    }

    async fn finish_cell(&self, key: CellKey, record: CellRecord) {
        let status = record.status;
        match &record.error {
            Some(message) => {
                warn!(project = %self.project, cell = %key, error = %message, "cell failed")
            }
            None => debug!(
                project = %self.project,
                cell = %key,
                citations = record.citations.len(),
                "cell completed"
            ),
        }
        if !self.finished.lock().insert(key.clone()) {
            return;
        }
        self.add_tokens(record.input_tokens, record.output_tokens);
        self.store(ResultUpdate::Cell { key, record }).await;
        self.guard.record(status);
    }

    async fn load_document(
        &self,
        path: &Path,
    ) -> std::result::Result<Arc<Document>, ExtractionError> {
        let cache = Arc::clone(&self.cache);
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || cache.get_text(&owned))
            .await
            .unwrap_or_else(|err| {
                Err(ExtractionError::Unreadable {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                })
            })
    }

    async fn run_unit(&self, unit: WorkUnit) {
        for key in unit.keys() {
            self.store(ResultUpdate::Cell {
                key,
                record: CellRecord::running(&self.model),
            })
            .await;
        }
        let document = match self.load_document(&unit.document).await {
            Ok(document) => document,
            Err(err) => {
                let message = err.to_string();
                for key in unit.keys() {
                    self.finish_cell(key, CellRecord::failed(&self.model, &message)).await;
                }
                return;
            }
        };
        match self.mode {
            ExecutionMode::Parallel => {
                for column in &unit.columns {
                    self.answer_cell(&unit, column, &document).await;
                }
            }
            ExecutionMode::RowWise => self.answer_row(&unit, &document).await,
        }
    }

    async fn answer_cell(&self, unit: &WorkUnit, column: &Column, document: &Document) {
        let key = CellKey::new(unit.document_name.clone(), column.id.clone());
        let messages = prompts::single_question(&document.name, &document.text, &column.question);
        let record = match self.client.complete(messages, &self.cell_config).await {
            Ok(completion) => {
                let (answer, citations) = cite(&parse_single(&completion.text), document);
                CellRecord::completed(
                    &self.model,
                    answer,
                    citations,
                    completion.input_tokens,
                    completion.output_tokens,
                )
            }
            Err(err) => CellRecord::failed(&self.model, err.to_string()),
        };
        self.finish_cell(key, record).await;
    }

    async fn answer_row(&self, unit: &WorkUnit, document: &Document) {
        let messages = prompts::row_wise(&document.name, &document.text, &unit.columns);
        let completion = match self.client.complete(messages, &self.row_config).await {
            Ok(completion) => completion,
            Err(err) => {
                let message = err.to_string();
                for key in unit.keys() {
                    self.finish_cell(key, CellRecord::failed(&self.model, &message)).await;
                }
                return;
            }
        };
        let ids: Vec<String> = unit.columns.iter().map(|c| c.id.clone()).collect();
        let mut answers = parse_row_wise(&completion.text, &ids);
        let input = split_evenly(completion.input_tokens, ids.len());
        let output = split_evenly(completion.output_tokens, ids.len());
        for (i, key) in unit.keys().enumerate() {
            let structured = answers
                .remove(&key.column)
                .unwrap_or_else(|| StructuredAnswer::plain(NO_ANSWER));
            let (answer, citations) = cite(&structured, document);
            let record = CellRecord::completed(&self.model, answer, citations, input[i], output[i]);
            self.finish_cell(key, record).await;
        }
    }
}

/// Renders the answer with display numbers and resolves every reference.
fn cite(structured: &StructuredAnswer, document: &Document) -> (String, Vec<Citation>) {
    let parsed = parse(&structured.answer, &structured.citations);
    let citations = parsed
        .refs
        .iter()
        .map(|reference| resolve(reference, document))
        .collect();
    (parsed.render(), citations)
}

/// Even shares with the remainder on the first one.
fn split_evenly(total: u64, parts: usize) -> Vec<u64> {
    if parts == 0 {
        return Vec::new();
    }
    let share = total / parts as u64;
    let mut shares = vec![share; parts];
    shares[0] += total % parts as u64;
    shares
}

fn summary_request(
    project: &Project,
    results: &ProjectResults,
    scope: &SummaryScope,
) -> SummaryRequest {
    let answer = |document: &str, column: &str| {
        results
            .cell(&CellKey::new(document, column))
            .filter(|cell| cell.status == CellStatus::Completed)
            .and_then(|cell| cell.answer.clone())
    };
    let summary_text = |record: Option<&SummaryRecord>| {
        record
            .filter(|summary| summary.status == CellStatus::Completed)
            .and_then(|summary| summary.text.clone())
            .filter(|text| text != EMPTY_SUMMARY)
    };
    let (subject, entries) = match scope {
        SummaryScope::Row(document) => (
            document.clone(),
            project
                .columns
                .iter()
                .filter_map(|column| {
                    answer(document, &column.id).map(|text| (column.question.clone(), text))
                })
                .collect(),
        ),
        SummaryScope::Column(id) => (
            project
                .column(id)
                .map(|column| column.question.clone())
                .unwrap_or_else(|| id.clone()),
            project
                .document_names()
                .into_iter()
                .filter_map(|document| answer(&document, id).map(|text| (document, text)))
                .collect(),
        ),
        SummaryScope::Overall => {
            let rows = project.document_names().into_iter().filter_map(|document| {
                summary_text(results.row_summaries.get(&document))
                    .map(|text| (format!("file {document}"), text))
            });
            let columns = project.columns.iter().filter_map(|column| {
                summary_text(results.column_summaries.get(&column.id))
                    .map(|text| (format!("question {}", column.question), text))
            });
            (project.name.clone(), rows.chain(columns).collect())
        }
    };
    SummaryRequest {
        scope: scope.clone(),
        subject,
        entries,
    }
}

/// An empty scope is answered locally without a provider call.
async fn summarize(
    generator: &dyn SummaryGenerator,
    request: &SummaryRequest,
    sources: &[Arc<Document>],
) -> SummaryRecord {
    if request.entries.is_empty() {
        return SummaryRecord::completed(EMPTY_SUMMARY, Vec::new(), 0, 0);
    }
    match generator.summarize(request).await {
        Ok(SummaryOutput {
            text,
            input_tokens,
            output_tokens,
        }) => {
            let parsed = parse(&text, &[]);
            let citations = if sources.is_empty() {
                Vec::new()
            } else {
                dedupe_citations(parsed.refs.iter().map(|reference| resolve_in(reference, sources)))
            };
            SummaryRecord::completed(text, citations, input_tokens, output_tokens)
        }
        Err(err) => {
            warn!(scope = %request.scope, error = %err, "summary failed");
            SummaryRecord::failed(err.to_string())
        }
    }
}
