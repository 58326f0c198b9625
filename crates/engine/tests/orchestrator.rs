use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docmatrix_core::{Confidence, TextCache};
use docmatrix_engine::{
    Column, EngineError, ExecutionMode, Orchestrator, OrchestratorConfig, Project, RunOptions,
    RunRegistry, RunScope, RunStatus, SummaryGenerator, SummaryOutput, SummaryRequest,
    CANCELLED_BEFORE_DISPATCH, EMPTY_SUMMARY,
};
use docmatrix_llm::{
    Completion, CompletionClient, CompletionEndpoint, CompletionRequest, EndpointError,
    LlmRequestError, LocalEndpoint,
};
use docmatrix_store::{
    CellKey, CellStatus, JsonResultsStore, ProjectResults, ResultsBackend, StoreError,
    SummaryScope,
};
use parking_lot::Mutex;
use serde_json::json;
use tempfile::{tempdir, TempDir};

type Reply = Box<dyn Fn(&CompletionRequest) -> Result<Completion, EndpointError> + Send + Sync>;

struct TestEndpoint {
    reply: Reply,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl TestEndpoint {
    fn new(delay: Duration, reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Answers every single-question prompt by quoting the document's first line.
    fn quoting(delay: Duration) -> Arc<Self> {
        Self::new(
            delay,
            Box::new(|request| {
                let quote = first_document_line(request);
                Ok(completion(
                    json!({ "answer": "Found [1].", "citations": [{ "text": quote }] }).to_string(),
                    20,
                    4,
                ))
            }),
        )
    }
}

#[async_trait]
impl CompletionEndpoint for TestEndpoint {
    async fn send(&self, request: &CompletionRequest) -> Result<Completion, EndpointError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.reply)(request)
    }

    fn name(&self) -> &str {
        "test"
    }
}

fn completion(text: String, input_tokens: u64, output_tokens: u64) -> Completion {
    Completion {
        text,
        input_tokens,
        output_tokens,
    }
}

fn first_document_line(request: &CompletionRequest) -> String {
    let user = &request.messages[1].content;
    let start = user.find("Document:\n\n").map(|i| i + 11).unwrap_or(0);
    user[start..].lines().next().unwrap_or_default().to_string()
}

/// Records each request together with the run status observed when it arrived.
struct RecordingSummaries {
    registry: Arc<RunRegistry>,
    project: String,
    seen: Mutex<Vec<(SummaryRequest, Option<RunStatus>)>>,
}

impl RecordingSummaries {
    fn new(registry: Arc<RunRegistry>, project: &str) -> Arc<Self> {
        Arc::new(Self {
            registry,
            project: project.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<SummaryRequest> {
        self.seen.lock().iter().map(|(request, _)| request.clone()).collect()
    }

    fn request_for(&self, scope: &SummaryScope) -> Option<SummaryRequest> {
        self.requests().into_iter().find(|request| request.scope == *scope)
    }
}

#[async_trait]
impl SummaryGenerator for RecordingSummaries {
    async fn summarize(&self, request: &SummaryRequest) -> Result<SummaryOutput, LlmRequestError> {
        let status = self.registry.status(&self.project);
        self.seen.lock().push((request.clone(), status));
        Ok(SummaryOutput {
            text: format!("{} entries summarized", request.entries.len()),
            input_tokens: 1,
            output_tokens: 1,
        })
    }
}

struct Fixture {
    dir: TempDir,
    project: Project,
    cache: Arc<TextCache>,
}

impl Fixture {
    fn new(documents: &[(&str, &str)], columns: &[(&str, &str)]) -> Self {
        let dir = tempdir().unwrap();
        let docs_dir = dir.path().join("docs");
        fs::create_dir_all(&docs_dir).unwrap();
        let paths: Vec<PathBuf> = documents
            .iter()
            .map(|(name, body)| {
                let path = docs_dir.join(name);
                fs::write(&path, body).unwrap();
                path
            })
            .collect();
        let columns = columns
            .iter()
            .map(|(id, question)| Column::new(*id, *question))
            .collect();
        let project = Project::new("demo", dir.path(), paths, columns).unwrap();
        let cache = Arc::new(TextCache::new(dir.path().join("cache")).unwrap());
        Self {
            dir,
            project,
            cache,
        }
    }

    fn grid(documents: usize, columns: usize) -> Self {
        let documents: Vec<(String, String)> = (0..documents)
            .map(|i| (format!("doc{i}.txt"), format!("Document {i} opening line.\nBody text.")))
            .collect();
        let columns: Vec<(String, String)> = (0..columns)
            .map(|i| (format!("q{i}"), format!("Question {i}?")))
            .collect();
        let documents: Vec<(&str, &str)> =
            documents.iter().map(|(n, b)| (n.as_str(), b.as_str())).collect();
        let columns: Vec<(&str, &str)> =
            columns.iter().map(|(i, q)| (i.as_str(), q.as_str())).collect();
        Self::new(&documents, &columns)
    }

    fn orchestrator(
        &self,
        endpoint: Arc<dyn CompletionEndpoint>,
        summaries: Option<Arc<RecordingSummaries>>,
        registry: Arc<RunRegistry>,
    ) -> Orchestrator {
        let config = OrchestratorConfig::default().with_retries(0, Duration::from_millis(10));
        let orchestrator = Orchestrator::new(
            CompletionClient::new(endpoint),
            Arc::clone(&self.cache),
            config,
        )
        .with_registry(registry);
        match summaries {
            Some(summaries) => orchestrator.with_summary_generator(summaries),
            None => orchestrator,
        }
    }

    fn store(&self) -> JsonResultsStore {
        self.project.results_store()
    }

    fn results(&self) -> ProjectResults {
        self.store().load().unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn never_exceeds_the_concurrency_cap() {
    let fixture = Fixture::grid(5, 3);
    let endpoint = TestEndpoint::quoting(Duration::from_secs(30));
    let registry = Arc::new(RunRegistry::new());
    let summaries = RecordingSummaries::new(registry.clone(), "demo");
    let orchestrator = fixture.orchestrator(endpoint.clone(), Some(summaries), registry);

    let options = RunOptions {
        concurrency: Some(10),
        ..RunOptions::default()
    };
    let report = orchestrator
        .execute(&fixture.project, fixture.store(), options)
        .await
        .unwrap();

    assert_eq!(report.total, 15);
    assert_eq!(report.completed, 15);
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 15);
    let peak = endpoint.peak.load(Ordering::SeqCst);
    assert!(peak <= 10, "peak in-flight calls was {peak}");
    assert!(peak > 1, "calls were never concurrent");
    assert_eq!(fixture.results().count(CellStatus::Completed), 15);
}

#[tokio::test]
async fn failed_extraction_is_isolated_and_summaries_use_successful_cells() {
    let fixture = Fixture::new(
        &[
            ("a.txt", "Alpha contract signed in March.\nPayment due in 30 days."),
            ("b.md", "Beta agreement renewed annually.\nNo penalties."),
            ("c.bin", "\u{0}\u{1}binary"),
        ],
        &[("q1", "When was it signed?"), ("q2", "What are the terms?")],
    );
    let endpoint = TestEndpoint::quoting(Duration::from_millis(5));
    let registry = Arc::new(RunRegistry::new());
    let summaries = RecordingSummaries::new(registry.clone(), "demo");
    let orchestrator = fixture.orchestrator(endpoint.clone(), Some(summaries.clone()), registry);

    let report = orchestrator
        .execute(&fixture.project, fixture.store(), RunOptions::default())
        .await
        .unwrap();
    assert_eq!((report.total, report.completed, report.errored), (6, 4, 2));
    assert!(report.fatal.is_none());
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 4);

    let results = fixture.results();
    let broken = results.cell(&CellKey::new("c.bin", "q1")).unwrap();
    assert_eq!(broken.status, CellStatus::Error);
    assert!(broken.error.as_deref().unwrap().contains("unsupported"));

    let answered = results.cell(&CellKey::new("a.txt", "q2")).unwrap();
    assert_eq!(answered.answer.as_deref(), Some("Found [1]."));
    let citation = &answered.citations[0];
    assert_eq!(citation.confidence, Confidence::Exact);
    assert_eq!(citation.char_start, Some(0));
    assert_eq!(citation.text, "Alpha contract signed in March.");

    // Every summary started after all six cells were terminal.
    for (_, status) in summaries.seen.lock().iter() {
        let status = status.as_ref().unwrap();
        assert_eq!(status.completed + status.errored, status.total);
    }
    assert!(summaries.request_for(&SummaryScope::Row("c.bin".into())).is_none());
    let empty_row = results.summary(&SummaryScope::Row("c.bin".into())).unwrap();
    assert_eq!(empty_row.text.as_deref(), Some(EMPTY_SUMMARY));
    assert_eq!(empty_row.status, CellStatus::Completed);

    let column = summaries.request_for(&SummaryScope::Column("q1".into())).unwrap();
    assert_eq!(column.subject, "When was it signed?");
    assert_eq!(column.entries.len(), 2);
    let overall = summaries.request_for(&SummaryScope::Overall).unwrap();
    assert_eq!(overall.entries.len(), 2 + 2);
    assert_eq!(report.summaries_completed, 3 + 2 + 1);

    // 4 cells at 20/4 tokens plus 5 summaries at 1/1.
    assert_eq!(results.total_input_tokens, 4 * 20 + 5);
    assert_eq!(results.total_output_tokens, 4 * 4 + 5);
    assert_eq!(report.input_tokens, results.total_input_tokens);
}

#[tokio::test]
async fn a_crashed_worker_fails_its_cells_before_summaries_start() {
    let fixture = Fixture::grid(1, 2);
    let endpoint = TestEndpoint::new(
        Duration::from_millis(1),
        Box::new(|request| {
            if request.messages[1].content.contains("Question: Question 1?") {
                panic!("provider adapter crashed");
            }
            let quote = first_document_line(request);
            Ok(completion(
                json!({ "answer": "Found [1].", "citations": [{ "text": quote }] }).to_string(),
                20,
                4,
            ))
        }),
    );
    let registry = Arc::new(RunRegistry::new());
    let summaries = RecordingSummaries::new(registry.clone(), "demo");
    let orchestrator = fixture.orchestrator(endpoint, Some(summaries.clone()), registry);

    let report = orchestrator
        .execute(&fixture.project, fixture.store(), RunOptions::default())
        .await
        .unwrap();
    assert_eq!((report.total, report.completed, report.errored), (2, 1, 1));
    assert!(report.fatal.is_none());

    let results = fixture.results();
    let crashed = results.cell(&CellKey::new("doc0.txt", "q1")).unwrap();
    assert_eq!(crashed.status, CellStatus::Error);
    assert!(crashed.error.as_deref().unwrap().starts_with("worker panicked"));
    assert_eq!(
        results.cell(&CellKey::new("doc0.txt", "q0")).unwrap().status,
        CellStatus::Completed
    );

    assert!(!summaries.seen.lock().is_empty());
    for (_, status) in summaries.seen.lock().iter() {
        let status = status.as_ref().unwrap();
        assert_eq!(status.completed + status.errored, status.total);
    }
    assert!(summaries.request_for(&SummaryScope::Column("q1".into())).is_none());
    assert!(!orchestrator.status("demo").unwrap().is_running);
}

#[tokio::test(start_paused = true)]
async fn a_second_run_is_rejected_while_one_is_active() {
    let fixture = Fixture::grid(2, 1);
    let endpoint = TestEndpoint::quoting(Duration::from_secs(10));
    let registry = Arc::new(RunRegistry::new());
    let summaries = RecordingSummaries::new(registry.clone(), "demo");
    let orchestrator = Arc::new(fixture.orchestrator(endpoint, Some(summaries), registry));

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        let project = fixture.project.clone();
        let store = fixture.store();
        tokio::spawn(async move {
            orchestrator
                .execute(&project, store, RunOptions::default())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(orchestrator.status("demo").unwrap().is_running);

    let rejected = orchestrator
        .execute(&fixture.project, fixture.store(), RunOptions::default())
        .await;
    assert!(matches!(rejected, Err(EngineError::AlreadyRunning(name)) if name == "demo"));

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.completed, 2);
    assert!(!orchestrator.status("demo").unwrap().is_running);

    let scope = RunScope::Cell {
        document: "doc1.txt".into(),
        column: "q0".into(),
    };
    let options = RunOptions {
        scope,
        ..RunOptions::default()
    };
    let rerun = orchestrator
        .execute(&fixture.project, fixture.store(), options)
        .await
        .unwrap();
    assert_eq!(rerun.total, 1);
    assert_eq!(rerun.summaries_completed, 0);
    assert_eq!(fixture.results().count(CellStatus::Completed), 2);
}

#[tokio::test]
async fn row_wise_runs_one_call_per_document_and_splits_usage() {
    let fixture = Fixture::new(
        &[("a.txt", "Alpha contract signed in March.\nPayment due in 30 days.")],
        &[("q1", "When?"), ("q2", "Terms?"), ("q3", "Penalties?")],
    );
    let endpoint = TestEndpoint::new(
        Duration::from_millis(1),
        Box::new(|request| {
            assert!(request.messages[1].content.contains("3. [q3] Penalties?"));
            let reply = json!({
                "answers": {
                    "q1": { "answer": "In March [[cite:\"signed in March\"]]." },
                    "q2": "Payment in 30 days."
                }
            });
            Ok(completion(reply.to_string(), 11, 5))
        }),
    );
    let registry = Arc::new(RunRegistry::new());
    let summaries = RecordingSummaries::new(registry.clone(), "demo");
    let orchestrator = fixture.orchestrator(endpoint.clone(), Some(summaries), registry);

    let options = RunOptions {
        mode: Some(ExecutionMode::RowWise),
        ..RunOptions::default()
    };
    let report = orchestrator
        .execute(&fixture.project, fixture.store(), options)
        .await
        .unwrap();
    assert_eq!(report.completed, 3);
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);

    let results = fixture.results();
    let cell = |column: &str| results.cell(&CellKey::new("a.txt", column)).unwrap().clone();
    let q1 = cell("q1");
    assert_eq!(q1.answer.as_deref(), Some("In March [1]."));
    assert_eq!(q1.citations[0].confidence, Confidence::Exact);
    assert_eq!(q1.citations[0].char_start, Some(15));
    assert_eq!((q1.input_tokens, q1.output_tokens), (5, 3));
    assert_eq!(cell("q2").answer.as_deref(), Some("Payment in 30 days."));
    assert_eq!((cell("q2").input_tokens, cell("q2").output_tokens), (3, 1));
    assert_eq!(cell("q3").answer.as_deref(), Some(docmatrix_core::NO_ANSWER));
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_further_dispatch() {
    let fixture = Fixture::grid(1, 4);
    let endpoint = TestEndpoint::quoting(Duration::from_secs(10));
    let registry = Arc::new(RunRegistry::new());
    let summaries = RecordingSummaries::new(registry.clone(), "demo");
    let orchestrator = Arc::new(fixture.orchestrator(
        endpoint.clone(),
        Some(summaries.clone()),
        registry,
    ));

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        let project = fixture.project.clone();
        let store = fixture.store();
        tokio::spawn(async move {
            let options = RunOptions {
                concurrency: Some(1),
                ..RunOptions::default()
            };
            orchestrator.execute(&project, store, options).await
        })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(orchestrator.cancel("demo"));

    let report = run.await.unwrap().unwrap();
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    assert_eq!((report.completed, report.errored, report.undispatched), (1, 3, 3));
    assert!(summaries.requests().is_empty());

    let results = fixture.results();
    let skipped = results.cell(&CellKey::new("doc0.txt", "q3")).unwrap();
    assert_eq!(skipped.status, CellStatus::Error);
    assert_eq!(skipped.error.as_deref(), Some(CANCELLED_BEFORE_DISPATCH));
    assert!(!orchestrator.cancel("demo"));
}

/// Accepts the first write, then reports the store as gone.
struct DetachingStore {
    writes: Arc<AtomicUsize>,
}

impl ResultsBackend for DetachingStore {
    fn load(&self) -> docmatrix_store::Result<ProjectResults> {
        Ok(ProjectResults::default())
    }

    fn persist(&mut self, _results: &ProjectResults) -> docmatrix_store::Result<()> {
        if self.writes.fetch_add(1, Ordering::SeqCst) >= 1 {
            return Err(StoreError::Unavailable("volume detached".into()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn store_failure_aborts_remaining_dispatch() {
    let fixture = Fixture::grid(1, 3);
    let endpoint = TestEndpoint::quoting(Duration::from_millis(5));
    let registry = Arc::new(RunRegistry::new());
    let summaries = RecordingSummaries::new(registry.clone(), "demo");
    let orchestrator = fixture.orchestrator(endpoint.clone(), Some(summaries.clone()), registry);

    let options = RunOptions {
        concurrency: Some(1),
        ..RunOptions::default()
    };
    let store = DetachingStore {
        writes: Arc::new(AtomicUsize::new(0)),
    };
    let report = orchestrator
        .execute(&fixture.project, store, options)
        .await
        .unwrap();

    assert!(report.fatal.as_deref().unwrap().contains("volume detached"));
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.undispatched, 2);
    assert!(summaries.requests().is_empty());
    assert!(!orchestrator.status("demo").unwrap().is_running);
}

#[tokio::test]
async fn local_endpoint_runs_end_to_end() {
    let fixture = Fixture::new(
        &[
            ("a.txt", "Alpha contract signed in March."),
            ("b.txt", "Beta agreement renewed annually."),
        ],
        &[("q1", "Summary?")],
    );
    let registry = Arc::new(RunRegistry::new());
    let orchestrator = fixture.orchestrator(Arc::new(LocalEndpoint), None, registry);

    let report = orchestrator
        .execute(&fixture.project, fixture.store(), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.completed, 2);
    assert_eq!(report.summaries_completed, 2 + 1 + 1);

    let results = fixture.results();
    let cell = results.cell(&CellKey::new("b.txt", "q1")).unwrap();
    assert_eq!(cell.citations.len(), 1);
    assert_eq!(cell.citations[0].confidence, Confidence::Exact);
    let overall = results.overall_summary.as_ref().unwrap();
    assert!(overall.text.as_deref().unwrap().starts_with("Summary:"));
    assert!(fixture.dir.path().join(".doc_matrix/projects/demo/results.json").exists());
}
