use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use docmatrix_core::{resolve, CitationRef, TextCache};
use docmatrix_engine::{ExecutionMode, Orchestrator, Project, RunOptions, RunReport, RunScope};
use docmatrix_llm::CompletionClient;
use docmatrix_store::CellKey;
use tracing::info;

use crate::cli::RunArgs;
use crate::config::DocMatrixConfig;

pub fn run_project(args: RunArgs, config: &DocMatrixConfig) -> Result<RunReport> {
    let project = Project::load(&args.project)
        .with_context(|| format!("failed to load project {}", args.project.display()))?;
    let options = RunOptions {
        scope: scope_for(&args)?,
        mode: args
            .mode
            .as_deref()
            .map(str::parse::<ExecutionMode>)
            .transpose()?,
        concurrency: args.concurrency,
    };
    let cache_dir = config.cache_dir_for(&project.root);
    let cache = TextCache::new(&cache_dir)
        .with_context(|| format!("failed to open text cache {}", cache_dir.display()))?;
    let orchestrator = Orchestrator::new(
        CompletionClient::new(config.endpoint()?),
        Arc::new(cache),
        config.orchestrator(args.preset.as_deref())?,
    );

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let report = runtime.block_on(orchestrator.execute(
        &project,
        project.results_store(),
        options,
    ))?;
    info!(
        project = %project.name,
        results = %project.results_path.display(),
        "results written"
    );
    if let Some(fatal) = &report.fatal {
        bail!("run aborted: {fatal}");
    }
    Ok(report)
}

fn scope_for(args: &RunArgs) -> Result<RunScope> {
    Ok(match (&args.row, &args.column, &args.cell) {
        (Some(row), None, None) => RunScope::Row(row.clone()),
        (None, Some(column), None) => RunScope::Column(column.clone()),
        (None, None, Some(cell)) => {
            let key: CellKey = cell
                .parse()
                .with_context(|| format!("--cell expects <document>:<column>, got {cell}"))?;
            RunScope::Cell {
                document: key.document,
                column: key.column,
            }
        }
        (None, None, None) => RunScope::All,
        _ => bail!("choose at most one of --row, --column and --cell"),
    })
}

pub fn extract(path: &Path, force: bool, config: &DocMatrixConfig) -> Result<()> {
    let cache = open_cache(path, config)?;
    let document = if force {
        cache.force_refresh(path)
    } else {
        cache.get_text(path)
    }
    .with_context(|| format!("failed to extract {}", path.display()))?;
    println!("document: {}", document.name);
    println!("extraction_version: {}", document.extraction_version);
    println!("method: {}", document.extraction_method);
    println!("pages: {}", document.page_count());
    println!("characters: {}", document.char_len());
    Ok(())
}

pub fn resolve_quote(path: &Path, quote: &str, config: &DocMatrixConfig) -> Result<()> {
    let cache = open_cache(path, config)?;
    let document = cache
        .get_text(path)
        .with_context(|| format!("failed to extract {}", path.display()))?;
    let citation = resolve(&CitationRef::quote(quote), &document);
    println!("{}", serde_json::to_string_pretty(&citation)?);
    Ok(())
}

/// Cache next to the working directory unless one is configured.
fn open_cache(path: &Path, config: &DocMatrixConfig) -> Result<TextCache> {
    if !path.exists() {
        bail!("{} does not exist", path.display());
    }
    let dir = config.cache_dir_for(Path::new("."));
    TextCache::new(&dir).with_context(|| format!("failed to open text cache {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmatrix_store::{CellStatus, ResultsBackend};
    use std::fs;
    use std::path::PathBuf;

    fn args(project: PathBuf) -> RunArgs {
        RunArgs {
            project,
            row: None,
            column: None,
            cell: None,
            mode: None,
            concurrency: None,
            preset: None,
        }
    }

    #[test]
    fn scope_flags_map_to_run_scopes() {
        let mut run = args(PathBuf::from("p.yaml"));
        assert_eq!(scope_for(&run).unwrap(), RunScope::All);
        run.cell = Some("minutes 10:30.txt:q2".into());
        assert_eq!(
            scope_for(&run).unwrap(),
            RunScope::Cell {
                document: "minutes 10:30.txt".into(),
                column: "q2".into()
            }
        );
        run.cell = Some("no-column".into());
        assert!(scope_for(&run).is_err());
        run.cell = None;
        run.row = Some("a.txt".into());
        run.column = Some("q1".into());
        assert!(scope_for(&run).is_err());
    }

    #[test]
    fn runs_a_project_against_the_local_provider() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/a.txt"), "Alpha contract signed in March.").unwrap();
        fs::write(dir.path().join("docs/b.md"), "# Beta\nRenewed every year.").unwrap();
        let project = dir.path().join("project.yaml");
        fs::write(
            &project,
            "name: demo\ndocuments:\n  folder: docs\ncolumns:\n  - id: q1\n    question: When?\n",
        )
        .unwrap();
        let config = DocMatrixConfig {
            provider: "local".into(),
            ..DocMatrixConfig::default()
        };

        let report = run_project(args(project.clone()), &config).unwrap();
        assert_eq!((report.total, report.completed), (2, 2));

        let project = Project::load(&project).unwrap();
        let results = project.results_store().load().unwrap();
        assert_eq!(results.count(CellStatus::Completed), 2);
        assert!(results.overall_summary.is_some());
        assert!(dir.path().join(".doc_matrix/text_cache").is_dir());
    }
}
