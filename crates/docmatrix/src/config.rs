use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use docmatrix_engine::{OrchestratorConfig, DEFAULT_CONCURRENCY};
use docmatrix_llm::{CompletionConfig, CompletionEndpoint, HttpEndpoint, LocalEndpoint, Provider};
use serde::Deserialize;

/// Process-wide settings: an optional YAML file overlaid with `DOCMATRIX_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DocMatrixConfig {
    pub provider: String,
    pub model: Option<String>,
    pub preset: Option<String>,
    pub concurrency: usize,
    pub cache_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub retry_count: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl Default for DocMatrixConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenRouter.as_str().to_string(),
            model: None,
            preset: None,
            concurrency: DEFAULT_CONCURRENCY,
            cache_dir: None,
            timeout_secs: None,
            retry_count: None,
            retry_delay_ms: None,
        }
    }
}

impl DocMatrixConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_yaml::from_str(&raw).context("invalid docmatrix config")?
            }
            None => Self::default(),
        };
        base.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(provider) = lookup("DOCMATRIX_PROVIDER") {
            self.provider = provider;
        }
        if let Some(model) = lookup("DOCMATRIX_MODEL") {
            self.model = Some(model);
        }
        if let Some(preset) = lookup("DOCMATRIX_PRESET") {
            self.preset = Some(preset);
        }
        if let Some(dir) = lookup("DOCMATRIX_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = parse_var(&lookup, "DOCMATRIX_CONCURRENCY")? {
            self.concurrency = value;
        }
        if let Some(value) = parse_var(&lookup, "DOCMATRIX_TIMEOUT_SECS")? {
            self.timeout_secs = Some(value);
        }
        if let Some(value) = parse_var(&lookup, "DOCMATRIX_RETRY_COUNT")? {
            self.retry_count = Some(value);
        }
        if let Some(value) = parse_var(&lookup, "DOCMATRIX_RETRY_DELAY_MS")? {
            self.retry_delay_ms = Some(value);
        }
        if self.concurrency == 0 {
            return Err(anyhow!("concurrency must be at least 1"));
        }
        self.provider()?;
        Ok(self)
    }

    pub fn provider(&self) -> Result<Provider> {
        Provider::from_str(&self.provider)
            .ok_or_else(|| anyhow!("unknown provider {}", self.provider))
    }

    pub fn endpoint(&self) -> Result<Arc<dyn CompletionEndpoint>> {
        match self.provider()? {
            Provider::Local => Ok(Arc::new(LocalEndpoint)),
            provider => {
                let endpoint = HttpEndpoint::from_env(provider)
                    .with_context(|| format!("cannot reach provider {}", provider.as_str()))?;
                Ok(Arc::new(endpoint))
            }
        }
    }

    /// Request settings for every call a run makes. `preset` overrides the
    /// configured cell preset.
    pub fn orchestrator(&self, preset: Option<&str>) -> Result<OrchestratorConfig> {
        let mut config = OrchestratorConfig {
            concurrency: self.concurrency,
            ..OrchestratorConfig::default()
        };
        if let Some(name) = preset.or(self.preset.as_deref()) {
            config.cell = CompletionConfig::preset(name)?;
        }
        if let Some(model) = &self.model {
            config = config.with_model(model.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if self.retry_count.is_some() || self.retry_delay_ms.is_some() {
            let count = self.retry_count.unwrap_or(config.cell.retry_count);
            let delay = self
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(config.cell.retry_delay);
            config = config.with_retries(count, delay);
        }
        Ok(config)
    }

    /// Configured cache directory, or `<root>/.doc_matrix/text_cache`.
    pub fn cache_dir_for(&self, root: &Path) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| root.join(".doc_matrix").join("text_cache"))
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: {raw}"))
        })
        .transpose()
}
