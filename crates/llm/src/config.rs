use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::BackoffPolicy;

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown request preset `{0}`")]
pub struct UnknownPreset(pub String);

/// Per-request generation and retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(with = "secs")]
    pub timeout: Duration,
    pub retry_count: u32,
    #[serde(with = "secs")]
    pub retry_delay: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self::document()
    }
}

impl CompletionConfig {
    fn base(temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature,
            max_tokens,
            timeout: DEFAULT_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// One question against one document.
    pub fn document() -> Self {
        Self::base(0.3, 4096)
    }

    /// Every question of a row in one request.
    pub fn row_wise() -> Self {
        Self::base(0.3, 6144)
    }

    pub fn summary() -> Self {
        Self::base(0.4, 4096)
    }

    pub fn chat() -> Self {
        Self::base(0.5, 3072)
    }

    pub fn quick_analysis() -> Self {
        Self {
            retry_count: 2,
            retry_delay: Duration::from_millis(500),
            ..Self::base(0.2, 2048)
        }
    }

    pub fn large_documents() -> Self {
        Self::base(0.3, 8192)
    }

    pub fn technical_analysis() -> Self {
        Self::base(0.1, 6144)
    }

    pub fn creative_summary() -> Self {
        Self::base(0.6, 5120)
    }

    pub fn preset(name: &str) -> Result<Self, UnknownPreset> {
        match name.trim().to_lowercase().replace('-', "_").as_str() {
            "document" | "document_analysis" => Ok(Self::document()),
            "row_wise" => Ok(Self::row_wise()),
            "summary" => Ok(Self::summary()),
            "chat" => Ok(Self::chat()),
            "quick_analysis" => Ok(Self::quick_analysis()),
            "large_documents" => Ok(Self::large_documents()),
            "technical_analysis" => Ok(Self::technical_analysis()),
            "creative_summary" => Ok(Self::creative_summary()),
            _ => Err(UnknownPreset(name.to_string())),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.retry_count, self.retry_delay)
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_carry_expected_limits() {
        let row = CompletionConfig::row_wise();
        assert_eq!((row.temperature, row.max_tokens), (0.3, 6144));
        assert_eq!(row.timeout, Duration::from_secs(120));
        assert_eq!(row.backoff().max_attempts, 4);

        let quick = CompletionConfig::preset("quick-analysis").unwrap();
        assert_eq!((quick.temperature, quick.max_tokens, quick.retry_count), (0.2, 2048, 2));
        assert_eq!(quick.retry_delay, Duration::from_millis(500));

        assert_eq!(
            CompletionConfig::preset("turbo"),
            Err(UnknownPreset("turbo".to_string()))
        );
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let config = CompletionConfig::chat().with_model("local");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout"], 120.0);
        assert_eq!(json["retry_delay"], 1.0);
        let back: CompletionConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
