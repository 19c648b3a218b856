//! Standard code-review pipeline assembly.
//!
//! Wires the built-in capabilities into the canonical two-phase layout:
//! a gather phase (diff, commit history, credential scan) followed by a
//! review phase (logic, style, security), with a synthesizer registered
//! for every review artifact.

use std::sync::Arc;
use std::time::Duration;

use crate::capability::gather::{CommitReader, DiffFetcher, SecretScanner};
use crate::capability::review::LlmReviewer;
use crate::capability::{keys, RetryPolicy};
use crate::error::PipelineError;
use crate::pipeline::{PhaseGroup, Pipeline};
use crate::reasoning::{GeminiClient, ReasoningService};
use crate::report::ReportSynthesizer;
use crate::vcs::{GitCli, VersionControl};

const DEFAULT_MODEL: &str = "gemini-2.0-flash";

// ── Configuration ────────────────────────────────────────────────

/// Knobs for the standard pipeline. `ReviewConfig::new` reads the API
/// key from `GEMINI_API_KEY`; everything else has working defaults.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub repo_dir: String,
    pub model: String,
    pub api_key: Option<String>,
    pub gather_timeout: Duration,
    pub review_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ReviewConfig {
    pub fn new(repo_dir: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            model: DEFAULT_MODEL.to_string(),
            api_key: std::env::var("GEMINI_API_KEY").ok(),
            gather_timeout: Duration::from_secs(30),
            review_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

// ── Assembly ─────────────────────────────────────────────────────

/// Build the standard pipeline against real git and Gemini backends.
pub fn standard_pipeline(config: &ReviewConfig) -> Result<Pipeline, PipelineError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        PipelineError::Configuration(
            "no Gemini API key: set GEMINI_API_KEY or call with_api_key".into(),
        )
    })?;
    let vcs: Arc<dyn VersionControl> = Arc::new(GitCli::new(&config.repo_dir));
    let service: Arc<dyn ReasoningService> =
        Arc::new(GeminiClient::new(api_key, config.model.clone()));
    assemble(config, vcs, service)
}

/// Build the standard pipeline against caller-supplied backends. Used by
/// tests and by embedders with their own VCS or reasoning integrations.
pub fn assemble(
    config: &ReviewConfig,
    vcs: Arc<dyn VersionControl>,
    service: Arc<dyn ReasoningService>,
) -> Result<Pipeline, PipelineError> {
    Pipeline::builder()
        .seed_key(keys::BASE_REF)
        .seed_key(keys::HEAD_REF)
        .phase(
            PhaseGroup::new("gather")
                .with(Arc::new(
                    DiffFetcher::new(vcs.clone())
                        .with_policy(config.gather_timeout, config.retry),
                ))
                .with(Arc::new(
                    CommitReader::new(vcs.clone())
                        .with_policy(config.gather_timeout, config.retry),
                ))
                .with(Arc::new(
                    SecretScanner::new(vcs)
                        .with_policy(config.gather_timeout, config.retry),
                )),
        )
        .phase(
            PhaseGroup::new("review")
                .with(Arc::new(
                    LlmReviewer::logic(service.clone())
                        .with_policy(config.review_timeout, config.retry),
                ))
                .with(Arc::new(
                    LlmReviewer::style(service.clone())
                        .with_policy(config.review_timeout, config.retry),
                ))
                .with(Arc::new(
                    LlmReviewer::security(service)
                        .with_policy(config.review_timeout, config.retry),
                )),
        )
        .build()
}

/// Synthesizer matching [`standard_pipeline`]'s artifact keys.
pub fn standard_synthesizer() -> ReportSynthesizer {
    ReportSynthesizer::new()
        .review_key(keys::LOGIC_REVIEW)
        .review_key(keys::STYLE_REVIEW)
        .review_key(keys::SECURITY_REVIEW)
        .secret_scan_key(keys::SECRET_SCAN)
}

// ── Tests ────────────────────────────────────────────────────────
