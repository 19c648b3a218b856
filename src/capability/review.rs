//! Phase-2 capabilities: specialist reviewers backed by the reasoning
//! service.
//!
//! One struct, three focuses. Each reviewer builds a focused prompt from
//! the phase-1 artifacts, asks the reasoning service for a strict-JSON
//! review, and stores the parsed payload as its artifact. Parsing
//! failures fail the attempt so the retry policy gets another shot at
//! well-formed output; silently storing an empty review would drop
//! findings.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{keys, prompt_input, Capability, Inputs, RetryPolicy};
use crate::context::Artifact;
use crate::reasoning::ReasoningService;
use crate::report::ReviewPayload;

const REVIEW_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared response-format contract appended to every reviewer prompt.
const RESPONSE_FORMAT: &str = r#"Respond in EXACTLY this JSON format, with no prose outside it:
{
  "summary": "one-line summary of the review",
  "findings": [
    {
      "severity": "critical" | "major" | "minor" | "nit",
      "category": "short category label",
      "file_path": "path/to/file or null",
      "line_range": [start, end] or null,
      "description": "what the issue is",
      "suggestion": "how to fix it or null"
    }
  ]
}
If no issues are found, return an empty findings array."#;

// ── Reviewer focus ───────────────────────────────────────────────

/// Which review focus an [`LlmReviewer`] instance carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewerFocus {
    /// Correctness, edge cases, performance, concurrency, error handling.
    Logic,
    /// Naming, structure, documentation, duplication, readability.
    Style,
    /// Injection, access control, data exposure, input validation.
    Security,
}

impl ReviewerFocus {
    fn name(self) -> &'static str {
        match self {
            Self::Logic => "logic-reviewer",
            Self::Style => "style-checker",
            Self::Security => "security-auditor",
        }
    }

    fn produces(self) -> &'static str {
        match self {
            Self::Logic => keys::LOGIC_REVIEW,
            Self::Style => keys::STYLE_REVIEW,
            Self::Security => keys::SECURITY_REVIEW,
        }
    }

    fn requires(self) -> Vec<String> {
        match self {
            Self::Logic => vec![keys::DIFF_DATA.into(), keys::COMMIT_SUMMARY.into()],
            Self::Style => vec![keys::DIFF_DATA.into()],
            Self::Security => vec![keys::DIFF_DATA.into(), keys::SECRET_SCAN.into()],
        }
    }

    /// Style feedback is advisory; its absence never blocks approval.
    fn mandatory(self) -> bool {
        !matches!(self, Self::Style)
    }
}

// ── LLM reviewer ─────────────────────────────────────────────────

/// A specialist reviewer capability with a fixed focus.
pub struct LlmReviewer {
    focus: ReviewerFocus,
    service: Arc<dyn ReasoningService>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl LlmReviewer {
    pub fn logic(service: Arc<dyn ReasoningService>) -> Self {
        Self::with_focus(ReviewerFocus::Logic, service)
    }

    pub fn style(service: Arc<dyn ReasoningService>) -> Self {
        Self::with_focus(ReviewerFocus::Style, service)
    }

    pub fn security(service: Arc<dyn ReasoningService>) -> Self {
        Self::with_focus(ReviewerFocus::Security, service)
    }

    pub fn with_focus(focus: ReviewerFocus, service: Arc<dyn ReasoningService>) -> Self {
        Self {
            focus,
            service,
            timeout: REVIEW_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, timeout: Duration, retry: RetryPolicy) -> Self {
        self.timeout = timeout;
        self.retry = retry;
        self
    }

    fn build_prompt(&self, inputs: &Inputs) -> anyhow::Result<String> {
        let diff = prompt_input(inputs, keys::DIFF_DATA)?;
        let body = match self.focus {
            ReviewerFocus::Logic => {
                let commits = prompt_input(inputs, keys::COMMIT_SUMMARY)?;
                format!(
                    "You are a senior software engineer performing a logic review.\n\n\
                     Review the diff for:\n\
                     1. Correctness: logic errors, off-by-one errors, null handling\n\
                     2. Edge cases: unhandled error conditions, boundary values, empty inputs\n\
                     3. Performance: N+1 queries, unnecessary loops, memory leaks, blocking calls\n\
                     4. Concurrency: race conditions, deadlocks, thread safety\n\
                     5. Error handling: swallowed errors, missing propagation\n\
                     6. Testing: whether the change includes tests, coverage gaps\n\n\
                     ## Diff Data\n{diff}\n\n\
                     ## Context From Commits\n{commits}"
                )
            }
            ReviewerFocus::Style => {
                format!(
                    "You are a code style and readability reviewer.\n\n\
                     Review the diff for:\n\
                     1. Naming: clear, descriptive, consistent conventions\n\
                     2. Structure: function length, nesting depth, single responsibility\n\
                     3. Documentation: missing or outdated comments, unclear sections\n\
                     4. Duplication: copy-pasted code, missed abstractions\n\
                     5. Readability: complex expressions, magic numbers\n\n\
                     Prioritize actionable suggestions over nitpicks.\n\n\
                     ## Diff Data\n{diff}"
                )
            }
            ReviewerFocus::Security => {
                let scan = prompt_input(inputs, keys::SECRET_SCAN)?;
                format!(
                    "You are a security auditor reviewing code changes.\n\n\
                     Review the diff for:\n\
                     1. Injection: SQL injection, command injection, XSS, template injection\n\
                     2. Access control: missing auth checks, broken authorization\n\
                     3. Data exposure: sensitive data in logs, responses, error messages\n\
                     4. Input validation: unsanitized user input\n\
                     5. Configuration: hardcoded credentials, insecure defaults, debug mode\n\n\
                     ## Diff Data\n{diff}\n\n\
                     ## Credential Scan Results\n{scan}"
                )
            }
        };
        Ok(format!("{body}\n\n## Output Contract\n{RESPONSE_FORMAT}"))
    }
}

#[async_trait]
impl Capability for LlmReviewer {
    fn name(&self) -> &str {
        self.focus.name()
    }

    fn requires(&self) -> Vec<String> {
        self.focus.requires()
    }

    fn produces(&self) -> &str {
        self.focus.produces()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn retry(&self) -> RetryPolicy {
        self.retry
    }

    fn mandatory(&self) -> bool {
        self.focus.mandatory()
    }

    async fn execute(
        &self,
        inputs: &Inputs,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Artifact> {
        let prompt = self.build_prompt(inputs)?;

        let response = tokio::select! {
            res = self.service.complete(&prompt) => res?,
            _ = cancel.cancelled() => anyhow::bail!("review cancelled"),
        };

        let payload = parse_review_response(&response)?;
        tracing::info!(
            reviewer = self.name(),
            model = self.service.model(),
            findings = payload.findings.len(),
            "Review completed"
        );
        Ok(Artifact::Json(serde_json::to_value(payload)?))
    }
}

/// Parse a reviewer response, tolerating markdown code fences around the
/// JSON body.
fn parse_review_response(text: &str) -> anyhow::Result<ReviewPayload> {
    let json = extract_json_block(text);
    serde_json::from_str(json)
        .map_err(|e| anyhow::anyhow!("reviewer returned malformed JSON: {e}"))
}

/// Extract JSON content from a response that may be wrapped in ``` blocks.
fn extract_json_block(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let body = &text[start + 7..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }
    if let Some(start) = text.find("```") {
        let body = &text[start + 3..];
        if let Some(end) = body.find("```") {
            let candidate = body[..end].trim();
            // Drop a language identifier line if present.
            if let Some(nl) = candidate.find('\n') {
                if !candidate[..nl].trim_start().starts_with('{') {
                    return candidate[nl + 1..].trim();
                }
            }
            return candidate;
        }
    }
    text.trim()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct CannedService {
        response: String,
    }

    impl CannedService {
        fn new(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: response.to_string(),
            })
        }
    }

    #[async_trait]
    impl ReasoningService for CannedService {
        fn model(&self) -> &str {
            "canned-model"
        }

        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.response.clone())
        }
    }

    fn review_inputs() -> Inputs {
        Inputs::from([
            (
                keys::DIFF_DATA.to_string(),
                Artifact::Json(json!({"diff": "+fn main() {}", "file_count": 1})),
            ),
            (
                keys::COMMIT_SUMMARY.to_string(),
                Artifact::Json(json!({"commit_count": 1})),
            ),
            (
                keys::SECRET_SCAN.to_string(),
                Artifact::Json(json!({"risk_level": "CLEAN", "findings": []})),
            ),
        ])
    }

    #[test]
    fn focus_wiring() {
        assert_eq!(ReviewerFocus::Logic.name(), "logic-reviewer");
        assert_eq!(ReviewerFocus::Security.produces(), keys::SECURITY_REVIEW);
        assert!(ReviewerFocus::Logic.mandatory());
        assert!(ReviewerFocus::Security.mandatory());
        assert!(!ReviewerFocus::Style.mandatory());
        assert!(ReviewerFocus::Security
            .requires()
            .contains(&keys::SECRET_SCAN.to_string()));
    }

    #[test]
    fn logic_prompt_includes_diff_and_commits() {
        let reviewer = LlmReviewer::logic(CannedService::new("{}"));
        let prompt = reviewer.build_prompt(&review_inputs()).unwrap();
        assert!(prompt.contains("+fn main() {}"));
        assert!(prompt.contains("commit_count"));
        assert!(prompt.contains("EXACTLY this JSON format"));
    }

    #[test]
    fn security_prompt_includes_scan_results() {
        let reviewer = LlmReviewer::security(CannedService::new("{}"));
        let prompt = reviewer.build_prompt(&review_inputs()).unwrap();
        assert!(prompt.contains("CLEAN"));
        assert!(prompt.contains("security auditor"));
    }

    #[tokio::test]
    async fn well_formed_response_becomes_artifact() {
        let response = r#"{"summary": "one issue", "findings": [
            {"severity": "major", "category": "correctness",
             "file_path": "src/lib.rs", "line_range": [3, 9],
             "description": "off-by-one in loop bound", "suggestion": null}
        ]}"#;
        let reviewer = LlmReviewer::logic(CannedService::new(response));
        let artifact = reviewer
            .execute(&review_inputs(), &CancellationToken::new())
            .await
            .unwrap();

        let payload: ReviewPayload =
            serde_json::from_value(artifact.as_json().unwrap().clone()).unwrap();
        assert_eq!(payload.summary, "one issue");
        assert_eq!(payload.findings.len(), 1);
        assert_eq!(payload.findings[0].severity, "major");
    }

    #[tokio::test]
    async fn fenced_response_is_unwrapped() {
        let response = "Here is my review:\n```json\n{\"summary\": \"clean\", \"findings\": []}\n```";
        let reviewer = LlmReviewer::style(CannedService::new(response));
        let artifact = reviewer
            .execute(&review_inputs(), &CancellationToken::new())
            .await
            .unwrap();
        let payload: ReviewPayload =
            serde_json::from_value(artifact.as_json().unwrap().clone()).unwrap();
        assert!(payload.findings.is_empty());
    }

    #[tokio::test]
    async fn malformed_response_fails_the_attempt() {
        let reviewer = LlmReviewer::logic(CannedService::new("I could not review this."));
        let err = reviewer
            .execute(&review_inputs(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("malformed JSON"));
    }

    #[test]
    fn extract_json_block_variants() {
        assert_eq!(extract_json_block("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(
            extract_json_block("```json\n{\"a\": 1}\n```"),
            "{\"a\": 1}"
        );
        assert_eq!(extract_json_block("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(
            extract_json_block("```text\n{\"a\": 1}\n```"),
            "{\"a\": 1}"
        );
    }
}
