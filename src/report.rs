//! Findings, verdicts, and the terminal report synthesizer.
//!
//! The synthesizer reads the final context snapshot plus the full task
//! history, normalizes heterogeneous review artifacts into findings, and
//! computes a deterministic verdict: a pure function of the finding
//! multiset and the outcome history, never a free-form judgment. Missing
//! or failed analysis is named in `caveats` and can only move the verdict
//! toward stricter outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::context::{Artifact, ContextSnapshot};
use crate::outcome::TaskRecord;

/// Finding category used by the credential scanner. Any finding in this
/// category forces `REJECT` regardless of its severity.
pub const SECRET_LEAK_CATEGORY: &str = "secret-leak";

// ── Severity ─────────────────────────────────────────────────────

/// Severity of a review finding, ordered ascending so `Ord` comparisons
/// read naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Cosmetic nitpick.
    Nit,
    /// Worth fixing, never a blocker.
    Minor,
    /// Should be fixed before merge.
    Major,
    /// Must-fix: correctness, security, or data-loss risk.
    Critical,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Self::Nit => "NIT",
            Self::Minor => "MINOR",
            Self::Major => "MAJOR",
            Self::Critical => "CRITICAL",
        }
    }

    /// Map a reviewer-supplied severity string, tolerating the
    /// high/medium/low vocabulary some models fall back to.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Self::Critical,
            "major" | "high" => Self::Major,
            "minor" | "medium" => Self::Minor,
            _ => Self::Nit,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Finding ──────────────────────────────────────────────────────

/// A normalized, severity-tagged observation about the reviewed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    /// Source location, e.g. `src/lib.rs:10-20`. Empty when the finding
    /// applies to the whole change.
    #[serde(default)]
    pub location: Option<String>,
    /// Finding category (e.g. "correctness", "style", "secret-leak").
    pub category: String,
    pub message: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl Finding {
    fn sort_location(&self) -> &str {
        self.location.as_deref().unwrap_or("")
    }
}

// ── Verdict ──────────────────────────────────────────────────────

/// The pipeline's final deterministic decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    RequestChanges,
    Reject,
}

impl Verdict {
    pub fn label(self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::RequestChanges => "REQUEST_CHANGES",
            Self::Reject => "REJECT",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Caveat / Report ──────────────────────────────────────────────

/// Documents incomplete or failed analysis coverage. A run never silently
/// omits a section; every non-success outcome lands here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caveat {
    pub capability: String,
    pub reason: String,
}

/// The run's terminal artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub summary: String,
    /// Stable order: severity descending, then location ascending.
    pub findings: Vec<Finding>,
    pub verdict: Verdict,
    pub caveats: Vec<Caveat>,
}

impl Report {
    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Render the report as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str("# Code Review Report\n\n");
        md.push_str("## Overview\n");
        md.push_str(&format!("- **Verdict**: {}\n", self.verdict.label()));
        md.push_str(&format!("- **Findings**: {}\n", self.findings.len()));
        md.push_str(&format!("- **Run**: `{}`\n", self.run_id));
        md.push_str(&format!(
            "- **Generated**: {}\n\n",
            self.generated_at.to_rfc3339()
        ));
        md.push_str(&format!("{}\n", self.summary));

        let secret_leaks: Vec<&Finding> = self
            .findings
            .iter()
            .filter(|f| f.category == SECRET_LEAK_CATEGORY)
            .collect();
        md.push_str("\n## Security Summary\n");
        if secret_leaks.is_empty() {
            md.push_str("- Credential scan: no leaked secrets detected.\n");
        } else {
            for f in &secret_leaks {
                md.push_str(&format!("- [{}] {}\n", f.severity.label(), f.message));
            }
        }

        let mut section = |title: &str, pred: &dyn Fn(&Finding) -> bool| {
            let matched: Vec<&Finding> = self.findings.iter().filter(|f| pred(f)).collect();
            if matched.is_empty() {
                return;
            }
            md.push_str(&format!("\n## {title}\n"));
            for f in matched {
                let location = f
                    .location
                    .as_deref()
                    .map(|l| format!(" (`{l}`)"))
                    .unwrap_or_default();
                md.push_str(&format!("- **{}**: {}{}\n", f.category, f.message, location));
                if let Some(ref s) = f.suggestion {
                    md.push_str(&format!("  - Suggestion: {s}\n"));
                }
            }
        };
        section("Critical Issues (Must Fix)", &|f| {
            f.severity == Severity::Critical
        });
        section("Warnings (Should Fix)", &|f| f.severity == Severity::Major);
        section("Suggestions (Nice to Have)", &|f| {
            matches!(f.severity, Severity::Minor | Severity::Nit)
        });

        if !self.caveats.is_empty() {
            md.push_str("\n## Incomplete Coverage\n");
            for c in &self.caveats {
                md.push_str(&format!("- `{}`: {}\n", c.capability, c.reason));
            }
        }

        md
    }
}

// ── Raw payload shapes ───────────────────────────────────────────

/// Structured payload a reviewer capability stores under its output key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewPayload {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<RawFinding>,
}

/// One reviewer-emitted finding before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFinding {
    pub severity: String,
    pub category: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub line_range: Option<(u32, u32)>,
    pub description: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl RawFinding {
    fn normalize(self) -> Finding {
        let location = match (self.file_path, self.line_range) {
            (Some(path), Some((start, end))) => Some(format!("{path}:{start}-{end}")),
            (Some(path), None) => Some(path),
            _ => None,
        };
        Finding {
            severity: Severity::parse(&self.severity),
            location,
            category: self.category,
            message: self.description,
            suggestion: self.suggestion,
        }
    }
}

/// Credential scan payload shape (see [`crate::secrets`]).
#[derive(Debug, Deserialize)]
struct SecretScanPayload {
    #[serde(default)]
    findings: Vec<SecretScanEntry>,
}

#[derive(Debug, Deserialize)]
struct SecretScanEntry {
    pattern: String,
    occurrences: usize,
    severity: String,
}

// ── Report synthesizer ───────────────────────────────────────────

/// Terminal-phase consumer: normalizes review artifacts into findings and
/// computes the deterministic verdict.
#[derive(Debug, Default, Clone)]
pub struct ReportSynthesizer {
    review_keys: Vec<String>,
    secret_scan_key: Option<String>,
}

impl ReportSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact key holding a [`ReviewPayload`].
    pub fn review_key(mut self, key: impl Into<String>) -> Self {
        self.review_keys.push(key.into());
        self
    }

    /// Register the credential-scan artifact key.
    pub fn secret_scan_key(mut self, key: impl Into<String>) -> Self {
        self.secret_scan_key = Some(key.into());
        self
    }

    /// Build the report from the final snapshot and the full outcome
    /// history.
    pub fn synthesize(
        &self,
        run_id: &str,
        snapshot: &ContextSnapshot,
        history: &[TaskRecord],
    ) -> Report {
        let mut findings: Vec<Finding> = Vec::new();
        let mut caveats: Vec<Caveat> = Vec::new();
        // Capabilities whose artifact could not be normalized; treated as
        // failed for verdict purposes.
        let mut aggregation_failed: HashSet<String> = HashSet::new();

        for record in history {
            if let Some(reason) = record.outcome.caveat_reason() {
                caveats.push(Caveat {
                    capability: record.capability.clone(),
                    reason,
                });
            }
        }

        for key in &self.review_keys {
            let Ok(artifact) = snapshot.get(key) else {
                // Producer did not complete; already covered by a caveat.
                continue;
            };
            match normalize_review(artifact) {
                Ok(mut normalized) => findings.append(&mut normalized),
                Err(err) => {
                    let capability = producer_of(history, key);
                    tracing::warn!(
                        key,
                        capability = capability.as_str(),
                        error = %err,
                        "Review artifact could not be normalized"
                    );
                    aggregation_failed.insert(capability.clone());
                    caveats.push(Caveat {
                        capability,
                        reason: format!("artifact `{key}` could not be normalized: {err}"),
                    });
                }
            }
        }

        if let Some(key) = &self.secret_scan_key {
            if let Ok(artifact) = snapshot.get(key) {
                match normalize_secret_scan(artifact) {
                    Ok(mut normalized) => findings.append(&mut normalized),
                    Err(err) => {
                        let capability = producer_of(history, key);
                        tracing::warn!(
                            key,
                            capability = capability.as_str(),
                            error = %err,
                            "Credential scan artifact could not be normalized"
                        );
                        aggregation_failed.insert(capability.clone());
                        caveats.push(Caveat {
                            capability,
                            reason: format!("artifact `{key}` could not be normalized: {err}"),
                        });
                    }
                }
            }
        }

        // Stable report order; ties within a severity break by location
        // ascending and never affect the verdict.
        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.sort_location().cmp(b.sort_location()))
        });

        let verdict = compute_verdict(&findings, history, &aggregation_failed);
        let summary = build_summary(&findings, &caveats, verdict);

        tracing::info!(
            run_id,
            verdict = verdict.label(),
            findings = findings.len(),
            caveats = caveats.len(),
            "Report synthesized"
        );

        Report {
            run_id: run_id.to_string(),
            generated_at: Utc::now(),
            summary,
            findings,
            verdict,
            caveats,
        }
    }
}

/// Name of the capability that declared `output_key`, per the history.
fn producer_of(history: &[TaskRecord], output_key: &str) -> String {
    history
        .iter()
        .find(|r| r.output_key == output_key)
        .map(|r| r.capability.clone())
        .unwrap_or_else(|| format!("<producer of {output_key}>"))
}

fn normalize_review(artifact: &Artifact) -> anyhow::Result<Vec<Finding>> {
    let value = artifact
        .as_json()
        .ok_or_else(|| anyhow::anyhow!("expected structured review payload, found text"))?;
    let payload: ReviewPayload = serde_json::from_value(value.clone())?;
    Ok(payload
        .findings
        .into_iter()
        .map(RawFinding::normalize)
        .collect())
}

fn normalize_secret_scan(artifact: &Artifact) -> anyhow::Result<Vec<Finding>> {
    let value = artifact
        .as_json()
        .ok_or_else(|| anyhow::anyhow!("expected structured scan payload, found text"))?;
    let payload: SecretScanPayload = serde_json::from_value(value.clone())?;
    Ok(payload
        .findings
        .into_iter()
        .map(|entry| Finding {
            // The scanner only reports pattern classes and counts, never
            // the matched secret itself.
            severity: match entry.severity.as_str() {
                "HIGH" => Severity::Critical,
                _ => Severity::Major,
            },
            location: None,
            category: SECRET_LEAK_CATEGORY.to_string(),
            message: format!(
                "{} potential {} exposure(s) in the diff",
                entry.occurrences, entry.pattern
            ),
            suggestion: Some("Rotate the credential and purge it from history".to_string()),
        })
        .collect())
}

/// The deterministic verdict rule. Exact order: critical or leaked secret
/// > major or incomplete mandatory coverage > clean.
fn compute_verdict(
    findings: &[Finding],
    history: &[TaskRecord],
    aggregation_failed: &HashSet<String>,
) -> Verdict {
    let any_critical = findings.iter().any(|f| f.severity == Severity::Critical);
    let any_secret_leak = findings.iter().any(|f| f.category == SECRET_LEAK_CATEGORY);
    if any_critical || any_secret_leak {
        return Verdict::Reject;
    }

    let any_major = findings.iter().any(|f| f.severity == Severity::Major);
    // Unknown risk is never treated as clean: a mandatory capability that
    // did not complete (or whose artifact failed normalization) blocks
    // approval.
    let mandatory_incomplete = history.iter().any(|r| {
        r.mandatory && (!r.outcome.is_success() || aggregation_failed.contains(&r.capability))
    });
    if any_major || mandatory_incomplete {
        return Verdict::RequestChanges;
    }

    Verdict::Approve
}

fn build_summary(findings: &[Finding], caveats: &[Caveat], verdict: Verdict) -> String {
    let count = |s: Severity| findings.iter().filter(|f| f.severity == s).count();
    format!(
        "{} finding(s): {} critical, {} major, {} minor, {} nit; {} caveat(s). Verdict: {}.",
        findings.len(),
        count(Severity::Critical),
        count(Severity::Major),
        count(Severity::Minor),
        count(Severity::Nit),
        caveats.len(),
        verdict.label(),
    )
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::outcome::{FailureKind, TaskOutcome};
    use serde_json::json;

    fn finding(severity: Severity, category: &str, location: Option<&str>) -> Finding {
        Finding {
            severity,
            location: location.map(String::from),
            category: category.into(),
            message: format!("{category} issue"),
            suggestion: None,
        }
    }

    fn record(capability: &str, output_key: &str, outcome: TaskOutcome) -> TaskRecord {
        TaskRecord {
            capability: capability.into(),
            output_key: output_key.into(),
            mandatory: true,
            phase: 0,
            outcome,
            attempts: 1,
            elapsed_ms: 5,
        }
    }

    fn success(capability: &str, output_key: &str) -> TaskRecord {
        record(
            capability,
            output_key,
            TaskOutcome::Success(Artifact::Text("ok".into())),
        )
    }

    #[test]
    fn severity_ordering_and_parse() {
        assert!(Severity::Critical > Severity::Major);
        assert!(Severity::Major > Severity::Minor);
        assert!(Severity::Minor > Severity::Nit);
        assert_eq!(Severity::parse("critical"), Severity::Critical);
        assert_eq!(Severity::parse("HIGH"), Severity::Major);
        assert_eq!(Severity::parse("medium"), Severity::Minor);
        assert_eq!(Severity::parse("whatever"), Severity::Nit);
    }

    #[test]
    fn verdict_single_critical_rejects() {
        let findings = vec![finding(Severity::Critical, "correctness", None)];
        assert_eq!(
            compute_verdict(&findings, &[], &HashSet::new()),
            Verdict::Reject
        );
    }

    #[test]
    fn verdict_secret_leak_rejects_even_at_major_severity() {
        let findings = vec![finding(Severity::Major, SECRET_LEAK_CATEGORY, None)];
        assert_eq!(
            compute_verdict(&findings, &[], &HashSet::new()),
            Verdict::Reject
        );
    }

    #[test]
    fn verdict_major_requests_changes() {
        let findings = vec![finding(Severity::Major, "correctness", None)];
        let history = vec![success("logic-reviewer", "logic_review")];
        assert_eq!(
            compute_verdict(&findings, &history, &HashSet::new()),
            Verdict::RequestChanges
        );
    }

    #[test]
    fn verdict_minor_and_nit_approve() {
        let findings = vec![
            finding(Severity::Minor, "style", None),
            finding(Severity::Minor, "style", None),
            finding(Severity::Minor, "naming", None),
            finding(Severity::Nit, "style", None),
            finding(Severity::Nit, "docs", None),
        ];
        let history = vec![success("style-checker", "style_review")];
        assert_eq!(
            compute_verdict(&findings, &history, &HashSet::new()),
            Verdict::Approve
        );
    }

    #[test]
    fn verdict_timed_out_mandatory_blocks_approval() {
        // No findings at all, but the credential scanner never finished.
        let history = vec![record("secret-scanner", "secret_scan", TaskOutcome::TimedOut)];
        assert_eq!(
            compute_verdict(&[], &history, &HashSet::new()),
            Verdict::RequestChanges
        );
    }

    #[test]
    fn verdict_optional_failure_still_approves() {
        let mut rec = record(
            "style-checker",
            "style_review",
            TaskOutcome::Failed {
                kind: FailureKind::Execution,
                message: "api error".into(),
            },
        );
        rec.mandatory = false;
        assert_eq!(compute_verdict(&[], &[rec], &HashSet::new()), Verdict::Approve);
    }

    #[test]
    fn verdict_aggregation_failure_blocks_approval() {
        let history = vec![success("logic-reviewer", "logic_review")];
        let failed: HashSet<String> = ["logic-reviewer".to_string()].into();
        assert_eq!(
            compute_verdict(&[], &history, &failed),
            Verdict::RequestChanges
        );
    }

    #[test]
    fn findings_sorted_by_severity_then_location() {
        let ctx = ExecutionContext::new();
        ctx.set(
            "logic_review",
            Artifact::Json(json!({
                "summary": "issues",
                "findings": [
                    {"severity": "minor", "category": "style", "file_path": "b.rs", "description": "b"},
                    {"severity": "critical", "category": "correctness", "file_path": "z.rs", "description": "z"},
                    {"severity": "minor", "category": "style", "file_path": "a.rs", "description": "a"},
                ]
            })),
        )
        .unwrap();

        let synth = ReportSynthesizer::new().review_key("logic_review");
        let history = vec![success("logic-reviewer", "logic_review")];
        let report = synth.synthesize("run-1", &ctx.snapshot(), &history);

        assert_eq!(report.findings[0].severity, Severity::Critical);
        assert_eq!(report.findings[1].location.as_deref(), Some("a.rs"));
        assert_eq!(report.findings[2].location.as_deref(), Some("b.rs"));
        assert_eq!(report.verdict, Verdict::Reject);
    }

    #[test]
    fn unparseable_artifact_becomes_caveat_and_blocks_approval() {
        let ctx = ExecutionContext::new();
        ctx.set("logic_review", Artifact::Text("not structured".into()))
            .unwrap();

        let synth = ReportSynthesizer::new().review_key("logic_review");
        let history = vec![success("logic-reviewer", "logic_review")];
        let report = synth.synthesize("run-1", &ctx.snapshot(), &history);

        assert_eq!(report.verdict, Verdict::RequestChanges);
        assert_eq!(report.caveats.len(), 1);
        assert_eq!(report.caveats[0].capability, "logic-reviewer");
        assert!(report.caveats[0].reason.contains("could not be normalized"));
    }

    #[test]
    fn secret_scan_findings_reject_and_never_include_the_secret() {
        let ctx = ExecutionContext::new();
        ctx.set(
            "secret_scan",
            Artifact::Json(json!({
                "risk_level": "HIGH",
                "findings": [
                    {"pattern": "AWS Access Key", "occurrences": 2, "severity": "HIGH"},
                    {"pattern": "Password Assignment", "occurrences": 1, "severity": "MEDIUM"},
                ]
            })),
        )
        .unwrap();

        let synth = ReportSynthesizer::new().secret_scan_key("secret_scan");
        let history = vec![success("secret-scanner", "secret_scan")];
        let report = synth.synthesize("run-1", &ctx.snapshot(), &history);

        assert_eq!(report.verdict, Verdict::Reject);
        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.findings[0].severity, Severity::Critical);
        assert_eq!(report.findings[0].category, SECRET_LEAK_CATEGORY);
        assert!(report.findings[0].message.contains("AWS Access Key"));
        assert_eq!(report.findings[1].severity, Severity::Major);
    }

    #[test]
    fn non_success_outcomes_become_caveats() {
        let history = vec![
            success("diff-fetcher", "diff_data"),
            record(
                "commit-reader",
                "commit_summary",
                TaskOutcome::Failed {
                    kind: FailureKind::Execution,
                    message: "git exited 128".into(),
                },
            ),
            record("secret-scanner", "secret_scan", TaskOutcome::TimedOut),
        ];

        let synth = ReportSynthesizer::new();
        let report = synth.synthesize("run-1", &ExecutionContext::new().snapshot(), &history);

        assert_eq!(report.caveats.len(), 2);
        assert!(report
            .caveats
            .iter()
            .any(|c| c.capability == "commit-reader" && c.reason.contains("git exited 128")));
        assert!(report
            .caveats
            .iter()
            .any(|c| c.capability == "secret-scanner" && c.reason.contains("timed out")));
    }

    #[test]
    fn raw_finding_location_formats() {
        let with_range = RawFinding {
            severity: "major".into(),
            category: "correctness".into(),
            file_path: Some("src/lib.rs".into()),
            line_range: Some((10, 20)),
            description: "off-by-one".into(),
            suggestion: None,
        };
        assert_eq!(
            with_range.normalize().location.as_deref(),
            Some("src/lib.rs:10-20")
        );

        let file_only = RawFinding {
            severity: "minor".into(),
            category: "style".into(),
            file_path: Some("src/lib.rs".into()),
            line_range: None,
            description: "long function".into(),
            suggestion: None,
        };
        assert_eq!(file_only.normalize().location.as_deref(), Some("src/lib.rs"));
    }

    #[test]
    fn markdown_report_has_expected_sections() {
        let report = Report {
            run_id: "run-42".into(),
            generated_at: Utc::now(),
            summary: "2 finding(s)".into(),
            findings: vec![
                finding(Severity::Critical, "security", Some("src/db.rs")),
                finding(Severity::Minor, "style", None),
            ],
            verdict: Verdict::Reject,
            caveats: vec![Caveat {
                capability: "commit-reader".into(),
                reason: "timed out".into(),
            }],
        };

        let md = report.to_markdown();
        assert!(md.contains("REJECT"));
        assert!(md.contains("Critical Issues"));
        assert!(md.contains("Suggestions"));
        assert!(md.contains("Incomplete Coverage"));
        assert!(md.contains("commit-reader"));
        assert!(md.contains("src/db.rs"));
    }

    #[test]
    fn summary_is_deterministic() {
        let findings = vec![
            finding(Severity::Major, "correctness", None),
            finding(Severity::Nit, "style", None),
        ];
        let summary = build_summary(&findings, &[], Verdict::RequestChanges);
        assert_eq!(
            summary,
            "2 finding(s): 0 critical, 1 major, 0 minor, 1 nit; 0 caveat(s). \
             Verdict: REQUEST_CHANGES."
        );
    }
}
