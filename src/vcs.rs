//! Version-control collaborator.
//!
//! The pipeline only needs two queries against the repository under
//! review: the diff between two revisions and the commit log between
//! them. [`VersionControl`] is the seam; [`GitCli`] is the production
//! implementation shelling out to `git`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

// ── Data shapes ──────────────────────────────────────────────────

/// One changed file with its git status letter (A/M/D/R…).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub status: String,
    pub path: String,
}

/// Diff between two revisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffData {
    /// Unified diff text.
    pub diff: String,
    pub files: Vec<ChangedFile>,
    /// `git diff --stat` summary line(s).
    pub stats: String,
}

/// One commit in the range under review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Abbreviated hash (8 chars).
    pub hash: String,
    pub author: String,
    /// Short date (YYYY-MM-DD).
    pub date: String,
    pub subject: String,
}

// ── Trait seam ───────────────────────────────────────────────────

/// Query service for the repository under review.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Diff of `head` relative to the merge base with `base`
    /// (three-dot semantics).
    async fn diff(&self, base: &str, head: &str) -> anyhow::Result<DiffData>;

    /// Commits reachable from `head` but not `base`.
    async fn commits(&self, base: &str, head: &str) -> anyhow::Result<Vec<Commit>>;
}

// ── Git CLI implementation ───────────────────────────────────────

/// Production [`VersionControl`] backed by the `git` binary.
pub struct GitCli {
    repo_dir: PathBuf,
    command_timeout: Duration,
}

impl GitCli {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            command_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn run_git(&self, args: &[&str]) -> anyhow::Result<String> {
        let child = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = tokio::time::timeout(self.command_timeout, child)
            .await
            .map_err(|_| anyhow::anyhow!("git {} timed out", args.join(" ")))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn diff(&self, base: &str, head: &str) -> anyhow::Result<DiffData> {
        let range = format!("{base}...{head}");
        let diff = self.run_git(&["diff", &range]).await?;
        let name_status = self.run_git(&["diff", "--name-status", &range]).await?;
        let stats = self.run_git(&["diff", "--stat", &range]).await?;

        Ok(DiffData {
            diff,
            files: parse_name_status(&name_status),
            stats: stats.trim().to_string(),
        })
    }

    async fn commits(&self, base: &str, head: &str) -> anyhow::Result<Vec<Commit>> {
        let range = format!("{base}..{head}");
        let log = self
            .run_git(&[
                "log",
                &range,
                "--pretty=format:%H|%an|%ad|%s",
                "--date=short",
            ])
            .await?;
        Ok(log.lines().filter_map(parse_log_line).collect())
    }
}

// ── Output parsing ───────────────────────────────────────────────

fn parse_name_status(output: &str) -> Vec<ChangedFile> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (status, path) = line.split_once('\t')?;
            Some(ChangedFile {
                status: status.trim().to_string(),
                path: path.trim().to_string(),
            })
        })
        .collect()
}

fn parse_log_line(line: &str) -> Option<Commit> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut parts = line.splitn(4, '|');
    let hash = parts.next()?;
    let author = parts.next()?;
    let date = parts.next()?;
    let subject = parts.next()?;
    Some(Commit {
        hash: hash.chars().take(8).collect(),
        author: author.to_string(),
        date: date.to_string(),
        subject: subject.to_string(),
    })
}

// ── Tests ────────────────────────────────────────────────────────
