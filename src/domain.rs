use std::{collections::HashMap, fmt};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

// Domain data structures shared across modules.

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct User {
    pub username: String,
    pub avatar_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub branches: Vec<Branch>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Branch {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub commit: CommitDetail,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CommitDetail {
    pub message: String,
    pub author: CommitAuthor,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub date: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanFinding {
    pub file: String,
    pub reason: String,
}

/// Scan findings keyed by commit sha.
///
/// A sha with no entry has not been scanned yet; a sha mapped to an empty
/// list was scanned and came back clean.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanResults {
    by_sha: HashMap<String, Vec<ScanFinding>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanStatus<'a> {
    NotScanned,
    Scanned(&'a [ScanFinding]),
}

impl ScanStatus<'_> {
    pub fn label(&self) -> String {
        match self {
            ScanStatus::NotScanned => "Run scan...".to_owned(),
            ScanStatus::Scanned(findings) => findings.len().to_string(),
        }
    }
}

impl ScanResults {
    pub fn status(&self, sha: &str) -> ScanStatus<'_> {
        match self.by_sha.get(sha) {
            Some(findings) => ScanStatus::Scanned(findings),
            None => ScanStatus::NotScanned,
        }
    }
}

impl FromIterator<(String, Vec<ScanFinding>)> for ScanResults {
    fn from_iter<I: IntoIterator<Item = (String, Vec<ScanFinding>)>>(iter: I) -> Self {
        Self {
            by_sha: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitListing {
    pub commits: Vec<Commit>,
    pub scans: ScanResults,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PullRequest {
    pub id: u64,
    pub title: String,
    pub user: PullRequestAuthor,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PullRequestAuthor {
    pub login: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PrEvent {
    pub id: u64,
    pub repo_name: String,
    pub event: String,
    pub pr_number: u64,
    #[serde(default)]
    pub extra: serde_json::Value,
    pub timestamp: NaiveDateTime,
}

/// Keeps the events recorded for `repo`, in the order the backend sent them.
pub fn events_for_repo<'a>(events: &'a [PrEvent], repo: &str) -> Vec<&'a PrEvent> {
    events.iter().filter(|event| event.repo_name == repo).collect()
}

/// Stored analysis output the backend keeps per pull request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrOutputKind {
    Sandbox,
    LlmReview,
}

impl PrOutputKind {
    pub fn label(self) -> &'static str {
        match self {
            PrOutputKind::Sandbox => "Sandbox output",
            PrOutputKind::LlmReview => "LLM review",
        }
    }
}

/// Output records for one pull request, shown as the backend stored them.
#[derive(Clone, Debug, PartialEq)]
pub struct PrOutput {
    pub repo: String,
    pub pr_number: u64,
    pub kind: PrOutputKind,
    pub records: Vec<serde_json::Value>,
}

/// What a scan trigger points at.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScanTarget {
    Commit { sha: String },
    PullRequest { id: u64 },
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTarget::Commit { sha } => write!(f, "commit {}", sha.get(..7).unwrap_or(sha)),
            ScanTarget::PullRequest { id } => write!(f, "pull request #{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: u64, repo: &str) -> PrEvent {
        PrEvent {
            id,
            repo_name: repo.to_owned(),
            event: "opened".to_owned(),
            pr_number: id,
            extra: serde_json::Value::Null,
            timestamp: NaiveDateTime::default(),
        }
    }

    #[test]
    fn events_for_repo_keeps_matching_events_in_order() {
        let events = vec![event(1, "a"), event(2, "b"), event(3, "a")];
        let ids: Vec<u64> = events_for_repo(&events, "a")
            .into_iter()
            .map(|event| event.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn absent_sha_is_not_scanned_rather_than_clean() {
        let scans: ScanResults = [("clean".to_owned(), Vec::new())].into_iter().collect();
        assert_eq!(scans.status("clean"), ScanStatus::Scanned(&[]));
        assert_eq!(scans.status("missing"), ScanStatus::NotScanned);
        assert_eq!(scans.status("missing").label(), "Run scan...");
        assert_eq!(scans.status("clean").label(), "0");
    }

    #[test]
    fn pr_event_parses_naive_backend_timestamp() {
        let event: PrEvent = serde_json::from_str(
            r#"{"id":7,"repo_name":"org/repo","event":"synchronize","pr_number":3,
                "extra":{"sha":"abc"},"timestamp":"2025-02-01T10:20:30.123456"}"#,
        )
        .expect("event");
        assert_eq!(event.pr_number, 3);
        assert_eq!(event.extra["sha"], "abc");
    }

    #[test]
    fn scan_target_display_names_the_target() {
        let commit = ScanTarget::Commit {
            sha: "0123456789abcdef".to_owned(),
        };
        assert_eq!(commit.to_string(), "commit 0123456");
        assert_eq!(
            ScanTarget::PullRequest { id: 42 }.to_string(),
            "pull request #42"
        );
    }
}
