use std::{collections::HashMap, fmt};

use reqwest::{
    StatusCode,
    blocking::{Client, RequestBuilder},
    header::{ACCEPT, COOKIE},
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::domain::{
    Commit, CommitListing, PrEvent, PrOutputKind, PullRequest, Repository, ScanFinding,
    ScanResults, ScanTarget, User,
};

const USER_AGENT_HEADER: &str = "sandbox-dashboard-egui/0.1";
const SIGN_IN_PATH: &str = "/auth/github/login";

/// Backend collaborator. One method per HTTP call the dashboard makes.
#[cfg_attr(test, mockall::automock)]
pub trait DashboardApi: Send + Sync {
    fn current_user(&self) -> Result<User, FetchError>;

    fn list_repositories(&self) -> Result<Vec<Repository>, FetchError>;

    fn list_pull_requests(&self, repo: &str) -> Result<Vec<PullRequest>, FetchError>;

    fn list_commits(&self, repo: &str, branch: &str) -> Result<CommitListing, FetchError>;

    fn list_events(&self, repo: &str) -> Result<Vec<PrEvent>, FetchError>;

    fn trigger_scan(&self, repo: &str, target: &ScanTarget) -> Result<ScanAck, FetchError>;

    /// Stored output records of one kind for a pull request.
    fn pr_output(
        &self,
        repo: &str,
        pr_number: u64,
        kind: PrOutputKind,
    ) -> Result<Vec<serde_json::Value>, FetchError>;
}

/// Whatever the backend answers to a scan trigger; the dashboard only shows it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanAck {
    pub message: Option<String>,
}

impl ScanAck {
    fn from_value(value: serde_json::Value) -> Self {
        let message = match value {
            serde_json::Value::String(text) => Some(text),
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(|message| message.as_str())
                .map(str::to_owned),
            _ => None,
        };
        Self { message }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    CurrentUser,
    Repositories,
    PullRequests,
    Commits,
    Events,
    TriggerScan,
    SandboxOutput,
    LlmReviewOutput,
}

impl Endpoint {
    pub fn pr_output(kind: PrOutputKind) -> Self {
        match kind {
            PrOutputKind::Sandbox => Endpoint::SandboxOutput,
            PrOutputKind::LlmReview => Endpoint::LlmReviewOutput,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Endpoint::CurrentUser => "/users/me",
            Endpoint::Repositories => "/repositories",
            Endpoint::PullRequests => "/pull_requests",
            Endpoint::Commits => "/commits",
            Endpoint::Events => "/events",
            Endpoint::TriggerScan => "/scans",
            Endpoint::SandboxOutput => "/sandbox-output",
            Endpoint::LlmReviewOutput => "/llm-review-output",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Error)]
pub enum FetchCause {
    #[error("{0}")]
    Transport(#[source] reqwest::Error),
    #[error("HTTP {0}")]
    Status(StatusCode),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request to {endpoint} failed: {cause}")]
    Failed {
        endpoint: Endpoint,
        #[source]
        cause: FetchCause,
    },
    #[error("Response from {endpoint} was malformed: {reason}")]
    Malformed { endpoint: Endpoint, reason: String },
    #[error("Request to {endpoint} was cancelled")]
    Cancelled { endpoint: Endpoint },
    #[error("Background worker for {endpoint} disconnected before returning a result")]
    WorkerGone { endpoint: Endpoint },
}

impl FetchError {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            FetchError::Failed { endpoint, .. }
            | FetchError::Malformed { endpoint, .. }
            | FetchError::Cancelled { endpoint }
            | FetchError::WorkerGone { endpoint } => *endpoint,
        }
    }

    fn transport(endpoint: Endpoint, err: reqwest::Error) -> Self {
        FetchError::Failed {
            endpoint,
            cause: FetchCause::Transport(err),
        }
    }
}

pub fn build_client() -> Result<Client, reqwest::Error> {
    Client::builder().user_agent(USER_AGENT_HEADER).build()
}

pub fn sign_in_url(base_url: &str) -> String {
    format!("{}{SIGN_IN_PATH}", base_url.trim_end_matches('/'))
}

pub struct HttpDashboardApi {
    client: Client,
    base_url: String,
    session_cookie: Option<String>,
}

impl HttpDashboardApi {
    pub fn new(client: Client, base_url: &str, session_cookie: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            session_cookie: session_cookie.filter(|cookie| !cookie.trim().is_empty()),
        }
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(ACCEPT, "application/json");
        match &self.session_cookie {
            Some(cookie) => request.header(COOKIE, cookie.as_str()),
            None => request,
        }
    }

    fn get(&self, endpoint: Endpoint, query: &[(&str, &str)]) -> RequestBuilder {
        self.authorize(self.client.get(self.url(endpoint)).query(query))
    }

    fn post_scan(&self, repo: &str, target: &ScanTarget) -> RequestBuilder {
        let body = scan_request_body(repo, target);
        self.authorize(self.client.post(self.url(Endpoint::TriggerScan)).json(&body))
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        self.send(endpoint, self.get(endpoint, query))
    }

    fn send<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        request: RequestBuilder,
    ) -> Result<T, FetchError> {
        debug!(%endpoint, "sending request");
        let response = request
            .send()
            .map_err(|err| FetchError::transport(endpoint, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Failed {
                endpoint,
                cause: FetchCause::Status(status),
            });
        }
        let body = response
            .text()
            .map_err(|err| FetchError::transport(endpoint, err))?;
        decode(endpoint, &body)
    }
}

impl DashboardApi for HttpDashboardApi {
    fn current_user(&self) -> Result<User, FetchError> {
        self.get_json(Endpoint::CurrentUser, &[])
    }

    fn list_repositories(&self) -> Result<Vec<Repository>, FetchError> {
        self.get_json(Endpoint::Repositories, &[])
    }

    fn list_pull_requests(&self, repo: &str) -> Result<Vec<PullRequest>, FetchError> {
        self.get_json(Endpoint::PullRequests, &[("repo", repo)])
    }

    fn list_commits(&self, repo: &str, branch: &str) -> Result<CommitListing, FetchError> {
        let response: CommitListingResponse =
            self.get_json(Endpoint::Commits, &[("repo", repo), ("branch", branch)])?;
        response.into_listing(Endpoint::Commits)
    }

    fn list_events(&self, repo: &str) -> Result<Vec<PrEvent>, FetchError> {
        self.get_json(Endpoint::Events, &[("repo", repo)])
    }

    fn trigger_scan(&self, repo: &str, target: &ScanTarget) -> Result<ScanAck, FetchError> {
        let ack: serde_json::Value =
            self.send(Endpoint::TriggerScan, self.post_scan(repo, target))?;
        Ok(ScanAck::from_value(ack))
    }

    fn pr_output(
        &self,
        repo: &str,
        pr_number: u64,
        kind: PrOutputKind,
    ) -> Result<Vec<serde_json::Value>, FetchError> {
        let pr_number = pr_number.to_string();
        self.get_json(
            Endpoint::pr_output(kind),
            &[("repo_name", repo), ("pr_number", pr_number.as_str())],
        )
    }
}

/// JSON body of `POST /scans`; exactly one of `commit_sha` / `pr_id` is set.
fn scan_request_body(repo: &str, target: &ScanTarget) -> serde_json::Value {
    match target {
        ScanTarget::Commit { sha } => json!({ "repo": repo, "commit_sha": sha }),
        ScanTarget::PullRequest { id } => json!({ "repo": repo, "pr_id": id }),
    }
}

fn decode<T: DeserializeOwned>(endpoint: Endpoint, body: &str) -> Result<T, FetchError> {
    // Some acknowledgments come back with an empty body.
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body).map_err(|err| FetchError::Malformed {
        endpoint,
        reason: err.to_string(),
    })
}

// Response payloads ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CommitListingResponse {
    commits: Vec<Commit>,
    #[serde(default)]
    scans: HashMap<String, Vec<HashMap<String, String>>>,
}

impl CommitListingResponse {
    fn into_listing(self, endpoint: Endpoint) -> Result<CommitListing, FetchError> {
        let scans = self
            .scans
            .into_iter()
            .map(|(sha, records)| {
                let findings = records
                    .into_iter()
                    .map(|record| finding_from_record(endpoint, &sha, record))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((sha, findings))
            })
            .collect::<Result<ScanResults, FetchError>>()?;

        Ok(CommitListing {
            commits: self.commits,
            scans,
        })
    }
}

fn finding_from_record(
    endpoint: Endpoint,
    sha: &str,
    record: HashMap<String, String>,
) -> Result<ScanFinding, FetchError> {
    if record.len() != 1 {
        return Err(FetchError::Malformed {
            endpoint,
            reason: format!(
                "scan record for {sha} has {} entries, expected one file",
                record.len()
            ),
        });
    }
    let (file, reason) = record
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::Malformed {
            endpoint,
            reason: format!("scan record for {sha} is empty"),
        })?;
    Ok(ScanFinding { file, reason })
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ScanStatus;

    const LISTING: &str = r#"{
        "commits": [
            {"sha": "bbb", "commit": {"message": "second", "author": {"name": "ada", "date": "2025-01-02T00:00:00Z"}}},
            {"sha": "aaa", "commit": {"message": "first", "author": {"name": "bob", "date": "2025-01-01T00:00:00Z"}}}
        ],
        "scans": {"aaa": [{"setup.py": "downloads a binary"}, {"ci.yml": "exfiltrates secrets"}]}
    }"#;

    #[test]
    fn commit_listing_keeps_order_and_splits_findings() {
        let response: CommitListingResponse = decode(Endpoint::Commits, LISTING).expect("decode");
        let listing = response.into_listing(Endpoint::Commits).expect("listing");

        let shas: Vec<_> = listing.commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, vec!["bbb", "aaa"]);
        assert_eq!(listing.scans.status("bbb"), ScanStatus::NotScanned);
        match listing.scans.status("aaa") {
            ScanStatus::Scanned(findings) => {
                assert_eq!(findings.len(), 2);
                assert_eq!(findings[0].file, "setup.py");
                assert_eq!(findings[0].reason, "downloads a binary");
            }
            ScanStatus::NotScanned => panic!("aaa should be scanned"),
        }
    }

    #[test]
    fn multi_entry_scan_record_is_rejected() {
        let body = r#"{"commits": [], "scans": {"aaa": [{"a.py": "x", "b.py": "y"}]}}"#;
        let response: CommitListingResponse = decode(Endpoint::Commits, body).expect("decode");
        let result = response.into_listing(Endpoint::Commits);
        assert!(matches!(
            result,
            Err(FetchError::Malformed {
                endpoint: Endpoint::Commits,
                ..
            })
        ));
    }

    #[test]
    fn missing_field_fails_fast_as_malformed() {
        let result: Result<Vec<PullRequest>, _> =
            decode(Endpoint::PullRequests, r#"[{"id": 1, "title": "no user"}]"#);
        let err = result.expect_err("missing user must not decode");
        assert_eq!(err.endpoint(), Endpoint::PullRequests);
        assert!(matches!(err, FetchError::Malformed { .. }));
    }

    #[test]
    fn scan_acknowledgment_tolerates_any_shape() {
        let empty: serde_json::Value = decode(Endpoint::TriggerScan, "").expect("empty body");
        assert_eq!(ScanAck::from_value(empty), ScanAck::default());

        let object: serde_json::Value =
            decode(Endpoint::TriggerScan, r#"{"message": "queued"}"#).expect("object");
        assert_eq!(
            ScanAck::from_value(object).message.as_deref(),
            Some("queued")
        );

        let text: serde_json::Value =
            decode(Endpoint::TriggerScan, r#""scan started""#).expect("string");
        assert_eq!(
            ScanAck::from_value(text).message.as_deref(),
            Some("scan started")
        );
    }

    #[test]
    fn sign_in_url_trims_trailing_slash() {
        assert_eq!(
            sign_in_url("http://localhost:8000/"),
            "http://localhost:8000/auth/github/login"
        );
    }

    fn api_with_cookie(cookie: Option<&str>) -> HttpDashboardApi {
        let client = build_client().expect("client");
        HttpDashboardApi::new(client, "http://localhost:8000/", cookie.map(str::to_owned))
    }

    #[test]
    fn blank_session_cookie_is_not_sent() {
        let api = api_with_cookie(Some("  "));
        assert!(api.session_cookie.is_none());

        let request = api
            .get(Endpoint::Commits, &[("repo", "org/repo")])
            .build()
            .expect("request");
        assert!(request.headers().get(COOKIE).is_none());
        assert_eq!(
            request.url().as_str(),
            "http://localhost:8000/commits?repo=org%2Frepo"
        );
    }

    #[test]
    fn session_cookie_and_json_accept_go_on_every_request() {
        let api = api_with_cookie(Some("session=abc123"));

        let get = api
            .get(
                Endpoint::Commits,
                &[("repo", "org/repo"), ("branch", "main")],
            )
            .build()
            .expect("get");
        assert_eq!(get.headers()[COOKIE], "session=abc123");
        assert_eq!(get.headers()[ACCEPT], "application/json");
        assert_eq!(get.url().query(), Some("repo=org%2Frepo&branch=main"));

        let post = api
            .post_scan("org/repo", &ScanTarget::PullRequest { id: 42 })
            .build()
            .expect("post");
        assert_eq!(post.method(), reqwest::Method::POST);
        assert_eq!(post.url().as_str(), "http://localhost:8000/scans");
        assert_eq!(post.headers()[COOKIE], "session=abc123");
        let body = post
            .body()
            .and_then(|body| body.as_bytes())
            .expect("buffered body");
        let sent: serde_json::Value = serde_json::from_slice(body).expect("json body");
        assert_eq!(sent, json!({ "repo": "org/repo", "pr_id": 42 }));
    }

    #[test]
    fn scan_body_names_exactly_one_target() {
        assert_eq!(
            scan_request_body(
                "org/repo",
                &ScanTarget::Commit {
                    sha: "abc123".into()
                }
            ),
            json!({ "repo": "org/repo", "commit_sha": "abc123" })
        );
        let pr = scan_request_body("org/repo", &ScanTarget::PullRequest { id: 7 });
        assert_eq!(pr, json!({ "repo": "org/repo", "pr_id": 7 }));
        assert!(pr.get("commit_sha").is_none());
    }

    #[test]
    fn pr_output_request_uses_repo_name_and_pr_number() {
        let api = api_with_cookie(None);
        let request = api
            .get(
                Endpoint::pr_output(PrOutputKind::LlmReview),
                &[("repo_name", "org/repo"), ("pr_number", "8")],
            )
            .build()
            .expect("request");
        assert_eq!(
            request.url().as_str(),
            "http://localhost:8000/llm-review-output?repo_name=org%2Frepo&pr_number=8"
        );
        assert_eq!(
            Endpoint::pr_output(PrOutputKind::Sandbox).path(),
            "/sandbox-output"
        );
    }

    #[test]
    fn pr_output_must_be_a_list_of_records() {
        let records: Vec<serde_json::Value> = decode(
            Endpoint::SandboxOutput,
            r#"[{"event": "sandbox_analysis", "pr_number": 8, "sandbox_output": "ok"}]"#,
        )
        .expect("records");
        assert_eq!(records[0]["sandbox_output"], "ok");

        let err = decode::<Vec<serde_json::Value>>(Endpoint::SandboxOutput, r#"{"error": 1}"#)
            .expect_err("object is not a record list");
        assert_eq!(err.endpoint(), Endpoint::SandboxOutput);
    }
}
