use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, TryRecvError},
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    api::{DashboardApi, Endpoint, FetchError, ScanAck},
    domain::{
        CommitListing, PrEvent, PrOutput, PrOutputKind, PullRequest, Repository, ScanTarget, User,
        events_for_repo,
    },
    notices::{NoticeBoard, NoticeLevel},
    spinner,
};

pub type RequestId = u64;

/// Everything the user (or a retry) can ask the dashboard to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    LoadUser,
    LoadRepositories,
    SelectBranch { repo: String, branch: String },
    RefreshCommits { repo: String, branch: String },
    RefreshPullRequests { repo: String },
    RefreshEvents { repo: String },
    RunScan { repo: String, target: ScanTarget },
    ViewPrOutput {
        repo: String,
        pr_number: u64,
        kind: PrOutputKind,
    },
}

// -----------------------------------------------------------------------------
// View state
// -----------------------------------------------------------------------------

/// One piece of fetched data plus the request currently allowed to replace it.
#[derive(Debug, Default)]
pub struct Slot<T> {
    value: T,
    latest: Option<RequestId>,
}

impl<T> Slot<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn is_loading(&self) -> bool {
        self.latest.is_some()
    }

    /// Hands the slot to `id`; returns the request it supersedes, if any.
    fn begin(&mut self, id: RequestId) -> Option<RequestId> {
        self.latest.replace(id)
    }

    fn abandon(&mut self) -> Option<RequestId> {
        self.latest.take()
    }

    fn settle(&mut self, id: RequestId, result: Result<T, FetchError>) -> Settled {
        if self.latest != Some(id) {
            return Settled::Stale;
        }
        self.latest = None;
        match result {
            Ok(value) => {
                self.value = value;
                Settled::Applied
            }
            Err(err) => Settled::Failed(err),
        }
    }
}

enum Settled {
    Applied,
    Stale,
    Failed(FetchError),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    pub repo: Option<String>,
    pub branch: Option<String>,
}

impl Selection {
    fn is_repo(&self, repo: &str) -> bool {
        self.repo.as_deref() == Some(repo)
    }

    fn is_branch(&self, repo: &str, branch: &str) -> bool {
        self.is_repo(repo) && self.branch.as_deref() == Some(branch)
    }
}

#[derive(Debug, Default)]
pub struct DashboardState {
    pub user: Slot<Option<User>>,
    pub repositories: Slot<Vec<Repository>>,
    pub commits: Slot<CommitListing>,
    pub pull_requests: Slot<Vec<PullRequest>>,
    pub events: Slot<Vec<PrEvent>>,
    /// Output window contents; `None` while closed or before the first answer.
    pub pr_output: Slot<Option<PrOutput>>,
    pub selection: Selection,
    scanning: HashSet<(String, ScanTarget)>,
}

impl DashboardState {
    pub fn is_scanning(&self, repo: &str, target: &ScanTarget) -> bool {
        self.scanning.contains(&(repo.to_owned(), target.clone()))
    }

    /// Events belonging to the selected repository, in backend order.
    pub fn visible_events(&self) -> Vec<&PrEvent> {
        match &self.selection.repo {
            Some(repo) => events_for_repo(self.events.value(), repo),
            None => Vec::new(),
        }
    }
}

// -----------------------------------------------------------------------------
// Controller
// -----------------------------------------------------------------------------

pub struct DashboardController {
    api: Arc<dyn DashboardApi>,
    state: DashboardState,
    notices: NoticeBoard,
    jobs: Vec<PendingJob>,
    next_request: RequestId,
}

impl DashboardController {
    pub fn new(api: Arc<dyn DashboardApi>, notice_ttl: Duration) -> Self {
        Self {
            api,
            state: DashboardState::default(),
            notices: NoticeBoard::new(notice_ttl),
            jobs: Vec::new(),
            next_request: 0,
        }
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn notices_mut(&mut self) -> &mut NoticeBoard {
        &mut self.notices
    }

    /// No request of any kind, current or superseded, is still running.
    pub fn is_idle(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Initial fetches. Each one fills its own slot and fails on its own.
    pub fn mount(&mut self) {
        spinner::ensure_registered();
        self.load_user();
        self.load_repositories();
    }

    pub fn select_branch(&mut self, repo: &str, branch: &str) {
        self.select_repo(repo);
        self.state.selection.branch = Some(branch.to_owned());
        info!(repo, branch, "branch selected");
        self.load_commits(repo, branch);
    }

    pub fn select_repo(&mut self, repo: &str) {
        if !self.state.selection.is_repo(repo) {
            self.state.selection = Selection {
                repo: Some(repo.to_owned()),
                branch: None,
            };
            // Rows of the previous repo must never be acted on under the new one.
            for old in [
                self.state.commits.abandon(),
                self.state.pull_requests.abandon(),
                self.state.events.abandon(),
            ]
            .into_iter()
            .flatten()
            {
                self.cancel(old);
            }
            self.state.commits.value = CommitListing::default();
            self.state.pull_requests.value = Vec::new();
            self.state.events.value = Vec::new();
            self.close_pr_output();
        }
        self.load_pull_requests(repo);
        self.load_events(repo);
    }

    pub fn run_scan(&mut self, repo: &str, target: ScanTarget) {
        let key = (repo.to_owned(), target.clone());
        if self.state.scanning.contains(&key) {
            debug!(repo, %target, "scan already requested");
            return;
        }
        info!(repo, %target, "requesting scan");
        self.state.scanning.insert(key);
        self.spawn(Request::Scan {
            repo: repo.to_owned(),
            target,
        });
    }

    /// Opens the output window for one pull request of the selected repo.
    pub fn view_pr_output(&mut self, repo: &str, pr_number: u64, kind: PrOutputKind) {
        info!(repo, pr_number, kind = kind.label(), "loading pull request output");
        // A different request replaces the window contents instead of mixing them.
        self.state.pr_output.value = None;
        let id = self.spawn(Request::PrOutput {
            repo: repo.to_owned(),
            pr_number,
            kind,
        });
        if let Some(old) = self.state.pr_output.begin(id) {
            self.cancel(old);
        }
    }

    pub fn close_pr_output(&mut self) {
        if let Some(old) = self.state.pr_output.abandon() {
            self.cancel(old);
        }
        self.state.pr_output.value = None;
    }

    pub fn execute(&mut self, command: Command) {
        match command {
            Command::LoadUser => self.load_user(),
            Command::LoadRepositories => self.load_repositories(),
            Command::SelectBranch { repo, branch } => self.select_branch(&repo, &branch),
            Command::RefreshCommits { repo, branch } => {
                if self.state.selection.is_branch(&repo, &branch) {
                    self.load_commits(&repo, &branch);
                } else {
                    debug!(%repo, %branch, "selection moved on; commit refresh dropped");
                }
            }
            Command::RefreshPullRequests { repo } => {
                if self.state.selection.is_repo(&repo) {
                    self.load_pull_requests(&repo);
                }
            }
            Command::RefreshEvents { repo } => {
                if self.state.selection.is_repo(&repo) {
                    self.load_events(&repo);
                }
            }
            Command::RunScan { repo, target } => self.run_scan(&repo, target),
            Command::ViewPrOutput {
                repo,
                pr_number,
                kind,
            } => {
                if self.state.selection.is_repo(&repo) {
                    self.view_pr_output(&repo, pr_number, kind);
                } else {
                    debug!(%repo, pr_number, "selection moved on; output request dropped");
                }
            }
        }
    }

    /// Applies every finished request. Returns whether anything arrived.
    pub fn poll(&mut self) -> bool {
        let mut finished = Vec::new();
        self.jobs.retain(|job| match job.try_take() {
            None => true,
            Some(outcome) => {
                finished.push((job.id, job.request.clone(), outcome));
                false
            }
        });

        let arrived = !finished.is_empty();
        for (id, request, outcome) in finished {
            self.apply(id, request, outcome);
        }
        self.notices.prune(Instant::now());
        arrived
    }

    /// Cancels everything in flight; late responses go nowhere.
    pub fn unmount(&mut self) {
        for job in self.jobs.drain(..) {
            job.token.cancel();
        }
        for slot_request in [
            self.state.user.abandon(),
            self.state.repositories.abandon(),
            self.state.commits.abandon(),
            self.state.pull_requests.abandon(),
            self.state.events.abandon(),
            self.state.pr_output.abandon(),
        ]
        .into_iter()
        .flatten()
        {
            debug!(request = slot_request, "abandoned on unmount");
        }
        self.state.scanning.clear();
    }

    fn load_user(&mut self) {
        let id = self.spawn(Request::User);
        if let Some(old) = self.state.user.begin(id) {
            self.cancel(old);
        }
    }

    fn load_repositories(&mut self) {
        let id = self.spawn(Request::Repositories);
        if let Some(old) = self.state.repositories.begin(id) {
            self.cancel(old);
        }
    }

    fn load_commits(&mut self, repo: &str, branch: &str) {
        let id = self.spawn(Request::Commits {
            repo: repo.to_owned(),
            branch: branch.to_owned(),
        });
        if let Some(old) = self.state.commits.begin(id) {
            self.cancel(old);
        }
    }

    fn load_pull_requests(&mut self, repo: &str) {
        let id = self.spawn(Request::PullRequests {
            repo: repo.to_owned(),
        });
        if let Some(old) = self.state.pull_requests.begin(id) {
            self.cancel(old);
        }
    }

    fn load_events(&mut self, repo: &str) {
        let id = self.spawn(Request::Events {
            repo: repo.to_owned(),
        });
        if let Some(old) = self.state.events.begin(id) {
            self.cancel(old);
        }
    }

    fn spawn(&mut self, request: Request) -> RequestId {
        self.next_request += 1;
        let id = self.next_request;
        debug!(request = id, endpoint = %request.endpoint(), "issuing request");
        self.jobs
            .push(PendingJob::spawn(id, request, Arc::clone(&self.api)));
        id
    }

    fn cancel(&self, id: RequestId) {
        if let Some(job) = self.jobs.iter().find(|job| job.id == id) {
            debug!(request = id, "superseded; cancelling");
            job.token.cancel();
        }
    }

    fn apply(&mut self, id: RequestId, request: Request, outcome: Outcome) {
        let settled = match outcome {
            Outcome::User(result) => self.state.user.settle(id, result.map(Some)),
            Outcome::Repositories(result) => self.state.repositories.settle(id, result),
            Outcome::Commits(result) => self.state.commits.settle(id, result),
            Outcome::PullRequests(result) => self.state.pull_requests.settle(id, result),
            Outcome::Events(result) => self.state.events.settle(id, result),
            Outcome::PrOutput(result) => self.state.pr_output.settle(id, result.map(Some)),
            Outcome::Scan(result) => {
                self.finish_scan(request, result);
                return;
            }
        };

        match settled {
            Settled::Applied => debug!(request = id, endpoint = %request.endpoint(), "applied"),
            Settled::Stale => {
                debug!(request = id, endpoint = %request.endpoint(), "discarding stale response")
            }
            Settled::Failed(err) => self.report(&request, err),
        }
    }

    fn finish_scan(&mut self, request: Request, result: Result<ScanAck, FetchError>) {
        let Request::Scan { repo, target } = &request else {
            return;
        };
        self.state.scanning.remove(&(repo.clone(), target.clone()));

        let ack = match result {
            Ok(ack) => ack,
            Err(err) => {
                self.report(&request, err);
                return;
            }
        };

        let message = match ack.message {
            Some(text) => format!("Scan requested for {target} in {repo}: {text}"),
            None => format!("Scan requested for {target} in {repo}"),
        };
        self.notices.raise(NoticeLevel::Info, message, None);

        match target {
            ScanTarget::Commit { .. } => {
                if let Some(branch) = self.state.selection.branch.clone()
                    && self.state.selection.is_repo(repo)
                {
                    self.load_commits(repo, &branch);
                }
            }
            ScanTarget::PullRequest { .. } => {
                if self.state.selection.is_repo(repo) {
                    self.load_pull_requests(repo);
                }
            }
        }
    }

    fn report(&mut self, request: &Request, err: FetchError) {
        if matches!(err, FetchError::Cancelled { .. }) {
            debug!(error = %err, "request cancelled");
            return;
        }
        warn!(endpoint = %err.endpoint(), error = %err, "request failed");
        self.notices.raise(
            NoticeLevel::Error,
            format!("{}: {err}", request.describe()),
            Some(request.retry_command()),
        );
    }
}

impl Drop for DashboardController {
    fn drop(&mut self) {
        self.unmount();
    }
}

// -----------------------------------------------------------------------------
// Background jobs
// -----------------------------------------------------------------------------

#[derive(Clone, Debug)]
enum Request {
    User,
    Repositories,
    Commits { repo: String, branch: String },
    PullRequests { repo: String },
    Events { repo: String },
    Scan { repo: String, target: ScanTarget },
    PrOutput {
        repo: String,
        pr_number: u64,
        kind: PrOutputKind,
    },
}

enum Outcome {
    User(Result<User, FetchError>),
    Repositories(Result<Vec<Repository>, FetchError>),
    Commits(Result<CommitListing, FetchError>),
    PullRequests(Result<Vec<PullRequest>, FetchError>),
    Events(Result<Vec<PrEvent>, FetchError>),
    Scan(Result<ScanAck, FetchError>),
    PrOutput(Result<PrOutput, FetchError>),
}

impl Request {
    fn endpoint(&self) -> Endpoint {
        match self {
            Request::User => Endpoint::CurrentUser,
            Request::Repositories => Endpoint::Repositories,
            Request::Commits { .. } => Endpoint::Commits,
            Request::PullRequests { .. } => Endpoint::PullRequests,
            Request::Events { .. } => Endpoint::Events,
            Request::Scan { .. } => Endpoint::TriggerScan,
            Request::PrOutput { kind, .. } => Endpoint::pr_output(*kind),
        }
    }

    fn run(&self, api: &dyn DashboardApi) -> Outcome {
        match self {
            Request::User => Outcome::User(api.current_user()),
            Request::Repositories => Outcome::Repositories(api.list_repositories()),
            Request::Commits { repo, branch } => Outcome::Commits(api.list_commits(repo, branch)),
            Request::PullRequests { repo } => Outcome::PullRequests(api.list_pull_requests(repo)),
            Request::Events { repo } => Outcome::Events(api.list_events(repo)),
            Request::Scan { repo, target } => Outcome::Scan(api.trigger_scan(repo, target)),
            Request::PrOutput {
                repo,
                pr_number,
                kind,
            } => Outcome::PrOutput(api.pr_output(repo, *pr_number, *kind).map(|records| {
                PrOutput {
                    repo: repo.clone(),
                    pr_number: *pr_number,
                    kind: *kind,
                    records,
                }
            })),
        }
    }

    fn failed(&self, err: FetchError) -> Outcome {
        match self {
            Request::User => Outcome::User(Err(err)),
            Request::Repositories => Outcome::Repositories(Err(err)),
            Request::Commits { .. } => Outcome::Commits(Err(err)),
            Request::PullRequests { .. } => Outcome::PullRequests(Err(err)),
            Request::Events { .. } => Outcome::Events(Err(err)),
            Request::Scan { .. } => Outcome::Scan(Err(err)),
            Request::PrOutput { .. } => Outcome::PrOutput(Err(err)),
        }
    }

    fn describe(&self) -> String {
        match self {
            Request::User => "Loading your profile".to_owned(),
            Request::Repositories => "Loading repositories".to_owned(),
            Request::Commits { repo, branch } => format!("Loading commits of {repo}@{branch}"),
            Request::PullRequests { repo } => format!("Loading pull requests of {repo}"),
            Request::Events { repo } => format!("Loading events of {repo}"),
            Request::Scan { repo, target } => format!("Scanning {target} in {repo}"),
            Request::PrOutput {
                repo,
                pr_number,
                kind,
            } => format!("Loading {} of {repo} #{pr_number}", kind.label()),
        }
    }

    fn retry_command(&self) -> Command {
        match self.clone() {
            Request::User => Command::LoadUser,
            Request::Repositories => Command::LoadRepositories,
            Request::Commits { repo, branch } => Command::RefreshCommits { repo, branch },
            Request::PullRequests { repo } => Command::RefreshPullRequests { repo },
            Request::Events { repo } => Command::RefreshEvents { repo },
            Request::Scan { repo, target } => Command::RunScan { repo, target },
            Request::PrOutput {
                repo,
                pr_number,
                kind,
            } => Command::ViewPrOutput {
                repo,
                pr_number,
                kind,
            },
        }
    }
}

#[derive(Clone, Default)]
struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct PendingJob {
    id: RequestId,
    request: Request,
    token: CancelToken,
    receiver: Receiver<Outcome>,
}

impl PendingJob {
    fn spawn(id: RequestId, request: Request, api: Arc<dyn DashboardApi>) -> Self {
        let (tx, rx) = mpsc::channel();
        let token = CancelToken::default();
        let worker_token = token.clone();
        let worker_request = request.clone();
        thread::spawn(move || {
            let outcome = if worker_token.is_cancelled() {
                worker_request.failed(FetchError::Cancelled {
                    endpoint: worker_request.endpoint(),
                })
            } else {
                worker_request.run(api.as_ref())
            };
            let _ = tx.send(outcome);
        });
        Self {
            id,
            request,
            token,
            receiver: rx,
        }
    }

    fn try_take(&self) -> Option<Outcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.request.failed(FetchError::WorkerGone {
                endpoint: self.request.endpoint(),
            })),
        }
    }
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------
