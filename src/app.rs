use std::{sync::Arc, time::Duration};

use eframe::{
    App, CreationContext, Frame,
    egui::{self, Context, Layout},
};
use egui_extras::{Column, TableBuilder};
use tracing::{error, info, warn};

use crate::{
    api::{self, HttpDashboardApi},
    controller::{Command, DashboardController, DashboardState},
    domain::{
        CommitListing, PrEvent, PrOutput, PrOutputKind, PullRequest, Repository, ScanStatus,
        ScanTarget,
    },
    notices::{NoticeBoard, NoticeLevel},
    settings::{Settings, SettingsStore},
    spinner,
};

pub const APP_NAME: &str = "Sandbox Dashboard";

const BUSY_REPAINT: Duration = Duration::from_millis(100);
const IDLE_REPAINT: Duration = Duration::from_millis(500);

pub struct DashboardApp {
    settings: Settings,
    settings_form: SettingsForm,
    settings_store: Option<SettingsStore>,
    storage_warning: Option<String>,
    controller: Option<DashboardController>,
    connection_error: Option<String>,
    active_tab: BodyTab,
    open_findings: Option<String>,
}

impl DashboardApp {
    pub fn new(_cc: &CreationContext<'_>) -> Self {
        let mut storage_warning = None;
        let mut settings = Settings::default();
        let settings_store = match SettingsStore::initialize() {
            Ok(store) => {
                match store.load() {
                    Ok(stored) => settings = stored,
                    Err(err) => {
                        storage_warning = Some(format!("Failed to restore saved settings: {err}"))
                    }
                }
                Some(store)
            }
            Err(err) => {
                storage_warning = Some(format!(
                    "Local settings storage is unavailable; changes will not persist ({err})."
                ));
                None
            }
        };
        if let Some(warning) = &storage_warning {
            warn!("{warning}");
        }
        let settings = settings.with_env_overrides();

        let mut app = Self {
            settings_form: SettingsForm::from_settings(&settings),
            settings,
            settings_store,
            storage_warning,
            controller: None,
            connection_error: None,
            active_tab: BodyTab::Commits,
            open_findings: None,
        };
        app.connect();
        app
    }

    /// Replaces the controller with a freshly mounted one for the current settings.
    fn connect(&mut self) {
        // Dropping the old controller cancels whatever it still had in flight.
        self.controller = None;
        self.open_findings = None;

        match api::build_client() {
            Ok(client) => {
                let api = HttpDashboardApi::new(
                    client,
                    &self.settings.api_base_url,
                    self.settings.session_cookie.clone(),
                );
                let mut controller =
                    DashboardController::new(Arc::new(api), self.settings.notice_ttl());
                controller.mount();
                info!(backend = %self.settings.api_base_url, "dashboard mounted");
                self.controller = Some(controller);
                self.connection_error = None;
            }
            Err(err) => {
                error!(error = %err, "failed to build HTTP client");
                self.connection_error = Some(format!("Unable to create an HTTP client: {err}"));
            }
        }
    }

    fn save_settings(&mut self) {
        let url = self.settings_form.api_base_url.trim();
        if url.is_empty() {
            self.settings_form.form_error = Some("A backend URL is required.".to_owned());
            return;
        }

        let cookie = self.settings_form.session_cookie.trim();
        let settings = Settings {
            api_base_url: url.to_owned(),
            session_cookie: (!cookie.is_empty()).then(|| cookie.to_owned()),
            ..self.settings.clone()
        };
        if let Err(message) = self.store(&settings) {
            self.settings_form.form_error = Some(message);
            return;
        }

        self.settings_form.form_error = None;
        self.settings = settings;
        self.connect();
    }

    fn sign_out(&mut self) {
        let settings = self.settings.signed_out();
        if let Err(message) = self.store(&settings) {
            self.raise_error(message);
        }
        self.settings = settings;
        self.settings_form = SettingsForm::from_settings(&self.settings);
        self.connect();
    }

    fn sign_in(&mut self) {
        let url = api::sign_in_url(&self.settings.api_base_url);
        info!(%url, "opening GitHub sign-in");
        if let Err(err) = open::that(&url) {
            self.raise_error(format!("Could not open a browser for {url}: {err}"));
        }
    }

    fn store(&self, settings: &Settings) -> Result<(), String> {
        match &self.settings_store {
            Some(store) => store
                .persist(settings)
                .map_err(|err| format!("Unable to persist settings locally: {err}")),
            None => Err("Local settings storage is not available.".to_owned()),
        }
    }

    fn raise_error(&mut self, message: String) {
        warn!("{message}");
        match &mut self.controller {
            Some(controller) => {
                controller
                    .notices_mut()
                    .raise(NoticeLevel::Error, message, None);
            }
            None => self.connection_error = Some(message),
        }
    }

    fn handle(&mut self, action: UiAction) {
        match action {
            UiAction::Dispatch(command) => {
                if let Some(controller) = &mut self.controller {
                    controller.execute(command);
                }
            }
            UiAction::ShowFindings(sha) => self.open_findings = Some(sha),
            UiAction::CloseOutput => {
                if let Some(controller) = &mut self.controller {
                    controller.close_pr_output();
                }
            }
            UiAction::RetryNotice(id) => {
                if let Some(controller) = &mut self.controller
                    && let Some(notice) = controller.notices_mut().dismiss(id)
                    && let Some(command) = notice.retry
                {
                    controller.execute(command);
                }
            }
            UiAction::DismissNotice(id) => {
                if let Some(controller) = &mut self.controller {
                    controller.notices_mut().dismiss(id);
                }
            }
            UiAction::SignIn => self.sign_in(),
            UiAction::SignOut => self.sign_out(),
            UiAction::SaveSettings => self.save_settings(),
        }
    }

    fn render_side_panel(&mut self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        ui.heading(APP_NAME);
        ui.separator();

        if let Some(warning) = &self.storage_warning {
            ui.colored_label(ui.visuals().warn_fg_color, warning);
            ui.separator();
        }

        if let Some(controller) = &self.controller {
            let state = controller.state();
            render_user(ui, state, actions);
            ui.separator();

            ui.label("Repositories");
            egui::ScrollArea::vertical()
                .max_height(ui.available_height() * 0.6)
                .show(ui, |area| render_repositories(area, state, actions));

            ui.separator();
            ui.label(format!(
                "Selected repo: {}",
                state.selection.repo.as_deref().unwrap_or("-")
            ));
            ui.label(format!(
                "Selected branch: {}",
                state.selection.branch.as_deref().unwrap_or("-")
            ));
            if state.user.value().is_some() && ui.button("Sign out").clicked() {
                actions.push(UiAction::SignOut);
            }
            ui.separator();
        }

        ui.collapsing("Backend", |section| {
            section.label("API base URL");
            section.text_edit_singleline(&mut self.settings_form.api_base_url);
            section.label("Session cookie");
            section.add(
                egui::TextEdit::singleline(&mut self.settings_form.session_cookie)
                    .password(true)
                    .hint_text("session=..."),
            );
            if section.button("Save & reconnect").clicked() {
                actions.push(UiAction::SaveSettings);
            }
            if let Some(error) = &self.settings_form.form_error {
                section.colored_label(section.visuals().error_fg_color, error);
            }
        });
    }

    fn render_body(&mut self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        if let Some(error) = &self.connection_error {
            ui.colored_label(ui.visuals().error_fg_color, error);
            ui.add_space(8.0);
        }
        let Some(controller) = &self.controller else {
            return;
        };
        let state = controller.state();

        ui.horizontal(|row| {
            row.selectable_value(&mut self.active_tab, BodyTab::Commits, "Commits");
            row.selectable_value(&mut self.active_tab, BodyTab::PullRequests, "Pull requests");
            row.selectable_value(&mut self.active_tab, BodyTab::Events, "Events");
        });
        ui.separator();

        let Some(repo) = state.selection.repo.as_deref() else {
            ui.centered_and_justified(|center| {
                center.label("Pick a repository branch on the left to get started.");
            });
            return;
        };

        match self.active_tab {
            BodyTab::Commits => {
                if state.selection.branch.is_none() {
                    ui.weak("Select a branch to list its commits.");
                } else if state.commits.is_loading() {
                    show_loading(ui);
                } else {
                    draw_commits(ui, repo, state, state.commits.value(), actions);
                }
            }
            BodyTab::PullRequests => {
                if state.pull_requests.is_loading() {
                    show_loading(ui);
                } else {
                    draw_pull_requests(ui, repo, state, state.pull_requests.value(), actions);
                }
            }
            BodyTab::Events => {
                if state.events.is_loading() {
                    show_loading(ui);
                } else {
                    draw_events(ui, &state.visible_events());
                }
            }
        }
    }

    fn render_findings_window(&mut self, ctx: &Context) {
        let (Some(sha), Some(controller)) = (self.open_findings.clone(), &self.controller) else {
            return;
        };
        let mut open = true;
        egui::Window::new(format!("Suspicious files in commit {sha}"))
            .open(&mut open)
            .collapsible(false)
            .default_width(520.0)
            .show(ctx, |ui| {
                draw_findings(ui, controller.state().commits.value(), &sha);
            });
        if !open {
            self.open_findings = None;
        }
    }

    fn render_output_window(&self, ctx: &Context, actions: &mut Vec<UiAction>) {
        let Some(controller) = &self.controller else {
            return;
        };
        let slot = &controller.state().pr_output;
        if !slot.is_loading() && slot.value().is_none() {
            return;
        }
        let title = match slot.value() {
            Some(output) => format!(
                "{} for {} #{}",
                output.kind.label(),
                output.repo,
                output.pr_number
            ),
            None => "Pull request output".to_owned(),
        };
        let mut open = true;
        egui::Window::new(title)
            .id(egui::Id::new("pr_output_window"))
            .open(&mut open)
            .collapsible(false)
            .default_width(560.0)
            .show(ctx, |ui| match slot.value() {
                Some(output) if !slot.is_loading() => draw_output(ui, output),
                _ => show_loading(ui),
            });
        if !open {
            actions.push(UiAction::CloseOutput);
        }
    }
}

impl App for DashboardApp {
    fn update(&mut self, ctx: &Context, _frame: &mut Frame) {
        if let Some(controller) = &mut self.controller {
            controller.poll();
        }

        let mut actions = Vec::new();

        egui::SidePanel::left("repositories_panel")
            .default_width(260.0)
            .show(ctx, |ui| self.render_side_panel(ui, &mut actions));

        if let Some(controller) = &self.controller
            && !controller.notices().is_empty()
        {
            egui::TopBottomPanel::bottom("notices_panel").show(ctx, |ui| {
                render_notices(ui, controller.notices(), &mut actions);
            });
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_body(ui, &mut actions);
        });

        self.render_findings_window(ctx);
        self.render_output_window(ctx, &mut actions);

        for action in actions {
            self.handle(action);
        }

        let busy = self
            .controller
            .as_ref()
            .is_some_and(|controller| !controller.is_idle());
        ctx.request_repaint_after(if busy { BUSY_REPAINT } else { IDLE_REPAINT });
    }
}

// -----------------------------------------------------------------------------
// Panels
// -----------------------------------------------------------------------------

fn render_user(ui: &mut egui::Ui, state: &DashboardState, actions: &mut Vec<UiAction>) {
    match state.user.value() {
        Some(user) => {
            ui.horizontal(|row| {
                row.strong(&user.username);
                row.hyperlink_to("avatar", &user.avatar_url);
            });
        }
        None if state.user.is_loading() => {
            ui.horizontal(|row| {
                row.add(egui::Spinner::new());
                row.label("Loading profile…");
            });
        }
        None => {
            ui.weak("Not signed in.");
            if ui.button("Sign in with GitHub").clicked() {
                actions.push(UiAction::SignIn);
            }
        }
    }
}

fn render_repositories(ui: &mut egui::Ui, state: &DashboardState, actions: &mut Vec<UiAction>) {
    let repositories: &[Repository] = state.repositories.value();
    if repositories.is_empty() {
        if state.repositories.is_loading() {
            ui.add(egui::Spinner::new());
        } else {
            ui.weak("No repositories yet.");
        }
        return;
    }

    for repo in repositories {
        ui.collapsing(&repo.name, |section| {
            if repo.branches.is_empty() {
                section.weak("No branches.");
            }
            for branch in &repo.branches {
                let selected = state.selection.repo.as_deref() == Some(repo.name.as_str())
                    && state.selection.branch.as_deref() == Some(branch.name.as_str());
                let button = egui::Button::new(&branch.name).selected(selected);
                if section.add_sized([section.available_width(), 20.0], button).clicked() {
                    actions.push(UiAction::Dispatch(Command::SelectBranch {
                        repo: repo.name.clone(),
                        branch: branch.name.clone(),
                    }));
                }
            }
        });
    }
}

fn render_notices(ui: &mut egui::Ui, notices: &NoticeBoard, actions: &mut Vec<UiAction>) {
    for notice in notices.iter() {
        ui.horizontal(|row| {
            let color = match notice.level {
                NoticeLevel::Info => row.visuals().text_color(),
                NoticeLevel::Error => row.visuals().error_fg_color,
            };
            row.colored_label(color, &notice.message);
            row.with_layout(Layout::right_to_left(egui::Align::Center), |lane| {
                if lane.small_button("Dismiss").clicked() {
                    actions.push(UiAction::DismissNotice(notice.id));
                }
                if notice.retry.is_some() && lane.small_button("Retry").clicked() {
                    actions.push(UiAction::RetryNotice(notice.id));
                }
            });
        });
    }
}

fn show_loading(ui: &mut egui::Ui) {
    ui.centered_and_justified(spinner::show);
}

// -----------------------------------------------------------------------------
// Tables
// -----------------------------------------------------------------------------

fn draw_commits(
    ui: &mut egui::Ui,
    repo: &str,
    state: &DashboardState,
    listing: &CommitListing,
    actions: &mut Vec<UiAction>,
) {
    if listing.commits.is_empty() {
        ui.weak("No commits on this branch.");
        return;
    }

    ui.push_id("commits_table", |ui| {
        TableBuilder::new(ui)
            .striped(true)
            .column(Column::remainder())
            .column(Column::initial(120.0).resizable(true))
            .column(Column::initial(140.0))
            .column(Column::initial(110.0))
            .column(Column::initial(80.0))
            .header(20.0, |mut header| {
                for title in ["Commit", "Author", "Date", "Suspicious files", "Actions"] {
                    header.col(|ui| {
                        ui.strong(title);
                    });
                }
            })
            .body(|mut body| {
                for commit in &listing.commits {
                    let status = listing.scans.status(&commit.sha);
                    body.row(24.0, |mut row| {
                        row.col(|ui| {
                            ui.label(commit.commit.message.lines().next().unwrap_or_default())
                                .on_hover_text(&commit.sha);
                        });
                        row.col(|ui| {
                            ui.label(&commit.commit.author.name);
                        });
                        row.col(|ui| {
                            ui.label(commit.commit.author.date.format("%Y-%m-%d %H:%M").to_string());
                        });
                        row.col(|ui| {
                            ui.label(status.label());
                        });
                        row.col(|ui| match status {
                            ScanStatus::Scanned(_) => {
                                if ui.button("View").clicked() {
                                    actions.push(UiAction::ShowFindings(commit.sha.clone()));
                                }
                            }
                            ScanStatus::NotScanned => {
                                let target = ScanTarget::Commit {
                                    sha: commit.sha.clone(),
                                };
                                scan_button(ui, repo, state, target, actions);
                            }
                        });
                    });
                }
            });
    });
}

fn draw_pull_requests(
    ui: &mut egui::Ui,
    repo: &str,
    state: &DashboardState,
    items: &[PullRequest],
    actions: &mut Vec<UiAction>,
) {
    if items.is_empty() {
        ui.weak("No pull requests for this repository.");
        return;
    }

    ui.push_id("pull_requests_table", |ui| {
        TableBuilder::new(ui)
            .striped(true)
            .column(Column::initial(70.0))
            .column(Column::remainder())
            .column(Column::initial(130.0))
            .column(Column::initial(80.0))
            .column(Column::initial(220.0))
            .header(20.0, |mut header| {
                for title in ["ID", "Title", "Author", "Actions", "Output"] {
                    header.col(|ui| {
                        ui.strong(title);
                    });
                }
            })
            .body(|mut body| {
                for pr in items {
                    body.row(24.0, |mut row| {
                        row.col(|ui| {
                            ui.label(pr.id.to_string());
                        });
                        row.col(|ui| {
                            ui.label(&pr.title);
                        });
                        row.col(|ui| {
                            ui.label(&pr.user.login);
                        });
                        row.col(|ui| {
                            let target = ScanTarget::PullRequest { id: pr.id };
                            scan_button(ui, repo, state, target, actions);
                        });
                        row.col(|ui| {
                            for kind in [PrOutputKind::Sandbox, PrOutputKind::LlmReview] {
                                if ui.small_button(kind.label()).clicked() {
                                    actions.push(UiAction::Dispatch(Command::ViewPrOutput {
                                        repo: repo.to_owned(),
                                        pr_number: pr.id,
                                        kind,
                                    }));
                                }
                            }
                        });
                    });
                }
            });
    });
}

fn draw_events(ui: &mut egui::Ui, events: &[&PrEvent]) {
    if events.is_empty() {
        ui.weak("No pull-request events recorded for this repository.");
        return;
    }

    ui.push_id("events_table", |ui| {
        TableBuilder::new(ui)
            .striped(true)
            .column(Column::initial(110.0))
            .column(Column::initial(60.0))
            .column(Column::initial(150.0))
            .column(Column::remainder())
            .header(20.0, |mut header| {
                for title in ["Event", "PR", "When", "Details"] {
                    header.col(|ui| {
                        ui.strong(title);
                    });
                }
            })
            .body(|mut body| {
                for event in events {
                    body.row(24.0, |mut row| {
                        row.col(|ui| {
                            ui.label(&event.event);
                        });
                        row.col(|ui| {
                            ui.label(format!("#{}", event.pr_number));
                        });
                        row.col(|ui| {
                            ui.label(event.timestamp.format("%Y-%m-%d %H:%M").to_string());
                        });
                        row.col(|ui| {
                            if !event.extra.is_null() {
                                ui.small(event.extra.to_string());
                            }
                        });
                    });
                }
            });
    });
}

fn draw_findings(ui: &mut egui::Ui, listing: &CommitListing, sha: &str) {
    let findings = match listing.scans.status(sha) {
        ScanStatus::Scanned(findings) => findings,
        ScanStatus::NotScanned => {
            ui.weak("This commit has not been scanned yet.");
            return;
        }
    };
    if findings.is_empty() {
        ui.label("Scan finished without suspicious files.");
        return;
    }

    ui.push_id("findings_table", |ui| {
        TableBuilder::new(ui)
            .striped(true)
            .column(Column::initial(180.0).resizable(true))
            .column(Column::remainder())
            .header(20.0, |mut header| {
                header.col(|ui| {
                    ui.strong("File");
                });
                header.col(|ui| {
                    ui.strong("Reason");
                });
            })
            .body(|mut body| {
                for finding in findings {
                    body.row(40.0, |mut row| {
                        row.col(|ui| {
                            ui.monospace(&finding.file);
                        });
                        row.col(|ui| {
                            ui.label(&finding.reason);
                        });
                    });
                }
            });
    });
}

fn draw_output(ui: &mut egui::Ui, output: &PrOutput) {
    if output.records.is_empty() {
        ui.weak("Nothing recorded for this pull request yet.");
        return;
    }
    egui::ScrollArea::vertical().max_height(420.0).show(ui, |ui| {
        for record in &output.records {
            let text = serde_json::to_string_pretty(record).unwrap_or_else(|_| record.to_string());
            ui.monospace(text);
            ui.separator();
        }
    });
}

fn scan_button(
    ui: &mut egui::Ui,
    repo: &str,
    state: &DashboardState,
    target: ScanTarget,
    actions: &mut Vec<UiAction>,
) {
    let busy = state.is_scanning(repo, &target);
    if ui.add_enabled(!busy, egui::Button::new("Scan")).clicked() {
        actions.push(UiAction::Dispatch(Command::RunScan {
            repo: repo.to_owned(),
            target,
        }));
    }
    if busy {
        ui.small("Working…");
    }
}

// -----------------------------------------------------------------------------
// Supporting structs
// -----------------------------------------------------------------------------

enum UiAction {
    Dispatch(Command),
    ShowFindings(String),
    CloseOutput,
    RetryNotice(u64),
    DismissNotice(u64),
    SignIn,
    SignOut,
    SaveSettings,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BodyTab {
    Commits,
    PullRequests,
    Events,
}

#[derive(Default)]
struct SettingsForm {
    api_base_url: String,
    session_cookie: String,
    form_error: Option<String>,
}

impl SettingsForm {
    fn from_settings(settings: &Settings) -> Self {
        Self {
            api_base_url: settings.api_base_url.clone(),
            session_cookie: settings.session_cookie.clone().unwrap_or_default(),
            form_error: None,
        }
    }
}
