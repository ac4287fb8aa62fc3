mod api;
mod app;
mod controller;
mod domain;
mod logging;
mod notices;
mod settings;
mod spinner;

use app::{APP_NAME, DashboardApp};
use eframe::NativeOptions;

fn main() -> eframe::Result<()> {
    if let Err(err) = logging::init() {
        eprintln!("Warning: logging is unavailable: {err}");
    }

    let options = NativeOptions::default();
    eframe::run_native(
        APP_NAME,
        options,
        Box::new(|cc| Ok(Box::new(DashboardApp::new(cc)))),
    )
}
