use std::sync::OnceLock;

use eframe::egui::{self, Color32};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpinnerStyle {
    pub size: f32,
    pub color: Color32,
}

const BOUNCY: SpinnerStyle = SpinnerStyle {
    size: 30.0,
    color: Color32::from_rgb(0x59, 0x5c, 0xff),
};

static REGISTERED: OnceLock<SpinnerStyle> = OnceLock::new();

/// Registers the loading spinner once per process and hands back its style.
pub fn ensure_registered() -> &'static SpinnerStyle {
    REGISTERED.get_or_init(|| {
        debug!("registering loading spinner");
        BOUNCY
    })
}

#[cfg(test)]
pub fn is_registered() -> bool {
    REGISTERED.get().is_some()
}

pub fn show(ui: &mut egui::Ui) {
    let style = ensure_registered();
    ui.add(egui::Spinner::new().size(style.size).color(style.color));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_idempotent() {
        let first = ensure_registered() as *const SpinnerStyle;
        let second = ensure_registered() as *const SpinnerStyle;
        assert_eq!(first, second);
        assert!(is_registered());
        assert_eq!(ensure_registered().size, 30.0);
    }
}
