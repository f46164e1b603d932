//! Calling page: issues verification requests and renders their outcome.

use std::sync::Arc;

use gtk4::prelude::*;
use gtk4::{Align, Box as GtkBox, Button, DropDown, Label, Orientation, Stack, StringList};
use log::{info, warn};
use tokio::runtime::Runtime;

use crate::core::fprintd;
use crate::core::util;
use crate::core::verify::{Outcome, VerifyRequest};
use crate::ui::verify_page;

/// Key verified when nothing else is selected.
const DEFAULT_KEY: &str = "right-index-finger";

/// Status line shown for a verification outcome.
pub fn outcome_status_text(outcome: Outcome) -> String {
    match outcome {
        Outcome::Success => "Verified successfully.".to_string(),
        Outcome::Failed(code) => format!("Verification failed with error code: {}", code),
        Outcome::Cancelled => "Verification cancelled.".to_string(),
    }
}

/// Handle to the caller page widgets.
#[derive(Clone)]
pub struct CallerPage {
    stack: Stack,
    rt: Arc<Runtime>,
    picker: DropDown,
    status: Label,
}

/// Build the caller page and add it to `stack` as "main".
pub fn setup_caller_page(stack: &Stack, rt: Arc<Runtime>) -> CallerPage {
    let page = GtkBox::new(Orientation::Vertical, 18);
    page.set_margin_top(24);
    page.set_margin_bottom(24);
    page.set_margin_start(24);
    page.set_margin_end(24);
    page.set_valign(Align::Center);

    let title = Label::new(Some("Fingerprint verification demo"));
    title.add_css_class("title-2");

    let names: Vec<String> = fprintd::FINGERS
        .iter()
        .map(|finger| util::display_finger_name(finger))
        .collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let picker = DropDown::new(Some(StringList::new(&name_refs)), gtk4::Expression::NONE);
    picker.set_selected(
        fprintd::FINGERS
            .iter()
            .position(|f| *f == DEFAULT_KEY)
            .unwrap_or(0) as u32,
    );

    let verify_btn = Button::with_label("Verify fingerprint");
    verify_btn.set_halign(Align::Center);

    let status = Label::new(Some("Ready."));
    status.add_css_class("dim-label");
    status.set_wrap(true);

    page.append(&title);
    page.append(&picker);
    page.append(&verify_btn);
    page.append(&status);

    stack.add_named(&page, Some("main"));

    let caller = CallerPage {
        stack: stack.clone(),
        rt,
        picker,
        status,
    };

    {
        let caller = caller.clone();
        verify_btn.connect_clicked(move |_| {
            info!("User clicked 'Verify fingerprint' button");
            caller.verify_selected();
        });
    }

    caller
}

impl CallerPage {
    /// Launch verification for the key selected in the picker.
    pub fn verify_selected(&self) {
        let key = fprintd::FINGERS
            .get(self.picker.selected() as usize)
            .copied()
            .unwrap_or(DEFAULT_KEY);
        self.verify(key);
    }

    fn verify(&self, key: &str) {
        let request = match VerifyRequest::new(key) {
            Ok(request) => request,
            Err(e) => {
                // Launching without a key is a programming error in the
                // caller, surfaced instead of crashing the demo.
                warn!("Refusing to launch verification: {}", e);
                self.status.set_text(&format!("Cannot verify: {}", e));
                return;
            }
        };

        info!("Launching verification for key '{}'", request.key());
        let status = self.status.clone();
        verify_page::launch(&self.stack, self.rt.clone(), request, move |outcome| {
            info!("Verification result: {:?}", outcome);
            status.set_text(&outcome_status_text(outcome));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_outcome_renders_success_text() {
        assert_eq!(
            outcome_status_text(Outcome::Success),
            "Verified successfully."
        );
    }

    #[test]
    fn failed_outcome_carries_the_exact_code() {
        assert_eq!(
            outcome_status_text(Outcome::Failed(5)),
            "Verification failed with error code: 5"
        );
        assert_eq!(
            outcome_status_text(Outcome::Failed(6)),
            "Verification failed with error code: 6"
        );
    }

    #[test]
    fn cancelled_outcome_renders_cancelled_text() {
        assert_eq!(
            outcome_status_text(Outcome::Cancelled),
            "Verification cancelled."
        );
    }

    #[test]
    fn default_key_is_a_known_finger() {
        assert!(fprintd::FINGERS.contains(&DEFAULT_KEY));
    }
}
