//! Application setup and initialization functionality.

use std::sync::Arc;

use gtk4::prelude::*;
use gtk4::{Application, ApplicationWindow, Stack, StackTransitionType};
use log::info;

use crate::core::{config, system};
use crate::ui::caller;

/// Initialize and set up main application UI.
pub fn setup_application_ui(app: &Application) {
    info!("Initializing application components");

    let rt = Arc::new(
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("Failed to build Tokio runtime"),
    );
    info!("Tokio async runtime initialized");

    info!("Performing system environment checks");
    system::check_fprintd_service();

    let stack = Stack::new();
    stack.set_transition_type(StackTransitionType::SlideLeftRight);

    let window = ApplicationWindow::builder()
        .application(app)
        .title(config::app_info::NAME)
        .default_width(420)
        .default_height(400)
        .child(&stack)
        .build();
    window.set_icon_name(Some("fingerprint-symbolic"));

    let caller_page = caller::setup_caller_page(&stack, rt);

    window.present();

    info!("Setting initial view to main page");
    stack.set_visible_child_name("main");

    // The sample verifies once right at startup, as if the user had
    // tapped the verify button.
    caller_page.verify_selected();

    info!("{} startup complete", config::app_info::NAME);
}
