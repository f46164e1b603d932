use gtk4::prelude::*;
use gtk4::Application;
use log::info;

mod core;
mod ui;

fn main() {
    // Initialize logger
    simple_logger::SimpleLogger::new().init().unwrap();

    info!(
        "Starting {} v{}",
        crate::core::config::app_info::NAME,
        env!("CARGO_PKG_VERSION")
    );
    info!("Application ID: {}", crate::core::config::app_info::ID);

    let app = Application::builder()
        .application_id(crate::core::config::app_info::ID)
        .build();

    app.connect_activate(ui::setup_application_ui);

    app.run();
}
