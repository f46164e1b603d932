use log::{info, warn};

/// Check that the fprintd service is active and hint at how to start it
/// when it is not.
pub fn check_fprintd_service() {
    let output = std::process::Command::new("systemctl")
        .args(["is-active", "fprintd"])
        .output();

    match output {
        Ok(output) => {
            let status = String::from_utf8_lossy(&output.stdout);
            let status = status.trim();
            if status == "active" {
                info!("fprintd service is running");
            } else {
                warn!("fprintd service status: {}", status);
                warn!("Start it with: sudo systemctl start fprintd");
            }
        }
        Err(e) => warn!("Cannot check fprintd service status: {}", e),
    }
}
