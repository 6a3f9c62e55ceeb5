//! Local systemd service control.

use std::fmt;
use std::path::Path;
use tracing::info;

use crate::external::CommandRunner;
use crate::reports::{self, LibraryError};

/// Action applied to a systemd unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Enable,
    Disable,
    Start,
    Stop,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Enable => "enable",
            ServiceAction::Disable => "disable",
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs `systemctl <action> <service>.service`.
pub async fn run_service_action(
    runner: &dyn CommandRunner,
    systemctl: &Path,
    service: &str,
    action: ServiceAction,
) -> Result<(), LibraryError> {
    let args = vec![
        systemctl.display().to_string(),
        action.to_string(),
        format!("{}.service", service),
    ];
    let output = runner.run(&args).await?;
    if !output.success() {
        return Err(
            reports::service_action_failed(service, action.as_str(), output.output.trim()).into(),
        );
    }
    info!(service, %action, "service action finished");
    Ok(())
}
