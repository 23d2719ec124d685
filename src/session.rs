use anyhow::{Context, Result, bail};
use std::{
    io,
    process::{Command, Stdio},
};
use tracing::{debug, warn};

const GDBUS: &str = "gdbus";

const REQUEST_SESSION: [&str; 8] = [
    "call",
    "--session",
    "--dest",
    "org.freedesktop.Flatpak",
    "--object-path",
    "/org/freedesktop/Flatpak/SessionHelper",
    "--method",
    "org.freedesktop.Flatpak.SessionHelper.RequestSession",
];

/// Asks the Flatpak session helper to start monitoring host files such as
/// `/etc/localtime` for the container.
///
/// A missing `gdbus` is tolerated with a warning. A failing call is not.
pub fn request_session() -> Result<()> {
    let mut command = Command::new(GDBUS);
    command.args(REQUEST_SESSION).stdin(Stdio::null());
    debug!("Calling org.freedesktop.Flatpak.SessionHelper.RequestSession");

    let output = match command.output() {
        Ok(output) => output,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            warn!("{} not found; host files will not be monitored", GDBUS);
            return Ok(());
        }
        Err(error) => {
            return Err(error).context("Failed to call the Flatpak session helper");
        }
    };

    if !output.status.success() {
        bail!(
            "Failed to call org.freedesktop.Flatpak.SessionHelper.RequestSession: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(())
}
