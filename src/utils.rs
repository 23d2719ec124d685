use anyhow::{Context, Result, bail};
use std::{
    ffi::OsStr,
    io,
    path::Path,
    process::{Command, Stdio},
};
use tracing::debug;

/// Runs a host tool and returns its standard output as UTF-8.
pub fn command_output<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Result<String> {
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());
    debug!("Invoking {:?}", command);

    let output = command
        .output()
        .with_context(|| format!("Failed to invoke {program}"))?;

    if !output.status.success() {
        bail!(
            "{program} failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    String::from_utf8(output.stdout).with_context(|| format!("{program} printed invalid UTF-8"))
}

/// Runs a tool for its side effect. Its output is shown only on failure.
pub fn run_command<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Result<()> {
    command_output(program, args).map(|_| ())
}

/// Like [`Path::exists`], but a path that cannot be inspected for reasons
/// other than absence (e.g. permissions) still counts as present.
pub fn path_exists<P: AsRef<Path>>(path: P) -> bool {
    match path.as_ref().metadata() {
        Ok(_) => true,
        Err(error) => error.kind() != io::ErrorKind::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output() {
        let output = command_output("echo", &["hello"]).unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[test]
    fn test_command_failure() {
        assert!(run_command("false", &[] as &[&str]).is_err());
        assert!(run_command("/nonexistent/tool", &["x"]).is_err());
    }

    #[test]
    fn test_path_exists() {
        let dir = tempfile::tempdir().unwrap();
        assert!(path_exists(dir.path()));
        assert!(!path_exists(dir.path().join("missing")));

        let dangling = dir.path().join("dangling");
        std::os::unix::fs::symlink(dir.path().join("nowhere"), &dangling).unwrap();
        assert!(!path_exists(&dangling));
    }
}
