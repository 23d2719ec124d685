use crate::{
    config::LogLevel,
    error::EngineError,
    records::{
        ContainerInspect, ContainerSummary, EngineInfo, ImageInspect, ImageSummary, VersionReport,
    },
};
use serde::de::DeserializeOwned;
use std::{
    cmp::Ordering,
    ffi::OsStr,
    io::{self, Write},
    process::{Command, Output, Stdio},
};
use tracing::{debug, error};

const DEFAULT_BINARY: &str = "podman";

/// Wrapper around the podman command line.
///
/// Every invocation is a blocking child process. Output is either captured
/// ([`Engine::output`], [`Engine::run`]) or passed through to the terminal
/// ([`Engine::interactive`]).
#[derive(Debug, Clone)]
pub struct Engine {
    binary: String,
    leading: Vec<String>,
    log_podman: bool,
    log_level: LogLevel,
}

impl Engine {
    pub fn new(log_podman: bool, log_level: LogLevel) -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            leading: Vec::new(),
            log_podman,
            log_level,
        }
    }

    /// An engine backed by a shell script instead of podman.
    #[cfg(test)]
    pub(crate) fn scripted(script: &std::path::Path) -> Self {
        Self {
            binary: String::from("sh"),
            leading: vec![script.display().to_string()],
            log_podman: false,
            log_level: LogLevel::Warn,
        }
    }

    /// Runs podman and returns its standard output.
    pub fn output<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<Vec<u8>, EngineError> {
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| self.spawn_error(source))?;

        self.finish(output)
    }

    /// Runs podman for its side effect only.
    pub fn run<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<(), EngineError> {
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .output()
            .map_err(|source| self.spawn_error(source))?;

        self.finish(output).map(|_| ())
    }

    /// Runs podman attached to the user's terminal.
    pub fn interactive<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<(), EngineError> {
        let stderr = if self.log_podman {
            Stdio::inherit()
        } else {
            Stdio::null()
        };

        let status = self
            .command(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(stderr)
            .status()
            .map_err(|source| self.spawn_error(source))?;

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::from_exit(status.code(), String::new()))
        }
    }

    fn command<S: AsRef<OsStr>>(&self, args: &[S]) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(&self.leading);

        if self.log_podman {
            command.args(["--log-level", self.log_level.as_str()]);
        }

        command.args(args);
        debug!("Invoking {:?}", command);
        command
    }

    fn finish(&self, output: Output) -> Result<Vec<u8>, EngineError> {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if self.log_level.is_verbose() && !stderr.is_empty() {
            if let Err(error) = io::stderr().write_all(stderr.as_bytes()) {
                debug!("Failed to echo podman's standard error: {}", error);
            }
        }

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(EngineError::from_exit(output.status.code(), stderr))
        }
    }

    fn spawn_error(&self, source: io::Error) -> EngineError {
        EngineError::Spawn {
            binary: self.binary.clone(),
            source,
        }
    }

    fn json<T: DeserializeOwned, S: AsRef<OsStr>>(&self, args: &[S]) -> Result<T, EngineError> {
        let stdout = self.output(args)?;
        Ok(serde_json::from_slice(&stdout)?)
    }

    pub fn container_exists(&self, container: &str) -> bool {
        self.run(&["container", "exists", container]).is_ok()
    }

    pub fn image_exists(&self, image: &str) -> bool {
        self.run(&["image", "exists", image]).is_ok()
    }

    pub fn inspect_container(&self, container: &str) -> Result<ContainerInspect, EngineError> {
        let args = ["inspect", "--format", "json", "--type", "container", container];
        first(self.json::<Vec<ContainerInspect>, _>(&args)?)
    }

    pub fn inspect_image(&self, image: &str) -> Result<ImageInspect, EngineError> {
        let args = ["inspect", "--format", "json", "--type", "image", image];
        first(self.json::<Vec<ImageInspect>, _>(&args)?)
    }

    /// `podman ps --all --format json` with extra arguments such as filters.
    pub fn containers(&self, extra: &[&str]) -> Result<Vec<ContainerSummary>, EngineError> {
        let mut args = vec!["ps", "--all", "--format", "json"];
        args.extend_from_slice(extra);
        self.json(&args)
    }

    /// `podman images --format json` with extra arguments such as filters.
    pub fn images(&self, extra: &[&str]) -> Result<Vec<ImageSummary>, EngineError> {
        let mut args = vec!["images", "--format", "json"];
        args.extend_from_slice(extra);
        self.json(&args)
    }

    /// Pulls an image while showing podman's progress output.
    pub fn pull(&self, image: &str) -> Result<(), EngineError> {
        let status = self
            .command(&["pull", image])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| self.spawn_error(source))?;

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::from_exit(status.code(), String::new()))
        }
    }

    pub fn start(&self, container: &str) -> Result<(), EngineError> {
        self.run(&["start", container])
    }

    pub fn remove_container(&self, container: &str, force: bool) -> Result<(), EngineError> {
        let mut args = vec!["rm"];
        if force {
            args.push("--force");
        }
        args.push(container);
        self.run(&args)
    }

    pub fn remove_image(&self, image: &str, force: bool) -> Result<(), EngineError> {
        let mut args = vec!["rmi"];
        if force {
            args.push("--force");
        }
        args.push(image);
        self.run(&args)
    }

    /// `podman system migrate`, optionally switching the OCI runtime.
    pub fn system_migrate(&self, new_runtime: Option<&str>) -> Result<(), EngineError> {
        let mut args = vec!["system", "migrate"];
        if let Some(runtime) = new_runtime {
            args.extend_from_slice(&["--new-runtime", runtime]);
        }
        self.run(&args)
    }

    pub fn info(&self) -> Result<EngineInfo, EngineError> {
        self.json(&["info", "--format", "json"])
    }

    pub fn version(&self) -> Result<String, EngineError> {
        let report: VersionReport = self.json(&["version", "--format", "json"])?;
        Ok(report.version().unwrap_or_default().to_string())
    }

    /// Returns `true` if the installed podman is at least `required`.
    ///
    /// A failed version query counts as "not supported".
    pub fn version_at_least(&self, required: &str) -> bool {
        match self.version() {
            Ok(current) => compare_versions(&current, required) != Ordering::Less,
            Err(error) => {
                error!("Failed to get the podman version: {}", error);
                false
            }
        }
    }
}

fn first<T>(mut records: Vec<T>) -> Result<T, EngineError> {
    if records.is_empty() {
        return Err(EngineError::NotFound {
            stderr: String::new(),
        });
    }

    Ok(records.swap_remove(0))
}

/// Compares dotted numeric versions. Pre-release suffixes (`-dev`, `-rc1`)
/// and missing components are treated as zero.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    fn components(version: &str) -> Vec<u64> {
        version
            .trim()
            .trim_start_matches('v')
            .split(['-', '+', '~'])
            .next()
            .unwrap_or_default()
            .split('.')
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    }

    let left = components(left);
    let right = components(right);
    let len = left.len().max(right.len());

    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);

        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePodman;

    #[test]
    fn test_verbose_failure_keeps_stderr() {
        let podman = FakePodman::new(r#""rm mybox") echo 'container is running' >&2; exit 2 ;;"#);
        let engine = Engine {
            log_level: LogLevel::Debug,
            ..podman.engine()
        };

        let error = engine.remove_container("mybox", false).unwrap_err();

        assert!(matches!(error, EngineError::Busy { .. }));
        assert_eq!(error.stderr(), "container is running\n");
        assert_eq!(podman.calls(), ["rm mybox"]);
    }

    #[test]
    fn test_output_captures_stdout() {
        let podman = FakePodman::new(r#""image exists "*) exit 0 ;;
"version --format json") echo '{"Version":"1.9.3"}'; exit 0 ;;"#);
        let engine = podman.engine();

        assert!(engine.image_exists("fedora-toolbox:38"));
        assert!(!engine.container_exists("mybox"));
        assert_eq!(engine.version().unwrap(), "1.9.3");
        assert!(engine.version_at_least("1.6.2"));
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.5.0", "1.5.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.6.2", "1.5.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.4.4", "1.5.0"), Ordering::Less);
        assert_eq!(compare_versions("2.0", "1.9.3"), Ordering::Greater);
        assert_eq!(compare_versions("1.5", "1.5.0"), Ordering::Equal);
    }

    #[test]
    fn test_compare_versions_ignores_suffix() {
        assert_eq!(compare_versions("1.6.2-dev", "1.6.2"), Ordering::Equal);
        assert_eq!(compare_versions("v3.0.1-rc2", "3.0.0"), Ordering::Greater);
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let mut engine = Engine::new(false, LogLevel::Warn);
        engine.binary = "/nonexistent/podman".to_string();

        let error = engine.output(&["version"]).unwrap_err();
        assert!(matches!(error, EngineError::Spawn { .. }));
        assert!(!engine.container_exists("anything"));
    }

    #[test]
    fn test_exit_status_is_mapped() {
        let mut engine = Engine::new(false, LogLevel::Warn);
        engine.binary = "false".to_string();

        let error = engine.run(&["ignored"]).unwrap_err();
        assert!(matches!(error, EngineError::NotFound { .. }));
    }

    #[test]
    fn test_log_podman_prepends_level() {
        let engine = Engine::new(true, LogLevel::Debug);
        let command = engine.command(&["ps"]);
        let args: Vec<String> = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["--log-level", "debug", "ps"]);
    }
}
