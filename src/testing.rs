//! Shell-scripted podman for exercising the command flows.

use crate::{config::Config, context::Context, engine::Engine};
use clap::Parser;
use nix::unistd::Uid;
use std::{fs, path::PathBuf};
use tempfile::TempDir;

pub(crate) struct FakePodman {
    _dir: TempDir,
    script: PathBuf,
    log: PathBuf,
}

impl FakePodman {
    /// `arms` are shell `case` arms matched against the space-joined
    /// arguments. Unmatched invocations exit 1, podman's "no such container
    /// or image". `@DIR@` expands to a scratch directory that keeps state
    /// between invocations.
    pub(crate) fn new(arms: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("podman.sh");
        let log = dir.path().join("calls.log");
        let arms = arms.replace("@DIR@", &dir.path().display().to_string());

        let body = format!(
            "printf '%s\\n' \"$*\" >> '{}'\ncase \"$*\" in\n{}\nesac\nexit 1\n",
            log.display(),
            arms
        );
        fs::write(&script, body).unwrap();

        Self {
            _dir: dir,
            script,
            log,
        }
    }

    pub(crate) fn engine(&self) -> Engine {
        Engine::scripted(&self.script)
    }

    /// Every invocation so far, one line of arguments each.
    pub(crate) fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub(crate) fn invoked(&self, prefix: &str) -> bool {
        self.calls().iter().any(|call| call.starts_with(prefix))
    }

    /// A context for user 1000 with an empty environment, talking to this
    /// podman.
    pub(crate) fn context(&self, assume_yes: bool) -> Context {
        let mut argv = vec!["toolbox", "list"];
        if assume_yes {
            argv.push("--assumeyes");
        }

        let global = Config::try_parse_from(argv).unwrap().global;
        Context::from_lookup(&global, Uid::from_raw(1000), None, |_| None).with_engine(self.engine())
    }
}

/// Case arm answering both labelled `podman ps` listings with `json`.
pub(crate) fn ps_arm(json: &str) -> String {
    format!("\"ps --all --format json --filter \"*) echo '{json}'; exit 0 ;;")
}
