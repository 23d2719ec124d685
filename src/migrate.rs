//! Runs `podman system migrate` once after podman is upgraded, so existing
//! containers keep working with the new release.

use crate::{context::Context, engine::compare_versions};
use anyhow::{Context as _, Result};
use std::{
    cmp::Ordering,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

const STAMP_NAME: &str = "podman-system-migrate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No version was recorded yet.
    Record,
    /// The recorded version matches the running one.
    Unchanged,
    /// Podman was downgraded. The stamp is updated without migrating.
    Downgraded,
    Migrate,
}

impl Decision {
    pub fn new(stored: Option<&str>, current: &str) -> Self {
        let Some(stored) = stored.map(str::trim).filter(|stored| !stored.is_empty()) else {
            return Self::Record;
        };

        match compare_versions(current, stored) {
            Ordering::Equal => Self::Unchanged,
            Ordering::Less => Self::Downgraded,
            Ordering::Greater => Self::Migrate,
        }
    }
}

pub fn stamp_path(config_dir: &Path) -> PathBuf {
    config_dir.join("toolbox").join(STAMP_NAME)
}

fn read_stamp(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.lines().next().map(str::to_string)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("Could not read {}", path.display())),
    }
}

fn write_stamp(path: &Path, version: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Configuration directory {} not created", parent.display()))?;
    }

    fs::write(path, version)
        .with_context(|| format!("Could not update version of Podman in {}", path.display()))
}

pub fn migrate(context: &Context) -> Result<()> {
    let engine = context.engine();
    let path = stamp_path(context.config_dir());

    let current = engine
        .version()
        .context("Could not get the version of Podman")?;
    debug!("Current Podman version is {}", current);

    let stored = read_stamp(&path)?;
    let decision = Decision::new(stored.as_deref(), &current);
    debug!("Podman version recorded in {} is {:?}: {:?}", path.display(), stored, decision);

    match decision {
        Decision::Unchanged => return Ok(()),
        Decision::Record | Decision::Downgraded => {}
        Decision::Migrate => {
            engine
                .system_migrate(None)
                .context("Unable to migrate containers")?;
            debug!("Migration to Podman version {} was ok", current);
        }
    }

    info!("Updating Podman version in {}", path.display());
    write_stamp(&path, &current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision() {
        assert_eq!(Decision::new(None, "1.8.0"), Decision::Record);
        assert_eq!(Decision::new(Some(""), "1.8.0"), Decision::Record);
        assert_eq!(Decision::new(Some("1.8.0\n"), "1.8.0"), Decision::Unchanged);
        assert_eq!(Decision::new(Some("1.8.0"), "1.9.1"), Decision::Migrate);
        assert_eq!(Decision::new(Some("2.0.0"), "1.9.1"), Decision::Downgraded);
    }

    #[test]
    fn test_stamp_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = stamp_path(dir.path());

        assert_eq!(read_stamp(&path).unwrap(), None);

        write_stamp(&path, "1.9.1").unwrap();
        assert_eq!(read_stamp(&path).unwrap().as_deref(), Some("1.9.1"));
        assert!(path.ends_with("toolbox/podman-system-migrate"));

        write_stamp(&path, "2.0.0").unwrap();
        assert_eq!(read_stamp(&path).unwrap().as_deref(), Some("2.0.0"));
    }
}
