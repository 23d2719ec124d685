use anyhow::{Context, Result};
use nix::mount::{MsFlags, mount};
use std::{
    fs::{self, OpenOptions},
    path::Path,
};
use tracing::debug;

/// Extra behavior applied on top of a recursive bind mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    ReadWrite,
    ReadOnly,
    Slave,
}

/// A host path exposed at a location inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindMount<'a> {
    pub target: &'a str,
    pub source: &'a str,
    pub mode: BindMode,
}

impl<'a> BindMount<'a> {
    pub const fn new(target: &'a str, source: &'a str, mode: BindMode) -> Self {
        Self {
            target,
            source,
            mode,
        }
    }

    /// Performs the mount. Sources that do not exist are skipped.
    pub fn apply(&self) -> Result<()> {
        let source = Path::new(self.source);
        let target = Path::new(self.target);

        if !prepare_target(source, target)? {
            debug!("Skipping {}: {} does not exist", self.target, self.source);
            return Ok(());
        }

        debug!("Binding {} to {} ({:?})", self.target, self.source, self.mode);
        bind_recursive(source, target)?;

        match self.mode {
            BindMode::ReadWrite => Ok(()),
            BindMode::ReadOnly => remount_read_only(target),
            BindMode::Slave => set_slave_recursive(target),
        }
    }
}

/// Creates a mount point of the same kind as `source`. Returns `false` when
/// the source is missing.
pub(crate) fn prepare_target(source: &Path, target: &Path) -> Result<bool> {
    let metadata = match fs::metadata(source) {
        Ok(metadata) => metadata,
        Err(_) => return Ok(false),
    };

    if metadata.is_dir() {
        fs::create_dir_all(target)
            .with_context(|| format!("Failed to create directory {}", target.display()))?;
    } else if !target.exists() {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(target)
            .with_context(|| format!("Failed to create file {}", target.display()))?;
    }

    Ok(true)
}

fn bind_recursive(source: &Path, target: &Path) -> Result<()> {
    let flags = MsFlags::MS_BIND | MsFlags::MS_REC | MsFlags::MS_SILENT;
    mount::<Path, Path, str, str>(Some(source), target, None, flags, None).with_context(|| {
        format!("Failed to bind {} to {}", target.display(), source.display())
    })
}

fn remount_read_only(target: &Path) -> Result<()> {
    let flags = MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY;
    mount::<str, Path, str, str>(None, target, None, flags, None)
        .with_context(|| format!("Failed to remount {} read-only", target.display()))
}

/// Marks the mount as a recursive slave, so host mounts propagate in but
/// not back out.
fn set_slave_recursive(target: &Path) -> Result<()> {
    let flags = MsFlags::MS_REC | MsFlags::MS_SLAVE;
    mount::<str, Path, str, str>(None, target, None, flags, None)
        .with_context(|| format!("Failed to make {} a slave mount", target.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_target_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");

        assert!(!prepare_target(&dir.path().join("missing"), &target).unwrap());
        assert!(!target.exists());
    }

    #[test]
    fn test_prepare_target_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("run/libvirt");

        assert!(prepare_target(dir.path(), &target).unwrap());
        assert!(target.is_dir());
    }

    #[test]
    fn test_prepare_target_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("machine-id");
        let target = dir.path().join("etc/machine-id");
        fs::write(&source, "abc\n").unwrap();

        assert!(prepare_target(&source, &target).unwrap());
        assert!(target.is_file());
        assert_eq!(fs::read_to_string(&target).unwrap(), "");
    }

    #[test]
    fn test_missing_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("journal");
        let source = dir.path().join("missing");

        let mount = BindMount::new(
            target.to_str().unwrap(),
            source.to_str().unwrap(),
            BindMode::ReadOnly,
        );
        assert!(mount.apply().is_ok());
    }
}
