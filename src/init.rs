//! Entry point of toolbox containers.
//!
//! Runs as root inside the container: points host-synced configuration at
//! the host's copies, creates the invoking user, then signals readiness
//! through a stamp file and sleeps for the life of the container.

use crate::{
    capabilities,
    config::InitContainerArgs,
    context::{Context, initialized_stamp},
    log_capability_snapshot,
    mount::{BindMode, BindMount},
    probe, utils,
};
use anyhow::{Context as _, Result, bail};
use nix::unistd::{Gid, Uid, User, chown, execvp, getpid};
use std::{
    ffi::CString,
    fs::{self, DirBuilder, File, OpenOptions},
    io::{self, Write},
    os::unix::fs::{DirBuilderExt, OpenOptionsExt, symlink},
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, warn};

const HOST_ROOT: &str = "/run/host";
const TOOLBOX_ENV: &str = "/run/.toolboxenv";
const KRB5_CONF_DIR: &str = "/etc/krb5.conf.d";
const KCM_SNIPPET_NAME: &str = "kcm_default_ccache";
const MAX_SYMLINK_DEPTH: usize = 40;

const KCM_SNIPPET: &str = "# Written by Toolbox
# https://github.com/containers/toolbox
#
# # To disable the KCM credential cache, comment out the following lines.

[libdefaults]
    default_ccache_name = KCM:
";

/// Bind mounts from the host's file system. Only a failure to bind
/// `/etc/machine-id` aborts initialization.
const HOST_MOUNTS: [BindMount<'static>; 6] = [
    BindMount::new("/etc/machine-id", "/run/host/etc/machine-id", BindMode::ReadOnly),
    BindMount::new("/run/libvirt", "/run/host/run/libvirt", BindMode::ReadWrite),
    BindMount::new("/run/systemd/journal", "/run/host/run/systemd/journal", BindMode::ReadWrite),
    BindMount::new("/var/lib/flatpak", "/run/host/var/lib/flatpak", BindMode::ReadOnly),
    BindMount::new("/var/log/journal", "/run/host/var/log/journal", BindMode::ReadOnly),
    BindMount::new("/var/mnt", "/run/host/var/mnt", BindMode::Slave),
];

const SELINUX_MOUNT: BindMount<'static> =
    BindMount::new("/sys/fs/selinux", "/usr/share/empty", BindMode::ReadWrite);

const HOST_ETC_REDIRECTS: [(&str, &str); 3] = [
    ("/etc/host.conf", "/run/host/etc/host.conf"),
    ("/etc/hosts", "/run/host/etc/hosts"),
    ("/etc/resolv.conf", "/run/host/etc/resolv.conf"),
];

const MONITOR_REDIRECTS: [(&str, &str); 2] = [
    ("/etc/localtime", "/run/host/monitor/localtime"),
    ("/etc/timezone", "/run/host/monitor/timezone"),
];

/// Outcome of [`redirect_path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect {
    /// Already a link to the resolved target.
    Unchanged,
    Linked,
    /// The target does not exist, so there is nothing to link to.
    Skipped,
}

pub fn init_container(context: &Context, args: &InitContainerArgs) -> Result<()> {
    if !probe::is_inside_container() {
        bail!("the 'init-container' command can only be used inside containers");
    }

    let runtime_dir = context.runtime_dir_for(args.uid);
    debug!("XDG_RUNTIME_DIR is {}", runtime_dir.display());

    debug!("Creating {}", TOOLBOX_ENV);
    File::create(TOOLBOX_ENV).with_context(|| format!("Failed to create {TOOLBOX_ENV}"))?;

    if args.monitor_host {
        monitor_host()?;
    }

    if args.media_link {
        redirect_path("/media", "/run/media", true, Path::new(HOST_ROOT))?;
    }

    if args.mnt_link {
        redirect_path("/mnt", "/var/mnt", true, Path::new(HOST_ROOT))?;
    }

    if !user_exists(&args.user) {
        if args.home_link {
            redirect_path("/home", "/var/home", true, Path::new(HOST_ROOT))?;
        }

        add_user(args)?;
    }

    if write_kcm_snippet(Path::new(KRB5_CONF_DIR))? {
        debug!("Set KCM as the default Kerberos credential cache");
    }

    debug!("Finished initializing container");

    let stamp = create_stamp(
        &runtime_dir.join("toolbox"),
        getpid().as_raw(),
        Uid::from_raw(args.uid),
        Gid::from_raw(args.uid),
    )?;
    debug!("Created initialization stamp {}", stamp.display());

    debug!("Going to sleep");
    sleep_forever()
}

fn monitor_host() -> Result<()> {
    debug!("Monitoring host");
    let host_root = Path::new(HOST_ROOT);

    if utils::path_exists("/run/host/etc") {
        for (container_path, target) in HOST_ETC_REDIRECTS {
            if let Err(err) = redirect_path(container_path, target, false, host_root) {
                error!("Failed to redirect {}: {:#}", container_path, err);
            }
        }

        match capabilities::can_mount() {
            Ok(true) => {}
            Ok(false) => warn!("CAP_SYS_ADMIN is not in the effective set; bind mounts will likely fail"),
            Err(err) => debug!("{:#}", err),
        }
        log_capability_snapshot!("Before binding host paths");

        for mount in HOST_MOUNTS {
            match mount.apply() {
                Ok(()) => {}
                Err(err) if mount.target == "/etc/machine-id" => return Err(err),
                Err(err) => error!("{:#}", err),
            }
        }

        if utils::path_exists(SELINUX_MOUNT.target) {
            if let Err(err) = SELINUX_MOUNT.apply() {
                error!("{:#}", err);
            }
        }
    }

    if utils::path_exists("/run/host/monitor") {
        debug!("Path /run/host/monitor exists");

        for (container_path, target) in MONITOR_REDIRECTS {
            if let Err(err) = redirect_path(container_path, target, false, host_root) {
                error!("Failed to redirect {}: {:#}", container_path, err);
            }
        }
    }

    Ok(())
}

/// Replaces `container_path` with a symbolic link to `target`, following
/// `target` to its final destination first. Absolute links met on the way
/// from a host path are re-rooted under `host_root`, where the container
/// sees the host's file system.
///
/// With `folder`, `target` is created if missing and removing the old
/// `container_path` must succeed.
pub fn redirect_path<P, Q>(container_path: P, target: Q, folder: bool, host_root: &Path) -> Result<Redirect>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let container_path = container_path.as_ref();
    let target = target.as_ref();
    debug!("Preparing to redirect {} to {}", container_path.display(), target.display());

    if folder {
        fs::create_dir_all(target)
            .with_context(|| format!("Failed to create folder {}", target.display()))?;
    }

    let on_host = target.starts_with(host_root);
    let resolved_target = match follow_symlink(target, on_host.then_some(host_root)) {
        Ok(resolved) => resolved,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("{} does not exist; not redirecting {}", target.display(), container_path.display());
            return Ok(Redirect::Skipped);
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to resolve {}", target.display()));
        }
    };
    debug!("Target {} was resolved to {}", target.display(), resolved_target.display());

    if let Ok(resolved) = follow_symlink(container_path, None) {
        if resolved == resolved_target {
            debug!("{} already points to {}", container_path.display(), resolved_target.display());
            return Ok(Redirect::Unchanged);
        }
    }

    info!("Redirecting {} to {}", container_path.display(), resolved_target.display());

    match remove_path(container_path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) if folder => {
            return Err(err)
                .with_context(|| format!("Failed to delete folder {}", container_path.display()));
        }
        Err(err) => debug!("Failed to remove {}: {}", container_path.display(), err),
    }

    symlink(&resolved_target, container_path).with_context(|| {
        format!(
            "Failed to redirect {} to {}",
            container_path.display(),
            resolved_target.display()
        )
    })?;

    Ok(Redirect::Linked)
}

/// Follows a chain of symbolic links to the first path that is not one.
/// The final path must exist.
fn follow_symlink(path: &Path, host_root: Option<&Path>) -> io::Result<PathBuf> {
    let mut current = path.to_path_buf();

    for _ in 0..MAX_SYMLINK_DEPTH {
        let metadata = fs::symlink_metadata(&current)?;
        if !metadata.file_type().is_symlink() {
            return Ok(current);
        }

        let link = fs::read_link(&current)?;

        current = if link.is_absolute() {
            match host_root {
                Some(root) => root.join(link.strip_prefix("/").unwrap_or(&link)),
                None => link,
            }
        } else {
            current.parent().unwrap_or(Path::new("/")).join(link)
        };
    }

    Err(io::Error::other(format!(
        "too many levels of symbolic links in {}",
        path.display()
    )))
}

fn remove_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    }
}

fn user_exists(name: &str) -> bool {
    match User::from_name(name) {
        Ok(user) => user.is_some(),
        Err(err) => {
            debug!("Failed to look up user {}: {}", name, err);
            false
        }
    }
}

fn add_user(args: &InitContainerArgs) -> Result<()> {
    let sudo_group = probe::sudo_group()
        .with_context(|| format!("Failed to add user {}: group for sudo was not found", args.user))?;
    debug!("Group for sudo is {}", sudo_group);

    let useradd = useradd_args(args, sudo_group);
    debug!("Adding user {} with UID {}: useradd {:?}", args.user, args.uid, useradd);

    utils::run_command("useradd", &useradd)
        .with_context(|| format!("Failed to add user {} with UID {}", args.user, args.uid))?;

    debug!("Removing password for user {}", args.user);
    utils::run_command("passwd", &["--delete", args.user.as_str()])
        .with_context(|| format!("Failed to remove password for user {}", args.user))?;

    debug!("Removing password for user root");
    utils::run_command("passwd", &["--delete", "root"])
        .context("Failed to remove password for root")
}

fn useradd_args(args: &InitContainerArgs, sudo_group: &str) -> Vec<String> {
    vec![
        "--home-dir".into(),
        args.home.clone(),
        "--no-create-home".into(),
        "--shell".into(),
        args.shell.clone(),
        "--uid".into(),
        args.uid.to_string(),
        "--groups".into(),
        sudo_group.to_string(),
        args.user.clone(),
    ]
}

/// Makes KCM the default Kerberos credential cache, unless the directory
/// is missing or the snippet was already written. Returns `true` if written.
fn write_kcm_snippet(krb5_conf_dir: &Path) -> Result<bool> {
    let path = krb5_conf_dir.join(KCM_SNIPPET_NAME);

    if !utils::path_exists(krb5_conf_dir) || utils::path_exists(&path) {
        return Ok(false);
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    file.write_all(KCM_SNIPPET.as_bytes())
        .context("Failed to set KCM as the default Kerberos credential cache")?;

    Ok(true)
}

/// Creates `<dir>/container-initialized-<pid>`, owned by the user.
fn create_stamp(toolbox_runtime_dir: &Path, pid: i32, uid: Uid, gid: Gid) -> Result<PathBuf> {
    let owner = Some(uid);
    let group = Some(gid);

    debug!("Creating runtime directory {}", toolbox_runtime_dir.display());
    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(toolbox_runtime_dir)
        .with_context(|| format!("Failed to create runtime directory {}", toolbox_runtime_dir.display()))?;

    chown(toolbox_runtime_dir, owner, group).with_context(|| {
        format!(
            "Failed to change ownership of the runtime directory {}",
            toolbox_runtime_dir.display()
        )
    })?;

    let stamp = initialized_stamp(toolbox_runtime_dir, i64::from(pid));
    File::create(&stamp).context("Failed to create initialization stamp")?;
    chown(&stamp, owner, group).context("Failed to change ownership of initialization stamp")?;

    Ok(stamp)
}

/// Replaces this process with `sleep +Inf`, keeping the PID the stamp was
/// named after.
fn sleep_forever() -> Result<()> {
    let program = CString::new("sleep")?;
    let args = [CString::new("sleep")?, CString::new("+Inf")?];

    match execvp(&program, &args) {
        Ok(never) => match never {},
        Err(errno) => Err(errno).context("Failed to invoke sleep(1)"),
    }
}
