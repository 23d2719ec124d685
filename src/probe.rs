//! Read-only queries about the host, used to parameterize container
//! creation. Apart from the tools they shell out to, none of these have
//! side effects.

use crate::{engine::Engine, utils::{self, command_output}};
use anyhow::{Context, Result, bail};
use nix::unistd::Group;
use std::{
    fs,
    path::{Path, PathBuf},
};
use sysinfo::System;
use tracing::{debug, error, warn};

const SUDO_GROUPS: [&str; 2] = ["sudo", "wheel"];
const PROFILE_PATHS: [&str; 2] = [
    "/etc/profile.d/toolbox.sh",
    "/usr/share/profile.d/toolbox.sh",
];

pub const DEFAULT_SYSTEM_BUS_ADDRESS: &str = "unix:path=/var/run/dbus/system_bus_socket";

/// Platform identifier and version of the host, as in `os-release(5)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostOs {
    /// `ID`, e.g. `fedora`.
    pub platform: String,

    /// `VERSION_ID`, e.g. `38` or `rawhide`.
    pub version: String,
}

impl HostOs {
    /// Reads `ID` and `VERSION_ID` from the host's os-release file.
    pub fn detect() -> Self {
        let host = Self::from_release(Some(System::distribution_id()), System::os_version());

        if host.platform.is_empty() {
            error!("Failed to identify the host operating system");
        }

        host
    }

    /// sysinfo falls back to the kernel name when no os-release file was
    /// found, which is no distribution at all.
    pub fn from_release(id: Option<String>, version_id: Option<String>) -> Self {
        let platform = id
            .filter(|id| id != std::env::consts::OS)
            .unwrap_or_default();

        Self {
            platform,
            version: version_id.unwrap_or_default(),
        }
    }
}

/// Name of the group granting sudo: `sudo` on Debian-likes, `wheel` on
/// Fedora-likes.
pub fn sudo_group() -> Option<&'static str> {
    SUDO_GROUPS.into_iter().find(|name| match Group::from_name(name) {
        Ok(Some(_)) => true,
        Ok(None) => false,
        Err(error) => {
            debug!("Failed to look up group {}: {}", name, error);
            false
        }
    })
}

/// Mount point of the filesystem containing `path`.
pub fn mount_point(path: &str) -> Result<String> {
    let output = command_output("df", &["--output=target", path])?;
    parse_df_target(&output).with_context(|| format!("Unexpected df output for {path}"))
}

fn parse_df_target(output: &str) -> Option<String> {
    output
        .lines()
        .nth(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

/// Mount options of the mount point `target`, comma separated.
pub fn mount_options(target: &str) -> Result<String> {
    let output = command_output("findmnt", &["--noheadings", "--output", "OPTIONS", target])?;

    match output.lines().next().map(str::trim) {
        Some(options) if !options.is_empty() => Ok(options.to_string()),
        _ => bail!("findmnt reported no options for {target}"),
    }
}

/// Bind-mount flag for `/usr` inside the container: read-only unless the
/// host itself has `/usr` mounted read-write.
pub fn usr_mount_flag(host_options: &str) -> &'static str {
    if host_options.split(',').any(|option| option.trim() == "ro") {
        "ro"
    } else {
        "rw"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
}

impl CgroupVersion {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "v1" | "1" => Some(Self::V1),
            "v2" | "2" => Some(Self::V2),
            _ => None,
        }
    }

    /// Low-level OCI runtime able to drive this cgroup hierarchy.
    pub fn oci_runtime(&self) -> &'static str {
        match self {
            Self::V1 => "runc",
            Self::V2 => "crun",
        }
    }
}

pub fn cgroup_version(engine: &Engine) -> Result<CgroupVersion> {
    let info = engine.info().context("Failed to query podman info")?;
    let reported = info.host.cgroup_version;

    CgroupVersion::parse(&reported)
        .with_context(|| format!("Unknown cgroup version '{reported}'"))
}

/// Canonical path of `path`, or `None` if it cannot be resolved.
pub fn resolve_symlink<P: AsRef<Path>>(path: P) -> Option<PathBuf> {
    let path = path.as_ref();

    match fs::canonicalize(path) {
        Ok(resolved) => Some(resolved),
        Err(error) => {
            error!("Failed to resolve {}: {}", path.display(), error);
            None
        }
    }
}

/// Returns `true` if `path` is a symbolic link pointing at `target`,
/// written either relative to `/` or as an absolute path.
pub fn is_symlink_to<P: AsRef<Path>>(path: P, target: &str) -> bool {
    let Ok(link) = fs::read_link(path.as_ref()) else {
        return false;
    };

    let relative = target.trim_start_matches('/');
    link == Path::new(relative) || link == Path::new("/").join(relative)
}

/// Extracts the socket path from a D-Bus address of the form
/// `unix:path=/run/dbus/system_bus_socket[,guid=...]`.
pub fn bus_socket_path(address: &str) -> Option<PathBuf> {
    address
        .split(';')
        .filter_map(|candidate| candidate.strip_prefix("unix:"))
        .flat_map(|params| params.split(','))
        .find_map(|param| param.strip_prefix("path="))
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

/// Socket of the Kerberos credential cache manager advertised by
/// `sssd-kcm.socket`, if it is a usable `AF_UNIX` stream socket.
pub fn kcm_socket() -> Option<PathBuf> {
    let args = ["show", "--value", "--property", "Listen", "sssd-kcm.socket"];

    match command_output("systemctl", &args) {
        Ok(listen) => parse_kcm_listen(&listen),
        Err(error) => {
            warn!("Failed to read property Listen from sssd-kcm.socket: {:#}", error);
            None
        }
    }
}

pub(crate) fn parse_kcm_listen(listen: &str) -> Option<PathBuf> {
    let listen = listen.lines().next().unwrap_or_default().trim();

    if listen.is_empty() {
        warn!("Property Listen of sssd-kcm.socket is empty");
        return None;
    }

    let Some(path) = listen.strip_suffix(" (Stream)") else {
        warn!("Unknown socket in sssd-kcm.socket: expected SOCK_STREAM, got {listen}");
        return None;
    };

    if !path.starts_with('/') {
        warn!("Unknown socket in sssd-kcm.socket: expected an AF_UNIX file system socket, got {listen}");
        return None;
    }

    Some(PathBuf::from(path))
}

/// Shell profile snippet shipped by the host, if any.
pub fn toolbox_profile() -> Option<&'static str> {
    PROFILE_PATHS.into_iter().find(|path| utils::path_exists(path))
}

pub fn is_inside_container() -> bool {
    utils::path_exists("/run/.containerenv") || utils::path_exists("/.dockerenv")
}

pub fn is_inside_toolbox() -> bool {
    utils::path_exists("/run/.toolboxenv")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_os_from_release() {
        let host = HostOs::from_release(Some("fedora".into()), Some("38".into()));
        assert_eq!(host.platform, "fedora");
        assert_eq!(host.version, "38");

        let host = HostOs::from_release(Some("ubuntu".into()), None);
        assert_eq!(host.platform, "ubuntu");
        assert_eq!(host.version, "");
    }

    #[test]
    fn test_host_os_without_release_file() {
        let host = HostOs::from_release(Some(std::env::consts::OS.into()), None);
        assert_eq!(host, HostOs::default());
    }

    #[test]
    fn test_usr_mount_flag() {
        assert_eq!(usr_mount_flag("rw,relatime"), "rw");
        assert_eq!(usr_mount_flag("ro,relatime"), "ro");
        assert_eq!(usr_mount_flag("rw,relatime,seclabel,errors=remount-ro"), "rw");
        assert_eq!(usr_mount_flag("relatime,ro"), "ro");
    }

    #[test]
    fn test_parse_df_target() {
        let output = "Mounted on\n/usr\n";
        assert_eq!(parse_df_target(output).as_deref(), Some("/usr"));
        assert_eq!(parse_df_target("Mounted on\n"), None);
    }

    #[test]
    fn test_cgroup_version() {
        assert_eq!(CgroupVersion::parse("v2"), Some(CgroupVersion::V2));
        assert_eq!(CgroupVersion::parse("v1").map(|v| v.oci_runtime()), Some("runc"));
        assert_eq!(CgroupVersion::V2.oci_runtime(), "crun");
        assert_eq!(CgroupVersion::parse("v3"), None);
    }

    #[test]
    fn test_bus_socket_path() {
        assert_eq!(
            bus_socket_path(DEFAULT_SYSTEM_BUS_ADDRESS),
            Some(PathBuf::from("/var/run/dbus/system_bus_socket"))
        );
        assert_eq!(
            bus_socket_path("unix:path=/run/user/1000/bus,guid=abc"),
            Some(PathBuf::from("/run/user/1000/bus"))
        );
        assert_eq!(bus_socket_path("unix:abstract=/tmp/dbus-xyz"), None);
        assert_eq!(
            bus_socket_path("tcp:host=localhost;unix:path=/run/bus"),
            Some(PathBuf::from("/run/bus"))
        );
    }

    #[test]
    fn test_parse_kcm_listen() {
        assert_eq!(
            parse_kcm_listen("/run/.heim_org.h5l.kcm-socket (Stream)\n"),
            Some(PathBuf::from("/run/.heim_org.h5l.kcm-socket"))
        );
        assert_eq!(parse_kcm_listen(""), None);
        assert_eq!(parse_kcm_listen("/run/kcm (Datagram)"), None);
        assert_eq!(parse_kcm_listen("127.0.0.1:88 (Stream)"), None);
    }

    #[test]
    fn test_is_symlink_to() {
        let dir = tempfile::tempdir().unwrap();
        let relative = dir.path().join("media");
        let absolute = dir.path().join("mnt");
        let plain = dir.path().join("home");

        std::os::unix::fs::symlink("run/media", &relative).unwrap();
        std::os::unix::fs::symlink("/var/mnt", &absolute).unwrap();
        fs::create_dir(&plain).unwrap();

        assert!(is_symlink_to(&relative, "/run/media"));
        assert!(is_symlink_to(&absolute, "/var/mnt"));
        assert!(!is_symlink_to(&absolute, "/run/mnt"));
        assert!(!is_symlink_to(&plain, "/var/home"));
    }
}
