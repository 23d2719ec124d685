use crate::{
    config::GlobalOptions,
    engine::Engine,
    probe::{DEFAULT_SYSTEM_BUS_ADDRESS, HostOs},
};
use anyhow::{Context as _, Result};
use nix::unistd::{Uid, User, getuid};
use std::{
    env,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Variables forwarded from the host into `podman create` and `podman exec`.
pub const PRESERVED_ENVIRONMENT: [&str; 22] = [
    "COLORTERM",
    "COLUMNS",
    "DBUS_SESSION_BUS_ADDRESS",
    "DBUS_SYSTEM_BUS_ADDRESS",
    "DESKTOP_SESSION",
    "DISPLAY",
    "LANG",
    "LINES",
    "SSH_AUTH_SOCK",
    "TERM",
    "USER",
    "VTE_VERSION",
    "WAYLAND_DISPLAY",
    "XDG_CURRENT_DESKTOP",
    "XDG_DATA_DIRS",
    "XDG_MENU_PREFIX",
    "XDG_RUNTIME_DIR",
    "XDG_SEAT",
    "XDG_SESSION_DESKTOP",
    "XDG_SESSION_ID",
    "XDG_SESSION_TYPE",
    "XDG_VTNR",
];

const FALLBACK_SHELL: &str = "/bin/bash";

/// Login details of the invoking user from the password database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub home: String,
    pub shell: String,
}

impl Account {
    fn lookup(uid: Uid) -> Option<Self> {
        match User::from_uid(uid) {
            Ok(Some(user)) => Some(Self {
                name: user.name,
                home: user.dir.to_string_lossy().into_owned(),
                shell: user.shell.to_string_lossy().into_owned(),
            }),
            Ok(None) => None,
            Err(error) => {
                debug!("Failed to look up user {}: {}", uid, error);
                None
            }
        }
    }
}

/// Everything a command needs to know about the invoking user, the host
/// and the global flags. Built once in `main` and passed down by reference.
#[derive(Debug, Clone)]
pub struct Context {
    engine: Engine,
    assume_yes: bool,
    uid: Uid,
    user: String,
    home: String,
    shell: String,
    workdir: String,
    xdg_runtime_dir: Option<String>,
    config_dir: PathBuf,
    toolbox_path: PathBuf,
    session_bus: Option<String>,
    system_bus: String,
    preserved: Vec<(String, String)>,
    host: HostOs,
}

impl Context {
    pub fn new(global: &GlobalOptions) -> Result<Self> {
        let uid = getuid();
        let account = Account::lookup(uid);

        let toolbox_path = match env::var_os("TOOLBOX_PATH") {
            Some(path) => PathBuf::from(path),
            None => env::current_exe().context("Failed to locate the toolbox binary")?,
        };

        let workdir = match env::var("PWD") {
            Ok(pwd) => pwd,
            Err(_) => env::current_dir()
                .context("Failed to get the current working directory")?
                .to_string_lossy()
                .into_owned(),
        };

        let mut context = Self::from_lookup(global, uid, account, |key| env::var(key).ok());
        context.toolbox_path = toolbox_path;
        context.workdir = workdir;
        context.host = HostOs::detect();

        debug!("TOOLBOX_PATH is {}", context.toolbox_path.display());
        Ok(context)
    }

    /// Builds a context from an arbitrary variable lookup, leaving out the
    /// parts that must touch the running process.
    pub fn from_lookup<F>(global: &GlobalOptions, uid: Uid, account: Option<Account>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let account = account.unwrap_or_default();

        let user = match lookup("USER") {
            Some(user) if account.name.is_empty() => user,
            _ => account.name,
        };

        let home = if account.home.is_empty() {
            lookup("HOME").unwrap_or_default()
        } else {
            account.home
        };

        let shell = lookup("SHELL")
            .or_else(|| Some(account.shell).filter(|shell| !shell.is_empty()))
            .unwrap_or_else(|| FALLBACK_SHELL.to_string());

        let config_dir = match lookup("XDG_CONFIG_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => Path::new(&home).join(".config"),
        };

        let preserved = PRESERVED_ENVIRONMENT
            .iter()
            .filter_map(|key| lookup(key).map(|value| (key.to_string(), value)))
            .collect();

        let log_level = global.effective_log_level();

        Self {
            engine: Engine::new(global.log_podman, log_level),
            assume_yes: global.assumeyes,
            uid,
            user,
            home,
            shell,
            workdir: lookup("PWD").unwrap_or_else(|| String::from("/")),
            xdg_runtime_dir: lookup("XDG_RUNTIME_DIR"),
            config_dir,
            toolbox_path: lookup("TOOLBOX_PATH").map(PathBuf::from).unwrap_or_default(),
            session_bus: lookup("DBUS_SESSION_BUS_ADDRESS"),
            system_bus: lookup("DBUS_SYSTEM_BUS_ADDRESS")
                .unwrap_or_else(|| DEFAULT_SYSTEM_BUS_ADDRESS.to_string()),
            preserved,
            host: HostOs::default(),
        }
    }

    #[inline]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[cfg(test)]
    pub(crate) fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    #[inline]
    pub fn assume_yes(&self) -> bool {
        self.assume_yes
    }

    #[inline]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    #[inline]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[inline]
    pub fn home(&self) -> &str {
        &self.home
    }

    #[inline]
    pub fn shell(&self) -> &str {
        &self.shell
    }

    #[inline]
    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    #[inline]
    pub fn toolbox_path(&self) -> &Path {
        &self.toolbox_path
    }

    #[inline]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    #[inline]
    pub fn session_bus(&self) -> Option<&str> {
        self.session_bus.as_deref()
    }

    #[inline]
    pub fn system_bus(&self) -> &str {
        &self.system_bus
    }

    #[inline]
    pub fn host(&self) -> &HostOs {
        &self.host
    }

    /// Allow-listed variables that are set, in a stable order.
    #[inline]
    pub fn preserved_environment(&self) -> &[(String, String)] {
        &self.preserved
    }

    /// `XDG_RUNTIME_DIR`, falling back to `/run/user/<uid>`.
    pub fn runtime_dir_for(&self, uid: u32) -> PathBuf {
        match &self.xdg_runtime_dir {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from(format!("/run/user/{uid}")),
        }
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir_for(self.uid.as_raw())
    }

    /// Directory shared between the host and its containers, holding the
    /// readiness stamps.
    pub fn toolbox_runtime_dir(&self) -> PathBuf {
        self.runtime_dir().join("toolbox")
    }
}

/// Readiness stamp written by the initializer running as `pid`.
pub fn initialized_stamp(toolbox_runtime_dir: &Path, pid: i64) -> PathBuf {
    toolbox_runtime_dir.join(format!("container-initialized-{pid}"))
}
