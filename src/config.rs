use crate::reference::validate_name;
use anyhow::{Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

const HEADING_GENERAL: &str = "General";
const HEADING_LOGGING: &str = "Logging";
const HEADING_IMAGE: &str = "Image";
const HEADING_USER: &str = "User";
const HEADING_HOST: &str = "Host";

#[derive(Parser, Debug)]
#[command(
    name = "toolbox",
    version,
    about = "Unprivileged development environment",
    long_about = "Toolbox offers a familiar package based environment for developing and \
                  debugging software that runs fully unprivileged using podman."
)]
pub struct Config {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct GlobalOptions {
    #[arg(
        short = 'y',
        long,
        global = true,
        help = "Automatically answer yes for all questions",
        help_heading = HEADING_GENERAL
    )]
    pub assumeyes: bool,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = LogLevel::Warn,
        help = "Log messages at or above this level",
        help_heading = HEADING_LOGGING
    )]
    pub log_level: LogLevel,

    #[arg(
        long,
        global = true,
        help = "Show the log output of podman, using the same log level",
        help_heading = HEADING_LOGGING
    )]
    pub log_podman: bool,

    #[arg(
        long,
        global = true,
        hide = true,
        help = "Set log level to 'debug' (deprecated, use --log-level)",
        help_heading = HEADING_LOGGING
    )]
    pub verbose: bool,
}

impl GlobalOptions {
    /// Level in effect once the deprecated `--verbose` is taken into account.
    pub fn effective_log_level(&self) -> LogLevel {
        if self.verbose {
            LogLevel::Debug
        } else {
            self.log_level
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new toolbox container
    Create(CreateArgs),

    /// Enter a toolbox container for interactive use
    Enter(EnterArgs),

    /// Run a command in an existing toolbox container
    Run(RunArgs),

    /// List existing toolbox containers and images
    List(ListArgs),

    /// Remove one or more toolbox containers
    Rm(RemoveArgs),

    /// Remove one or more toolbox images
    Rmi(RemoveArgs),

    /// Initialize a running container
    #[command(hide = true)]
    InitContainer(InitContainerArgs),
}

impl Command {
    #[inline]
    pub fn is_init_container(&self) -> bool {
        matches!(self, Command::InitContainer(_))
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct CreateArgs {
    #[arg(value_parser = parse_container_name, help = "Name of the toolbox container")]
    pub name: Option<String>,

    #[arg(
        short,
        long,
        help = "Change the name of the base image used to create the toolbox container",
        help_heading = HEADING_IMAGE
    )]
    pub image: Option<String>,

    #[arg(
        short,
        long,
        help = "Create a toolbox container for a different operating system release than the host",
        help_heading = HEADING_IMAGE
    )]
    pub release: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EnterArgs {
    #[arg(value_parser = parse_container_name, help = "Name of the toolbox container")]
    pub container: Option<String>,

    #[arg(
        short,
        long,
        help = "Enter a toolbox container for a different operating system release than the host",
        help_heading = HEADING_IMAGE
    )]
    pub release: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(
        short,
        long,
        help = "Run the command inside the system default container"
    )]
    pub default: bool,

    #[arg(
        short,
        long,
        help = "Run the command inside a toolbox container for a different operating system release",
        help_heading = HEADING_IMAGE
    )]
    pub release: Option<String>,

    #[arg(long, hide = true)]
    pub escape_sequence: bool,

    #[arg(long, hide = true)]
    pub fallback_to_bash: bool,

    #[arg(long, hide = true, default_value_t = true, action = ArgAction::Set)]
    pub prompt_for_create: bool,

    #[arg(long, hide = true, default_value_t = true, action = ArgAction::Set)]
    pub pedantic: bool,

    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "ARGS",
        help = "Container name (unless --default or --release) followed by the command"
    )]
    pub args: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[arg(short, long, help = "List only toolbox containers, not images")]
    pub containers: bool,

    #[arg(short, long, help = "List only toolbox images, not containers")]
    pub images: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RemoveArgs {
    #[arg(short, long, help = "Remove all toolbox containers or images")]
    pub all: bool,

    #[arg(
        short,
        long,
        help = "Force the removal of running containers or images in use"
    )]
    pub force: bool,

    #[arg(help = "Names or IDs to remove")]
    pub targets: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct InitContainerArgs {
    #[arg(
        long,
        help = "Create a user inside the toolbox container whose login directory is HOME",
        help_heading = HEADING_USER
    )]
    pub home: String,

    #[arg(
        long,
        help = "Create a user inside the toolbox container whose login shell is SHELL",
        help_heading = HEADING_USER
    )]
    pub shell: String,

    #[arg(
        long,
        help = "Create a user inside the toolbox container whose numerical user ID is UID",
        help_heading = HEADING_USER
    )]
    pub uid: u32,

    #[arg(
        long,
        help = "Create a user inside the toolbox container whose login name is USER",
        help_heading = HEADING_USER
    )]
    pub user: String,

    #[arg(long, help = "Make /home a symbolic link to /var/home", help_heading = HEADING_HOST)]
    pub home_link: bool,

    #[arg(long, help = "Make /media a symbolic link to /run/media", help_heading = HEADING_HOST)]
    pub media_link: bool,

    #[arg(long, help = "Make /mnt a symbolic link to /var/mnt", help_heading = HEADING_HOST)]
    pub mnt_link: bool,

    #[arg(
        long,
        help = "Keep certain configuration files inside the container in sync with the host",
        help_heading = HEADING_HOST
    )]
    pub monitor_host: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Debug and trace also echo the engine's own diagnostics.
    #[inline]
    pub fn is_verbose(&self) -> bool {
        matches!(self, LogLevel::Trace | LogLevel::Debug)
    }
}

fn parse_container_name(input: &str) -> Result<String> {
    if !validate_name(input) {
        bail!("container names must match [a-zA-Z0-9][a-zA-Z0-9_.-]*");
    }

    Ok(input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Config::command().debug_assert();
    }

    #[test]
    fn test_create_rejects_invalid_name() {
        let result = Config::try_parse_from(["toolbox", "create", "-bad"]);
        assert!(result.is_err());

        let result = Config::try_parse_from(["toolbox", "create", "my box"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_create_accepts_valid_name() {
        let config = Config::try_parse_from(["toolbox", "create", "mybox", "-r", "38"]).unwrap();

        match config.command {
            Command::Create(args) => {
                assert_eq!(args.name.as_deref(), Some("mybox"));
                assert_eq!(args.release.as_deref(), Some("38"));
                assert_eq!(args.image, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_run_keeps_command_flags() {
        let config =
            Config::try_parse_from(["toolbox", "run", "mybox", "ls", "-la", "--color"]).unwrap();

        match config.command {
            Command::Run(args) => {
                assert_eq!(args.args, ["mybox", "ls", "-la", "--color"]);
                assert!(args.pedantic);
                assert!(args.prompt_for_create);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let config =
            Config::try_parse_from(["toolbox", "list", "-y", "--log-level", "debug"]).unwrap();

        assert!(config.global.assumeyes);
        assert_eq!(config.global.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_verbose_implies_debug() {
        let config = Config::try_parse_from(["toolbox", "--verbose", "list"]).unwrap();
        assert_eq!(config.global.effective_log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_init_container_requires_user_flags() {
        let result = Config::try_parse_from(["toolbox", "init-container", "--home", "/home/me"]);
        assert!(result.is_err());

        let config = Config::try_parse_from([
            "toolbox",
            "init-container",
            "--home",
            "/home/me",
            "--shell",
            "/bin/bash",
            "--uid",
            "1000",
            "--user",
            "me",
            "--monitor-host",
        ])
        .unwrap();

        match config.command {
            Command::InitContainer(args) => {
                assert_eq!(args.uid, 1000);
                assert!(args.monitor_host);
                assert!(!args.home_link);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
