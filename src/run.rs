use crate::{
    config::{EnterArgs, RunArgs},
    context::{Context, initialized_stamp},
    create,
    engine::Engine,
    error::EngineError,
    list, probe, prompt, reference, session, utils,
};
use anyhow::{Context as _, Result, bail};
use std::{
    io::{self, Write},
    path::Path,
    thread,
    time::Duration,
};
use tracing::{debug, error, info, warn};

const MIGRATE_HINT: &str = "use system migrate to mitigate";
const NEW_RUNTIME_VERSION: &str = "1.6.2";
const INIT_POLL_ATTEMPTS: u32 = 25;
const INIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How a command should be run inside a toolbox container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub container: Option<String>,
    pub release: Option<String>,
    pub command: Vec<String>,
    pub pedantic: bool,
    pub fallback_to_shell: bool,
    pub emit_escape_sequence: bool,
    pub prompt_for_create: bool,
}

impl RunOptions {
    /// Splits the positional arguments of `run` into container and command.
    pub fn from_args(args: &RunArgs) -> Result<Self> {
        let named = !args.default && args.release.is_none();

        let (container, command) = match (named, args.args.split_first()) {
            (_, None) if named => bail!("You must provide a name of a container"),
            (_, None) => bail!("You must provide a command to execute"),
            (true, Some((_, []))) => bail!("You must provide a command to execute"),
            (true, Some((container, command))) => (Some(container.clone()), command.to_vec()),
            (false, Some(_)) => (None, args.args.clone()),
        };

        if let Some(container) = &container {
            if !reference::validate_name(container) {
                bail!("Container names must match [a-zA-Z0-9][a-zA-Z0-9_.-]*");
            }
        }

        Ok(Self {
            container,
            release: args.release.clone(),
            command,
            pedantic: args.pedantic,
            fallback_to_shell: args.fallback_to_bash,
            emit_escape_sequence: args.escape_sequence,
            prompt_for_create: args.prompt_for_create,
        })
    }

    /// `enter` is `run` of the user's shell, forgiving about which
    /// container is picked.
    pub fn enter(args: &EnterArgs, shell: &str) -> Self {
        Self {
            container: args.container.clone(),
            release: args.release.clone(),
            command: vec![shell.to_string()],
            pedantic: false,
            fallback_to_shell: true,
            emit_escape_sequence: true,
            prompt_for_create: true,
        }
    }
}

/// Runs the command and returns its exit status.
pub fn run(context: &Context, options: &RunOptions) -> Result<i32> {
    let identity = reference::resolve(
        options.container.as_deref(),
        None,
        options.release.as_deref(),
        context.host(),
    );
    debug!(
        "Container: '{}' Image: '{}' Release: '{}'",
        identity.name, identity.image, identity.release
    );

    let container = resolve_container(context, options, &identity.name)?;

    info!("Calling org.freedesktop.Flatpak.SessionHelper.RequestSession");
    session::request_session()?;

    info!("Starting container {}", container);
    start_container(context.engine(), &container)?;

    wait_until_initialized(context, &container)?;

    let mut command = options.command.clone();
    let program = command
        .first()
        .context("You must provide a command to execute")?
        .clone();

    info!("Looking for program {} in container {}", program, container);
    if !command_exists(context, &container, &program) {
        if !options.fallback_to_shell {
            bail!("{program} not found in container {container}");
        }

        info!("{} not found in {}; using {} instead", program, container, context.shell());
        command = vec![context.shell().to_string()];
    }

    info!("Running in container {}: {:?}", container, command);
    let args = exec_args(context, &container, &command);

    if options.emit_escape_sequence {
        emit(&push_sequence(&container));
    }

    let result = context.engine().interactive(&args);

    if options.emit_escape_sequence {
        emit(POP_SEQUENCE);
    }

    match result {
        Ok(()) => Ok(0),
        Err(EngineError::Internal { .. }) => bail!("Internal podman error"),
        Err(error) => {
            info!(
                "There was an error while executing {} in container {}: {}",
                program, container, error
            );
            Ok(error.exit_code().unwrap_or(1))
        }
    }
}

/// Picks the container to use. Outside pedantic mode a missing container is
/// replaced by the only existing one, or created on request.
fn resolve_container(context: &Context, options: &RunOptions, name: &str) -> Result<String> {
    let engine = context.engine();

    info!("Checking if container {} exists", name);
    if engine.container_exists(name) {
        return Ok(name.to_string());
    }

    if options.pedantic {
        bail!("Container {name} not found");
    }

    error!("Container {} not found", name);
    let containers =
        list::toolbox_containers(engine).context("Error while fetching containers")?;
    info!("Found {} containers", containers.len());

    match containers.as_slice() {
        [] => {
            let create = options.prompt_for_create
                && prompt::ask_yes_no("No toolbox containers found. Create now?", context.assume_yes())?;

            // `--assumeyes` answers the question even when it is not asked.
            if !create && !context.assume_yes() {
                bail!("A container can be created later with the 'create' command.");
            }

            let identity = create::create_container(
                context,
                Some(name),
                None,
                options.release.as_deref(),
            )?;
            Ok(identity.name)
        }
        [only] => {
            let container = only.name().to_string();
            info!("Entering container {} instead", container);
            Ok(container)
        }
        _ => bail!("Multiple toolbox containers exist. Specify the name of a container."),
    }
}

/// Starts the container, migrating it to a suitable OCI runtime if podman
/// says the host's cgroup setup changed since it was created.
fn start_container(engine: &Engine, container: &str) -> Result<()> {
    let error = match engine.start(container) {
        Ok(()) => return Ok(()),
        Err(error) => error,
    };

    if !error.stderr().contains(MIGRATE_HINT) {
        return Err(error).with_context(|| format!("Failed to start container {container}"));
    }

    info!("Checking if 'podman system migrate' supports '--new-runtime'");
    if !engine.version_at_least(NEW_RUNTIME_VERSION) {
        bail!("Podman doesn't support the '--new-runtime' option of 'system migrate'");
    }

    let cgroup = probe::cgroup_version(engine)?;
    let runtime = cgroup.oci_runtime();

    info!("Migrating containers to OCI runtime {}", runtime);
    engine
        .system_migrate(Some(runtime))
        .with_context(|| format!("Failed to migrate containers to OCI runtime {runtime}"))?;

    engine
        .start(container)
        .with_context(|| format!("Container {container} doesn't support cgroups {cgroup:?}"))
}

fn wait_until_initialized(context: &Context, container: &str) -> Result<()> {
    info!("Inspecting container {}", container);
    let inspected = context
        .engine()
        .inspect_container(container)
        .with_context(|| format!("Failed to inspect container {container}"))?;

    let entry_point = inspected.entry_point().unwrap_or_default();
    info!("Entry point of container {} is {}", container, entry_point);

    if entry_point != "toolbox" {
        warn!("Container {} uses deprecated features", container);
        warn!("Consider recreating it with Toolbox version 0.0.17 or newer");
        return Ok(());
    }

    debug!("Container {} is {}", container, inspected.state.status);

    let pid = inspected.state.pid;
    if pid <= 0 {
        debug!("PID: {}", pid);
        bail!("Invalid entry point PID of container {container}");
    }

    let stamp = initialized_stamp(&context.toolbox_runtime_dir(), pid);
    info!("Waiting for container {} to finish initializing", container);

    if !wait_for_stamp(&stamp, INIT_POLL_ATTEMPTS, INIT_POLL_INTERVAL) {
        bail!("Failed to initialize container {container}");
    }

    info!("Container {} is initialized", container);
    Ok(())
}

/// Polls until `stamp` exists. Returns `false` once `attempts` intervals
/// have passed without it appearing.
pub(crate) fn wait_for_stamp(stamp: &Path, attempts: u32, interval: Duration) -> bool {
    debug!("Checking if initialization stamp {} exists", stamp.display());

    for _ in 0..attempts {
        if utils::path_exists(stamp) {
            return true;
        }

        thread::sleep(interval);
    }

    utils::path_exists(stamp)
}

fn command_exists(context: &Context, container: &str, program: &str) -> bool {
    let args = [
        "exec",
        "--user",
        context.user(),
        container,
        "sh",
        "-c",
        "command -v \"$1\"",
        "sh",
        program,
    ];

    context.engine().run(&args).is_ok()
}

/// `podman exec` arguments running `command` as the user, with no
/// capabilities, in the caller's working directory.
pub(crate) fn exec_args(context: &Context, container: &str, command: &[String]) -> Vec<String> {
    let mut args: Vec<String> = [
        "exec",
        "--interactive",
        "--tty",
        "--user",
        context.user(),
        "--workdir",
        context.workdir(),
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();

    for (key, value) in context.preserved_environment() {
        args.push(format!("--env={key}={value}"));
    }

    args.push(container.to_string());

    for arg in ["capsh", "--caps=", "--", "-c", "exec \"$@\"", "/bin/sh"] {
        args.push(arg.to_string());
    }

    args.extend(command.iter().cloned());
    args
}

const POP_SEQUENCE: &str = "\x1b]777;container;pop;;\x1b\\";

/// Tells terminals such as GNOME Terminal that a container was entered.
fn push_sequence(container: &str) -> String {
    format!("\x1b]777;container;push;{container};toolbox\x1b\\")
}

fn emit(sequence: &str) {
    let mut stdout = io::stdout().lock();
    if let Err(error) = stdout.write_all(sequence.as_bytes()).and_then(|_| stdout.flush()) {
        debug!("Failed to write escape sequence: {}", error);
    }
}
