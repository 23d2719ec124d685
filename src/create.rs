use crate::{
    config::CreateArgs,
    context::Context,
    probe::{self, bus_socket_path},
    prompt,
    reference::{self, Identity},
    records::CREATE_LABEL,
    session, utils,
};
use anyhow::{Context as _, Result, bail};
use std::path::Path;
use tracing::{debug, error, info};

const ULIMIT_HOST_VERSION: &str = "1.5.0";

/// Everything about the host that shapes `podman create`, gathered up front
/// so that the argument list can be assembled without side effects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFacts {
    pub toolbox_path: String,
    pub sudo_group: String,
    pub uid: u32,
    pub user: String,
    pub home: String,
    pub home_canonical: String,
    pub shell: String,
    pub runtime_dir: String,
    pub ulimit_host: bool,
    pub profile: Option<String>,
    pub media: Option<MediaMount>,
    pub mnt_link: bool,
    pub run_media: bool,
    pub home_link: bool,
    pub system_bus_socket: Option<String>,
    pub session_bus_socket: Option<String>,
    pub kcm_socket: Option<String>,
    pub usr_flag: &'static str,
    pub environment: Vec<(String, String)>,
}

/// How `/media` is exposed, if it exists on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaMount {
    Link,
    Bind,
}

impl HostFacts {
    pub fn gather(context: &Context) -> Result<Self> {
        info!("Looking for group for sudo");
        let sudo_group = probe::sudo_group().context("Group for sudo was not found")?;
        info!("Group for sudo is {}", sudo_group);

        let home = context.home().to_string();
        let home_canonical = std::fs::canonicalize(&home)
            .with_context(|| format!("Failed to canonicalize {home}"))?
            .to_string_lossy()
            .into_owned();
        info!("Canonicalized {} to {}", home, home_canonical);

        info!("Checking if /usr is mounted read-only or read-write");
        let usr_mount_point =
            probe::mount_point("/usr").context("Failed to get the mount-point of /usr")?;
        let usr_options = probe::mount_options(&usr_mount_point)
            .with_context(|| format!("Failed to get the mount options of {usr_mount_point}"))?;
        info!("Mount flags of /usr on the host are {}", usr_options);

        let media = utils::path_exists("/media").then(|| {
            if probe::is_symlink_to("/media", "/run/media") {
                info!("/media is a symbolic link to /run/media");
                MediaMount::Link
            } else {
                MediaMount::Bind
            }
        });

        let mnt_link = probe::is_symlink_to("/mnt", "/var/mnt");
        let home_link = probe::resolve_symlink("/home")
            .is_some_and(|resolved| resolved == Path::new("/var/home"));

        let runtime_dir = context.runtime_dir();

        let system_bus_socket = bus_socket_path(context.system_bus()).map(|socket| {
            probe::resolve_symlink(&socket)
                .unwrap_or(socket)
                .to_string_lossy()
                .into_owned()
        });

        let session_bus_socket = context
            .session_bus()
            .and_then(bus_socket_path)
            .filter(|socket| !socket.starts_with(&runtime_dir))
            .map(|socket| socket.to_string_lossy().into_owned());

        let kcm_socket = probe::kcm_socket().map(|socket| socket.to_string_lossy().into_owned());

        info!("Checking if 'podman create' supports option '--ulimit host'");
        let ulimit_host = context.engine().version_at_least(ULIMIT_HOST_VERSION);

        Ok(Self {
            toolbox_path: context.toolbox_path().to_string_lossy().into_owned(),
            sudo_group: sudo_group.to_string(),
            uid: context.uid().as_raw(),
            user: context.user().to_string(),
            home,
            home_canonical,
            shell: context.shell().to_string(),
            runtime_dir: runtime_dir.to_string_lossy().into_owned(),
            ulimit_host,
            profile: probe::toolbox_profile().map(str::to_string),
            media,
            mnt_link,
            run_media: utils::path_exists("/run/media"),
            home_link,
            system_bus_socket,
            session_bus_socket,
            kcm_socket,
            usr_flag: probe::usr_mount_flag(&usr_options),
            environment: context.preserved_environment().to_vec(),
        })
    }

    /// Arguments for `podman create`, ending with the image and the
    /// initializer command line used as entry point.
    pub fn create_args(&self, name: &str, image: &str) -> Vec<String> {
        let toolbox_env = format!("TOOLBOX_PATH={}", self.toolbox_path);
        let fixed: &[&str] = &[
            "create",
            "--dns",
            "none",
            "--env",
            &toolbox_env,
            "--group-add",
            &self.sudo_group,
            "--hostname",
            "toolbox",
            "--ipc",
            "host",
            "--label",
            CREATE_LABEL,
            "--name",
            name,
            "--network",
            "host",
            "--no-hosts",
            "--pid",
            "host",
            "--privileged",
            "--security-opt",
            "label=disable",
            "--userns=keep-id",
            "--user",
            "root:root",
        ];

        let mut args: Vec<String> = fixed.iter().map(|arg| arg.to_string()).collect();

        let mut volume = |binding: String| {
            args.push(String::from("--volume"));
            args.push(binding);
        };

        if let Some(profile) = &self.profile {
            volume(format!("{profile}:/etc/profile.d/toolbox.sh:ro"));
        }

        if self.media == Some(MediaMount::Bind) {
            volume(String::from("/media:/media:rslave"));
        }

        if !self.mnt_link {
            volume(String::from("/mnt:/mnt:rslave"));
        }

        if self.run_media {
            volume(String::from("/run/media:/run/media:rslave"));
        }

        for socket in [&self.system_bus_socket, &self.session_bus_socket, &self.kcm_socket]
            .into_iter()
            .flatten()
        {
            volume(format!("{socket}:{socket}"));
        }

        if self.ulimit_host {
            args.extend([String::from("--ulimit"), String::from("host")]);
        }

        for (key, value) in &self.environment {
            args.push(format!("--env={key}={value}"));
        }

        let runtime = &self.runtime_dir;
        let home = &self.home_canonical;

        for binding in [
            format!("{}:/usr/bin/toolbox:ro", self.toolbox_path),
            format!("{runtime}:{runtime}"),
            format!("{runtime}/.flatpak-helper/monitor:/run/host/monitor"),
            format!("{home}:{home}:rslave"),
            String::from("/etc:/run/host/etc"),
            String::from("/dev:/dev:rslave"),
            String::from("/run:/run/host/run:rslave"),
            String::from("/tmp:/run/host/tmp:rslave"),
            format!("/usr:/run/host/usr:{},rslave", self.usr_flag),
            String::from("/var:/run/host/var:rslave"),
        ] {
            args.extend([String::from("--volume"), binding]);
        }

        args.push(image.to_string());
        args.extend(self.entry_point());
        args
    }

    fn entry_point(&self) -> Vec<String> {
        let mut command: Vec<String> = vec![
            "toolbox".into(),
            "--log-level".into(),
            "debug".into(),
            "init-container".into(),
            "--home".into(),
            self.home.clone(),
            "--monitor-host".into(),
            "--shell".into(),
            self.shell.clone(),
            "--uid".into(),
            self.uid.to_string(),
            "--user".into(),
            self.user.clone(),
        ];

        if self.home_link {
            command.push("--home-link".into());
        }

        if self.media == Some(MediaMount::Link) {
            command.push("--media-link".into());
        }

        if self.mnt_link {
            command.push("--mnt-link".into());
        }

        command
    }
}

pub fn create(context: &Context, args: &CreateArgs) -> Result<()> {
    create_container(
        context,
        args.name.as_deref(),
        args.image.as_deref(),
        args.release.as_deref(),
    )
    .map(|_| ())
}

/// Creates a toolbox container and returns its resolved identity.
pub fn create_container(
    context: &Context,
    name: Option<&str>,
    image: Option<&str>,
    release: Option<&str>,
) -> Result<Identity> {
    if let Some(name) = name {
        if !reference::validate_name(name) {
            bail!("Container names must match [a-zA-Z0-9][a-zA-Z0-9_.-]*");
        }
    }

    let identity = reference::resolve(name, image, release, context.host());
    let engine = context.engine();

    info!("Checking if container {} already exists", identity.name);
    if engine.container_exists(&identity.name) {
        bail!("Container {} already exists", identity.name);
    }

    info!("Used image will be: {} (release {})", identity.image, identity.release);
    ensure_image(context, &identity.image)?;

    let facts = HostFacts::gather(context)?;

    info!("Calling org.freedesktop.Flatpak.SessionHelper.RequestSession");
    session::request_session()?;

    let create_args = facts.create_args(&identity.name, &identity.image);
    info!("Trying to create container {}", identity.name);
    debug!("{:?}", create_args);

    engine
        .output(&create_args)
        .with_context(|| format!("Failed to create container {}", identity.name))?;

    Ok(identity)
}

/// Makes sure a toolbox image is available locally, pulling it if the user
/// agrees.
fn ensure_image(context: &Context, image: &str) -> Result<()> {
    let engine = context.engine();

    info!("Looking for the image locally");
    let found = image_candidates(image)
        .into_iter()
        .find(|candidate| {
            debug!("Looking for image {}", candidate);
            engine.image_exists(candidate)
        });

    let Some(found) = found else {
        info!("Image {} was not found", image);

        let question = format!("Image required to create toolbox container.\nDownload {image} (~200MB)?");
        if !prompt::ask_yes_no(&question, context.assume_yes())? {
            bail!("Image {image} is required to create the toolbox container");
        }

        engine
            .pull(image)
            .with_context(|| format!("Failed to pull image {image}"))?;

        info!("Image {} was pulled", image);
        return Ok(());
    };

    info!("Checking if {} is a toolbox image", found);
    let inspected = engine
        .inspect_image(&found)
        .with_context(|| format!("Unable to inspect image {found}"))?;

    if !inspected.is_toolbox() {
        error!("Labels of {}: {:?}", found, inspected.labels);
        bail!("Image {found} is not a toolbox image");
    }

    Ok(())
}

/// References to try, in order, when looking for an image locally.
pub(crate) fn image_candidates(image: &str) -> Vec<String> {
    let mut candidates = vec![image.to_string()];

    if !reference::reference_can_be_id(image) && !reference::reference_has_domain(image) {
        candidates.push(format!("localhost/{image}"));
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePodman;

    #[test]
    fn test_existing_container_is_not_created_again() {
        let podman = FakePodman::new(r#""container exists mybox") exit 0 ;;"#);
        let context = podman.context(true);

        let error = create_container(&context, Some("mybox"), None, None).unwrap_err();

        assert_eq!(error.to_string(), "Container mybox already exists");
        assert_eq!(podman.calls(), ["container exists mybox"]);
        assert!(!podman.invoked("create"));
    }

    #[test]
    fn test_invalid_name_never_reaches_podman() {
        let podman = FakePodman::new("");
        let context = podman.context(true);

        assert!(create_container(&context, Some("bad/name"), None, None).is_err());
        assert!(podman.calls().is_empty());
    }

    #[test]
    fn test_local_image_without_label_is_rejected() {
        let podman = FakePodman::new(
            r#""image exists localhost/plain:1") exit 0 ;;
"inspect --format json --type image localhost/plain:1") echo '[{"Id":"feedfacefeedface","Labels":{}}]'; exit 0 ;;"#,
        );
        let context = podman.context(false);

        let error = create_container(&context, Some("mybox"), Some("plain:1"), None).unwrap_err();

        assert_eq!(error.to_string(), "Image localhost/plain:1 is not a toolbox image");
        assert_eq!(
            podman.calls(),
            [
                "container exists mybox",
                "image exists plain:1",
                "image exists localhost/plain:1",
                "inspect --format json --type image localhost/plain:1"
            ]
        );
        assert!(!podman.invoked("create"));
    }

    fn facts() -> HostFacts {
        HostFacts {
            toolbox_path: "/usr/bin/toolbox".into(),
            sudo_group: "wheel".into(),
            uid: 1000,
            user: "alice".into(),
            home: "/home/alice".into(),
            home_canonical: "/var/home/alice".into(),
            shell: "/bin/bash".into(),
            runtime_dir: "/run/user/1000".into(),
            ulimit_host: true,
            profile: None,
            media: None,
            mnt_link: false,
            run_media: false,
            home_link: false,
            system_bus_socket: Some("/run/dbus/system_bus_socket".into()),
            session_bus_socket: None,
            kcm_socket: None,
            usr_flag: "ro",
            environment: vec![("TERM".into(), "xterm".into())],
        }
    }

    fn position(args: &[String], needle: &str) -> usize {
        args.iter()
            .position(|arg| arg == needle)
            .unwrap_or_else(|| panic!("{needle} missing from {args:?}"))
    }

    #[test]
    fn test_fixed_arguments() {
        let args = facts().create_args("fedora-toolbox-38", "f38/fedora-toolbox:38");

        assert_eq!(
            &args[..9],
            [
                "create",
                "--dns",
                "none",
                "--env",
                "TOOLBOX_PATH=/usr/bin/toolbox",
                "--group-add",
                "wheel",
                "--hostname",
                "toolbox"
            ]
        );
        assert_eq!(args[position(&args, "--name") + 1], "fedora-toolbox-38");
        assert_eq!(args[position(&args, "--label") + 1], CREATE_LABEL);
        assert!(args.contains(&"--userns=keep-id".to_string()));
        assert!(args.contains(&"--env=TERM=xterm".to_string()));
        assert_eq!(args[position(&args, "--ulimit") + 1], "host");
    }

    #[test]
    fn test_image_precedes_entry_point() {
        let args = facts().create_args("box", "f38/fedora-toolbox:38");
        let image = position(&args, "f38/fedora-toolbox:38");

        assert_eq!(
            &args[image + 1..],
            [
                "toolbox",
                "--log-level",
                "debug",
                "init-container",
                "--home",
                "/home/alice",
                "--monitor-host",
                "--shell",
                "/bin/bash",
                "--uid",
                "1000",
                "--user",
                "alice"
            ]
        );
        assert_eq!(args[image - 1], "/var:/run/host/var:rslave");
    }

    #[test]
    fn test_volumes() {
        let args = facts().create_args("box", "image");

        for volume in [
            "/usr/bin/toolbox:/usr/bin/toolbox:ro",
            "/run/user/1000:/run/user/1000",
            "/run/user/1000/.flatpak-helper/monitor:/run/host/monitor",
            "/var/home/alice:/var/home/alice:rslave",
            "/usr:/run/host/usr:ro,rslave",
            "/run/dbus/system_bus_socket:/run/dbus/system_bus_socket",
            "/mnt:/mnt:rslave",
        ] {
            let index = position(&args, volume);
            assert_eq!(args[index - 1], "--volume", "{volume}");
        }

        assert!(!args.iter().any(|arg| arg.starts_with("/media")));
    }

    #[test]
    fn test_links_move_to_entry_point() {
        let mut facts = facts();
        facts.media = Some(MediaMount::Link);
        facts.mnt_link = true;
        facts.home_link = true;
        facts.ulimit_host = false;
        facts.usr_flag = "rw";
        facts.profile = Some("/usr/share/profile.d/toolbox.sh".into());

        let args = facts.create_args("box", "image");
        let image = position(&args, "image");

        assert!(!args.contains(&"/mnt:/mnt:rslave".to_string()));
        assert!(!args.contains(&"--ulimit".to_string()));
        assert!(args.contains(&"/usr:/run/host/usr:rw,rslave".to_string()));
        assert!(args.contains(&"/usr/share/profile.d/toolbox.sh:/etc/profile.d/toolbox.sh:ro".to_string()));
        assert_eq!(&args[args.len() - 3..], ["--home-link", "--media-link", "--mnt-link"]);
        assert!(position(&args, "--media-link") > image);
    }

    #[test]
    fn test_media_bind_when_not_a_link() {
        let mut facts = facts();
        facts.media = Some(MediaMount::Bind);
        facts.run_media = true;
        facts.kcm_socket = Some("/run/.heim_org.h5l.kcm-socket".into());

        let args = facts.create_args("box", "image");
        assert!(args.contains(&"/media:/media:rslave".to_string()));
        assert!(args.contains(&"/run/media:/run/media:rslave".to_string()));
        assert!(args.contains(
            &"/run/.heim_org.h5l.kcm-socket:/run/.heim_org.h5l.kcm-socket".to_string()
        ));
        assert!(!args.contains(&"--media-link".to_string()));
    }

    #[test]
    fn test_image_candidates() {
        assert_eq!(
            image_candidates("f38/fedora-toolbox:38"),
            ["f38/fedora-toolbox:38", "localhost/f38/fedora-toolbox:38"]
        );
        assert_eq!(
            image_candidates("registry.fedoraproject.org/f38/fedora-toolbox:38"),
            ["registry.fedoraproject.org/f38/fedora-toolbox:38"]
        );
        assert_eq!(image_candidates("0123456789ab"), ["0123456789ab"]);
    }
}
