use crate::{config::RemoveArgs, engine::Engine, error::EngineError, list, reference::short_id};
use anyhow::{Result, anyhow, bail};
use tracing::{error, info};

/// What `rm` and `rmi` operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Container,
    Image,
}

impl Kind {
    fn noun(&self) -> &'static str {
        match self {
            Kind::Container => "container",
            Kind::Image => "image",
        }
    }

    /// Explains why the engine refused with a "busy" status.
    fn busy_reason(&self) -> &'static str {
        match self {
            Kind::Container => "is running",
            Kind::Image => "has dependent children",
        }
    }
}

pub fn remove(engine: &Engine, kind: Kind, args: &RemoveArgs) -> Result<()> {
    if args.all {
        return remove_all(engine, kind, args.force);
    }

    if args.targets.is_empty() {
        bail!("missing argument for \"{}\"", command_name(kind));
    }

    for target in &args.targets {
        remove_named(engine, kind, target, args.force)?;
    }

    Ok(())
}

fn command_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Container => "rm",
        Kind::Image => "rmi",
    }
}

/// Removes every toolbox item. Failures are logged and do not stop the
/// remaining removals.
fn remove_all(engine: &Engine, kind: Kind, force: bool) -> Result<()> {
    let ids: Vec<String> = match kind {
        Kind::Container => list::toolbox_containers(engine)?
            .into_iter()
            .map(|container| container.id)
            .collect(),
        Kind::Image => list::toolbox_images(engine)?
            .into_iter()
            .map(|image| image.id)
            .collect(),
    };

    for id in ids {
        info!("Removing {} {}", kind.noun(), id);

        if let Err(err) = remove_one(engine, kind, &id, short_id(&id), force) {
            error!("{:#}", err);
        }
    }

    Ok(())
}

fn remove_named(engine: &Engine, kind: Kind, target: &str, force: bool) -> Result<()> {
    info!("Inspecting {} {}", kind.noun(), target);

    let inspected = match kind {
        Kind::Container => engine
            .inspect_container(target)
            .map(|info| (info.is_toolbox(), info.id)),
        Kind::Image => engine
            .inspect_image(target)
            .map(|info| (info.is_toolbox(), info.id)),
    };

    let id = match inspected {
        Ok((true, id)) => id,
        Ok((false, _)) => bail!("{} {} is not a toolbox {}", capitalize(kind.noun()), target, kind.noun()),
        Err(EngineError::NotFound { .. }) | Err(EngineError::Internal { .. }) => {
            bail!("{} {} does not exist", capitalize(kind.noun()), target)
        }
        Err(err) => return Err(err.into()),
    };

    // Remove exactly what was inspected, even if the name moves meanwhile.
    let handle = if id.is_empty() { target } else { id.as_str() };
    info!("Removing {} {} ({})", kind.noun(), target, short_id(handle));

    remove_one(engine, kind, handle, target, force)
}

fn remove_one(engine: &Engine, kind: Kind, handle: &str, target: &str, force: bool) -> Result<()> {
    let result = match kind {
        Kind::Container => engine.remove_container(handle, force),
        Kind::Image => engine.remove_image(handle, force),
    };

    result.map_err(|err| describe_failure(kind, target, err))
}

fn describe_failure(kind: Kind, target: &str, err: EngineError) -> anyhow::Error {
    let noun = capitalize(kind.noun());

    match err {
        EngineError::Busy { .. } => anyhow!(
            "{noun} {target} {}. Use --force to remove it",
            kind.busy_reason()
        ),
        EngineError::NotFound { .. } => anyhow!("{noun} {target} does not exist"),
        other => anyhow::Error::new(other).context(format!("Failed to remove {} {target}", kind.noun())),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePodman;

    const INSPECT_MYBOX: &str = r#""inspect --format json --type container mybox") echo '[{"Id":"0123456789abcdef0123","Config":{"Labels":{"com.github.containers.toolbox":"true"}}}]'; exit 0 ;;"#;

    fn named(targets: &[&str], force: bool) -> RemoveArgs {
        RemoveArgs {
            all: false,
            force,
            targets: targets.iter().map(|target| target.to_string()).collect(),
        }
    }

    #[test]
    fn test_remove_named_by_inspected_id() {
        let podman = FakePodman::new(&format!(
            "{INSPECT_MYBOX}\n\"rm --force 0123456789abcdef0123\") exit 0 ;;"
        ));

        remove(&podman.engine(), Kind::Container, &named(&["mybox"], true)).unwrap();

        assert_eq!(
            podman.calls(),
            [
                "inspect --format json --type container mybox",
                "rm --force 0123456789abcdef0123"
            ]
        );
    }

    #[test]
    fn test_remove_running_container() {
        let podman = FakePodman::new(&format!(
            "{INSPECT_MYBOX}\n\"rm 0123456789abcdef0123\") exit 2 ;;"
        ));

        let err = remove(&podman.engine(), Kind::Container, &named(&["mybox"], false)).unwrap_err();
        assert_eq!(err.to_string(), "Container mybox is running. Use --force to remove it");
    }

    #[test]
    fn test_remove_refuses_foreign_container() {
        let podman = FakePodman::new(
            r#""inspect --format json --type container web") echo '[{"Id":"fedcba9876543210","Config":{"Labels":{}}}]'; exit 0 ;;"#,
        );

        let err = remove(&podman.engine(), Kind::Container, &named(&["web"], false)).unwrap_err();

        assert_eq!(err.to_string(), "Container web is not a toolbox container");
        assert!(!podman.invoked("rm"));
    }

    #[test]
    fn test_remove_missing_image() {
        let podman = FakePodman::new("");

        let err = remove(&podman.engine(), Kind::Image, &named(&["ghost"], false)).unwrap_err();
        assert_eq!(err.to_string(), "Image ghost does not exist");
    }

    #[test]
    fn test_busy_message() {
        let err = describe_failure(
            Kind::Container,
            "mybox",
            EngineError::from_exit(Some(2), String::new()),
        );
        assert_eq!(err.to_string(), "Container mybox is running. Use --force to remove it");

        let err = describe_failure(Kind::Image, "abc", EngineError::from_exit(Some(2), String::new()));
        assert_eq!(
            err.to_string(),
            "Image abc has dependent children. Use --force to remove it"
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = describe_failure(Kind::Image, "abc", EngineError::from_exit(Some(1), String::new()));
        assert_eq!(err.to_string(), "Image abc does not exist");
    }

    #[test]
    fn test_other_failures_keep_source() {
        let err = describe_failure(
            Kind::Container,
            "mybox",
            EngineError::from_exit(Some(42), "boom".into()),
        );
        assert_eq!(err.to_string(), "Failed to remove container mybox");
        assert!(err.downcast_ref::<EngineError>().is_some());
    }

    #[test]
    fn test_missing_argument() {
        let engine = Engine::new(false, crate::config::LogLevel::Warn);
        let args = RemoveArgs::default();

        let err = remove(&engine, Kind::Image, &args).unwrap_err();
        assert_eq!(err.to_string(), "missing argument for \"rmi\"");
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("container"), "Container");
        assert_eq!(capitalize(""), "");
    }
}
