//! Container names and image references.
//!
//! Everything here is pure: results depend only on the arguments, which
//! makes the defaults easy to reason about and to test.

use crate::probe::HostOs;

/// Release used when the host is not Fedora, or reports `rawhide`.
pub const RELEASE_DEFAULT: &str = "32";

const DEFAULT_PLATFORM: &str = "fedora";
const ID_TRUNC_LENGTH: usize = 12;

/// A resolved container name together with the image it is based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub image: String,
    pub release: String,
}

/// Derives the container name and image reference from the optional
/// overrides and the host's platform and version.
pub fn resolve(
    name: Option<&str>,
    image: Option<&str>,
    release: Option<&str>,
    host: &HostOs,
) -> Identity {
    let release = match release.filter(|release| !release.is_empty()) {
        Some(release) => release.to_string(),
        None if host.platform == DEFAULT_PLATFORM => match host.version.as_str() {
            "" | "rawhide" => RELEASE_DEFAULT.to_string(),
            version => version.to_string(),
        },
        None => RELEASE_DEFAULT.to_string(),
    };

    let image = match image.filter(|image| !image.is_empty()) {
        Some(image) => qualify_fedora_toolbox(image),
        None => format!("f{release}/{DEFAULT_PLATFORM}-toolbox:{release}"),
    };

    let name = match name.filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => container_name_for_image(&image),
    };

    Identity {
        name,
        image,
        release,
    }
}

/// `fedora-toolbox:31` lives under the `f31/` namespace in the registry.
fn qualify_fedora_toolbox(image: &str) -> String {
    let Some((repository, tag)) = image.split_once(':') else {
        return image.to_string();
    };

    let versioned = tag
        .chars()
        .next()
        .is_some_and(|first| ('1'..='9').contains(&first))
        && tag.chars().all(|c| c.is_ascii_digit());

    if repository == "fedora-toolbox" && versioned {
        format!("f{tag}/{repository}:{tag}")
    } else {
        image.to_string()
    }
}

/// `registry.example.com/f38/fedora-toolbox:38` becomes `fedora-toolbox-38`.
pub fn container_name_for_image(image: &str) -> String {
    let name = image.replace(':', "-");

    match name.rsplit_once('/') {
        Some((_, last)) => last.to_string(),
        None => name,
    }
}

/// Checks a container name against `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
pub fn validate_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Returns `true` if the part of the reference before the first `/` names a
/// registry. `localhost` is not treated as one.
pub fn reference_has_domain(reference: &str) -> bool {
    let Some((domain, _)) = reference.split_once('/') else {
        return false;
    };

    domain != "localhost" && domain.contains(['.', ':'])
}

/// Returns `true` if the reference looks like a (possibly short) image ID.
pub fn reference_can_be_id(reference: &str) -> bool {
    (6..=64).contains(&reference.len())
        && reference
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(ID_TRUNC_LENGTH) {
        Some((index, _)) => &id[..index],
        None => id,
    }
}
