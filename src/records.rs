//! Typed views of the JSON podman prints for `ps`, `images`, `inspect`,
//! `version` and `info`.
//!
//! Only the fields toolbox consumes are modelled. Podman changed the casing
//! and shape of several fields between releases (`ID` vs `Id`, `Names` as a
//! string vs a list, `Created` as text vs a UNIX timestamp), so each field
//! accepts every spelling seen in the wild and tolerates being absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::{collections::HashMap, fmt};

/// Labels that mark containers and images as managed by toolbox.
pub const TOOLBOX_LABELS: [&str; 2] = [
    "com.github.debarshiray.toolbox",
    "com.github.containers.toolbox",
];

/// Label attached to every container toolbox creates.
pub const CREATE_LABEL: &str = "com.github.containers.toolbox=true";

/// Returns `true` when one of the two ownership labels is set to `true`.
pub fn is_toolbox(labels: &HashMap<String, String>) -> bool {
    TOOLBOX_LABELS
        .iter()
        .any(|label| labels.get(*label).is_some_and(|value| value == "true"))
}

/// One entry of `podman ps --format json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSummary {
    #[serde(rename = "Id", alias = "ID", alias = "id")]
    pub id: String,

    #[serde(
        rename = "Names",
        alias = "names",
        default,
        deserialize_with = "one_or_many"
    )]
    pub names: Vec<String>,

    #[serde(rename = "Created", alias = "created", default)]
    pub created: Option<Created>,

    #[serde(rename = "CreatedAt", default)]
    pub created_at: Option<String>,

    #[serde(rename = "Status", alias = "status", default)]
    pub status: String,

    #[serde(rename = "Image", alias = "image", default)]
    pub image: String,

    #[serde(
        rename = "Labels",
        alias = "labels",
        default,
        deserialize_with = "nullable_map"
    )]
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or_default()
    }

    pub fn created(&self) -> String {
        display_created(self.created.as_ref(), self.created_at.as_deref())
    }
}

/// One entry of `podman images --format json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageSummary {
    #[serde(rename = "Id", alias = "ID", alias = "id")]
    pub id: String,

    #[serde(
        rename = "Names",
        alias = "names",
        default,
        deserialize_with = "one_or_many"
    )]
    pub names: Vec<String>,

    #[serde(rename = "Created", alias = "created", default)]
    pub created: Option<Created>,

    #[serde(rename = "CreatedAt", default)]
    pub created_at: Option<String>,

    #[serde(
        rename = "Labels",
        alias = "labels",
        default,
        deserialize_with = "nullable_map"
    )]
    pub labels: HashMap<String, String>,
}

impl ImageSummary {
    pub fn name(&self) -> &str {
        self.names
            .first()
            .map(String::as_str)
            .unwrap_or("<none>")
    }

    pub fn created(&self) -> String {
        display_created(self.created.as_ref(), self.created_at.as_deref())
    }
}

/// Subset of `podman inspect --type container`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerInspect {
    #[serde(rename = "Id", default)]
    pub id: String,

    #[serde(rename = "Config", default)]
    pub config: InspectConfig,

    #[serde(rename = "State", default)]
    pub state: InspectState,
}

impl ContainerInspect {
    /// First element of the container's command, i.e. its entry point.
    pub fn entry_point(&self) -> Option<&str> {
        self.config.cmd.first().map(String::as_str)
    }

    pub fn is_toolbox(&self) -> bool {
        is_toolbox(&self.config.labels)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InspectConfig {
    #[serde(rename = "Cmd", default, deserialize_with = "one_or_many")]
    pub cmd: Vec<String>,

    #[serde(rename = "Labels", default, deserialize_with = "nullable_map")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InspectState {
    #[serde(rename = "Pid", default)]
    pub pid: i64,

    #[serde(rename = "Status", default)]
    pub status: String,
}

/// Subset of `podman inspect --type image`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageInspect {
    #[serde(rename = "Id", default)]
    pub id: String,

    #[serde(rename = "Labels", default, deserialize_with = "nullable_map")]
    pub labels: HashMap<String, String>,

    #[serde(rename = "Config", default)]
    pub config: InspectConfig,
}

impl ImageInspect {
    /// Labels may be reported at the top level, under `Config`, or both.
    pub fn is_toolbox(&self) -> bool {
        is_toolbox(&self.labels) || is_toolbox(&self.config.labels)
    }
}

/// `podman version --format json`.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionReport {
    #[serde(rename = "Client", default)]
    client: Option<ClientVersion>,

    #[serde(rename = "Version", default)]
    version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientVersion {
    #[serde(rename = "Version")]
    version: String,
}

impl VersionReport {
    pub fn version(&self) -> Option<&str> {
        self.client
            .as_ref()
            .map(|client| client.version.as_str())
            .or(self.version.as_deref())
    }
}

/// `podman info --format json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineInfo {
    #[serde(rename = "host", alias = "Host", default)]
    pub host: HostInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostInfo {
    #[serde(rename = "cgroupVersion", alias = "CgroupVersion", default)]
    pub cgroup_version: String,
}

/// Creation time, reported as text by old podman and as a UNIX timestamp
/// by newer releases.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Created {
    Unix(i64),
    Text(String),
}

impl fmt::Display for Created {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Created::Text(text) => f.write_str(text),
            Created::Unix(timestamp) => match DateTime::<Utc>::from_timestamp(*timestamp, 0) {
                Some(created) => f.write_str(&time_ago(created, Utc::now())),
                None => f.write_str("unknown"),
            },
        }
    }
}

fn display_created(created: Option<&Created>, created_at: Option<&str>) -> String {
    match (created, created_at) {
        (Some(Created::Text(text)), _) => text.clone(),
        (Some(created @ Created::Unix(_)), _) => created.to_string(),
        (None, Some(text)) => text.to_string(),
        (None, None) => String::from("unknown"),
    }
}

pub(crate) fn time_ago(created: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(created);

    let (amount, unit) = if elapsed.num_minutes() < 1 {
        return String::from("Less than a minute ago");
    } else if elapsed.num_hours() < 1 {
        (elapsed.num_minutes(), "minute")
    } else if elapsed.num_days() < 1 {
        (elapsed.num_hours(), "hour")
    } else if elapsed.num_weeks() < 1 {
        (elapsed.num_days(), "day")
    } else if elapsed.num_days() < 30 {
        (elapsed.num_weeks(), "week")
    } else if elapsed.num_days() < 365 {
        (elapsed.num_days() / 30, "month")
    } else {
        (elapsed.num_days() / 365, "year")
    };

    if amount == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{amount} {unit}s ago")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
        None => Vec::new(),
    })
}

fn nullable_map<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}
