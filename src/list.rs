use crate::{
    config::ListArgs,
    engine::Engine,
    error::EngineError,
    records::{ContainerSummary, ImageSummary, TOOLBOX_LABELS, is_toolbox},
    reference::short_id,
};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use tracing::error;

const COLUMN_PADDING: usize = 2;

/// Common view of listed containers and images.
pub trait Listed {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn labels(&self) -> &HashMap<String, String>;
}

impl Listed for ContainerSummary {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        ContainerSummary::name(self)
    }

    fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }
}

impl Listed for ImageSummary {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        ImageSummary::name(self)
    }

    fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }
}

/// Merges the per-label result sets: records are deduplicated by ID, those
/// without a toolbox label are dropped, and the rest are sorted by name.
pub fn join<T: Listed>(sets: impl IntoIterator<Item = Vec<T>>) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut joined: Vec<T> = sets
        .into_iter()
        .flatten()
        .filter(|record| is_toolbox(record.labels()))
        .filter(|record| seen.insert(record.id().to_string()))
        .collect();

    joined.sort_by(|a, b| a.name().cmp(b.name()));
    joined
}

fn label_filters() -> impl Iterator<Item = String> {
    TOOLBOX_LABELS
        .iter()
        .map(|label| format!("label={label}=true"))
}

pub fn toolbox_containers(engine: &Engine) -> Result<Vec<ContainerSummary>, EngineError> {
    let sets = label_filters()
        .map(|filter| engine.containers(&["--filter", &filter]))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(join(sets))
}

pub fn toolbox_images(engine: &Engine) -> Result<Vec<ImageSummary>, EngineError> {
    let sets = label_filters()
        .map(|filter| engine.images(&["--filter", &filter]))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(join(sets))
}

pub fn list(engine: &Engine, args: &ListArgs) -> Result<()> {
    let both = !args.containers && !args.images;

    let images = if args.images || both {
        toolbox_images(engine).unwrap_or_else(|err| {
            error!("Failed to get images: {}", err);
            Vec::new()
        })
    } else {
        Vec::new()
    };

    let containers = if args.containers || both {
        toolbox_containers(engine).unwrap_or_else(|err| {
            error!("Failed to get containers: {}", err);
            Vec::new()
        })
    } else {
        Vec::new()
    };

    print!("{}", render(&images, &containers));
    Ok(())
}

fn render(images: &[ImageSummary], containers: &[ContainerSummary]) -> String {
    let mut output = String::new();

    if !images.is_empty() {
        let rows: Vec<Vec<String>> = images
            .iter()
            .map(|image| {
                vec![
                    short_id(&image.id).to_string(),
                    image.name().to_string(),
                    image.created(),
                ]
            })
            .collect();

        output.push_str(&render_table(&["IMAGE ID", "IMAGE NAME", "CREATED"], &rows));
    }

    if !images.is_empty() && !containers.is_empty() {
        output.push('\n');
    }

    if !containers.is_empty() {
        let rows: Vec<Vec<String>> = containers
            .iter()
            .map(|container| {
                vec![
                    short_id(&container.id).to_string(),
                    container.name().to_string(),
                    container.created(),
                    container.status.clone(),
                    container.image.clone(),
                ]
            })
            .collect();

        output.push_str(&render_table(
            &["CONTAINER ID", "CONTAINER NAME", "CREATED", "STATUS", "IMAGE NAME"],
            &rows,
        ));
    }

    output
}

/// Left-aligned columns separated by at least two spaces. The last column
/// is not padded.
pub(crate) fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.chars().count()).collect();

    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut output = String::new();
    let header_row: Vec<String> = headers.iter().map(|header| header.to_string()).collect();

    for row in std::iter::once(&header_row).chain(rows) {
        let last = row.len().saturating_sub(1);

        for (i, cell) in row.iter().enumerate() {
            if i == last {
                output.push_str(cell);
            } else {
                let width = widths.get(i).copied().unwrap_or_default() + COLUMN_PADDING;
                output.push_str(&format!("{cell:<width$}"));
            }
        }

        output.push('\n');
    }

    output
}
