use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use glob::glob;
use log::warn;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use substation_flows::catalog::select_catalog_resource;
use substation_flows::{select_flow_resources, PipelineConfig, ResourceMetadata};

/// A downloaded flow resource and where its bytes live.
#[derive(Debug, Clone)]
pub struct LocatedResource {
    pub metadata: ResourceMetadata,
    pub path: PathBuf,
}

impl LocatedResource {
    pub fn label(&self) -> &str {
        &self.metadata.name
    }
}

/// Read a manifest written by the portal client: a JSON array of resource metadata whose
/// `file` entries are relative to the manifest's directory.
pub fn load_manifest(path: &Path) -> Result<Vec<LocatedResource>> {
    let entries = read_listing(path)?;
    let base = listing_dir(path);

    let mut located = Vec::with_capacity(entries.len());
    for metadata in entries {
        match metadata.file.clone() {
            Some(file) => located.push(LocatedResource {
                path: base.join(file),
                metadata,
            }),
            None => warn!("Manifest entry '{}' has no file, skipping", metadata.name),
        }
    }
    Ok(located)
}

/// Find the downloaded location catalog from its package listing. The listing must hold
/// exactly one CSV resource, and that resource must have been downloaded.
pub fn locate_catalog(listing: &Path) -> Result<PathBuf> {
    let entries = read_listing(listing)?;
    let resource = select_catalog_resource(&entries)
        .with_context(|| format!("selecting catalog from {}", listing.display()))?;
    let file = resource
        .file
        .as_deref()
        .with_context(|| format!("catalog resource '{}' was not downloaded", resource.name))?;
    Ok(listing_dir(listing).join(file))
}

fn read_listing(path: &Path) -> Result<Vec<ResourceMetadata>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening manifest {}", path.display()))?;
    serde_json::from_reader(file).with_context(|| format!("parsing manifest {}", path.display()))
}

fn listing_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

/// Treat every CSV in `dir` as a resource labelled by its file stem.
pub fn scan_input_dir(dir: &Path) -> Result<Vec<LocatedResource>> {
    let pattern = dir.join("*.csv");
    let pattern = pattern
        .to_str()
        .with_context(|| format!("non-UTF-8 input path {}", dir.display()))?;

    let mut located = Vec::new();
    for path in glob(pattern)?.filter_map(Result::ok) {
        let meta = std::fs::metadata(&path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        located.push(LocatedResource {
            metadata: ResourceMetadata {
                name,
                format: "CSV".to_string(),
                last_modified: DateTime::<Utc>::from(meta.modified()?),
                size: meta.len(),
                file: path.file_name().and_then(|f| f.to_str()).map(str::to_string),
            },
            path,
        });
    }
    located.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(located)
}

/// Apply the portal resource filters from `config` while keeping each resource's path.
pub fn select_resources(
    resources: Vec<LocatedResource>,
    config: &PipelineConfig,
    now: DateTime<Utc>,
) -> Vec<LocatedResource> {
    let mut paths: HashMap<String, PathBuf> = HashMap::new();
    let mut metadata = Vec::with_capacity(resources.len());
    for resource in resources {
        paths.entry(resource.metadata.name.clone()).or_insert(resource.path);
        metadata.push(resource.metadata);
    }

    select_flow_resources(
        metadata,
        config.min_resource_size_bytes,
        config.resource_max_age(),
        now,
    )
    .into_iter()
    .filter_map(|metadata| {
        let path = paths.remove(&metadata.name)?;
        Some(LocatedResource { metadata, path })
    })
    .collect()
}
