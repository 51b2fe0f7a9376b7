use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use substation_flows::{
    load_catalog_path, NameResolver, OverrideTable, ParquetHistoryStore, PipelineConfig,
};

mod batch_processor;
mod resources;
mod verify;

use batch_processor::{print_summary, BatchProcessor};
use resources::{load_manifest, locate_catalog, scan_input_dir, select_resources, LocatedResource};

#[derive(Parser)]
#[command(name = "primary_flow_processor")]
#[command(about = "Ingest primary substation flow downloads into per-substation histories")]
struct Cli {
    /// Pipeline configuration JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Worker threads (defaults to one per CPU)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize downloads and merge them into the history store
    Ingest {
        #[command(flatten)]
        input: InputArgs,

        /// History store directory
        #[arg(long)]
        store: PathBuf,

        /// Staleness threshold for integrity warnings
        #[arg(long)]
        max_age_hours: Option<i64>,

        /// Ingest every listed resource regardless of its last-modified date
        #[arg(long)]
        include_stale: bool,

        #[command(flatten)]
        naming: NamingArgs,
    },
    /// Check every stored history partition
    Verify {
        /// History store directory
        #[arg(long)]
        store: PathBuf,
    },
    /// Resolve resource labels against the catalog and write the links
    Links {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        naming: NamingArgs,

        /// Output JSON path
        #[arg(long, default_value = "name_links.json")]
        out: PathBuf,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Manifest JSON from the portal client
    #[arg(long, conflicts_with = "input_dir")]
    manifest: Option<PathBuf>,

    /// Directory of downloaded CSVs, labelled by file name
    #[arg(long)]
    input_dir: Option<PathBuf>,
}

#[derive(Args)]
struct NamingArgs {
    /// Substation location catalog CSV
    #[arg(long, conflicts_with = "catalog_listing")]
    catalog: Option<PathBuf>,

    /// Catalog package listing JSON; its single CSV resource is the catalog
    #[arg(long)]
    catalog_listing: Option<PathBuf>,

    /// Name override CSV
    #[arg(long)]
    overrides: Option<PathBuf>,
}

impl InputArgs {
    fn load(&self) -> Result<Vec<LocatedResource>> {
        match (&self.manifest, &self.input_dir) {
            (Some(manifest), _) => load_manifest(manifest),
            (None, Some(dir)) => scan_input_dir(dir),
            (None, None) => anyhow::bail!("one of --manifest or --input-dir is required"),
        }
    }
}

impl NamingArgs {
    fn resolver(&self) -> Result<Option<NameResolver>> {
        let catalog_path = match (&self.catalog, &self.catalog_listing) {
            (Some(path), _) => path.clone(),
            (None, Some(listing)) => locate_catalog(listing)?,
            (None, None) => return Ok(None),
        };
        let catalog = load_catalog_path(&catalog_path)
            .with_context(|| format!("loading catalog {}", catalog_path.display()))?;
        let overrides = match &self.overrides {
            Some(path) => OverrideTable::from_csv_path(path)
                .with_context(|| format!("loading overrides {}", path.display()))?,
            None => OverrideTable::new(),
        };
        info!("{} catalog entries, {} overrides", catalog.len(), overrides.len());
        Ok(Some(NameResolver::new(catalog, overrides)))
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if cli.threads.is_some() {
        config.threads = cli.threads;
    }
    config.check()?;
    Ok(config)
}

fn resolve_and_write(
    resolver: &NameResolver,
    resources: &[LocatedResource],
    out: &Path,
) -> Result<()> {
    let report = resolver.resolve_all(resources.iter().map(LocatedResource::label));
    let json = serde_json::to_string_pretty(&report.links)?;
    std::fs::write(out, json).with_context(|| format!("writing {}", out.display()))?;

    println!(
        "🔗 Linked {} of {} labels ({} unresolved) -> {}",
        report.links.len(),
        resources.len(),
        report.failures.len(),
        out.display()
    );
    for failure in &report.failures {
        println!("  ⚠️  {}", failure);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads.unwrap_or_else(num_cpus::get))
        .build_global()?;

    match &cli.command {
        Command::Ingest {
            input,
            store,
            max_age_hours,
            include_stale,
            naming,
        } => {
            let mut config = config;
            if let Some(hours) = max_age_hours {
                config.max_age_hours = *hours;
                config.check()?;
            }
            if *include_stale {
                config.resource_max_age_days = None;
            }

            println!("🚀 Primary Substation Flow Processor");
            println!("Rayon thread pool configured with {} threads", rayon::current_num_threads());
            println!("{}", "=".repeat(60));

            let listed = input.load()?;
            let listed_count = listed.len();
            let selected = select_resources(listed, &config, Utc::now());
            println!("Selected {} of {} resources", selected.len(), listed_count);

            let history = ParquetHistoryStore::new(store)
                .with_context(|| format!("opening store {}", store.display()))?;
            let start = std::time::Instant::now();
            let summary = BatchProcessor::new(&history, &config).process(&selected);
            print_summary(&summary);

            if let Some(resolver) = naming.resolver()? {
                resolve_and_write(&resolver, &selected, &store.join("name_links.json"))?;
            }

            println!("\n✅ Processing complete in {:?}!", start.elapsed());
        }
        Command::Verify { store } => {
            verify::verify_store(store, config.max_age())?;
        }
        Command::Links { input, naming, out } => {
            let resolver = naming
                .resolver()?
                .context("--catalog or --catalog-listing is required for links")?;
            let resources = input.load()?;
            resolve_and_write(&resolver, &resources, out)?;
        }
    }

    Ok(())
}
