use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use std::path::PathBuf;
use substation_flows::fuzzy::{suggest_overrides, WeightedTokenSetScorer, DEFAULT_TOP_K};
use substation_flows::{load_catalog_path, NameResolver, OverrideTable, ResourceMetadata};

#[derive(Parser)]
#[command(name = "substation_flows")]
#[command(about = "Resolve flow labels against the substation catalog and suggest overrides")]
struct Args {
    /// Substation location catalog CSV
    #[arg(long)]
    catalog: PathBuf,

    /// Override table CSV (simplified_name_in_flows, simplified_name_in_catalog, substation_number)
    #[arg(long)]
    overrides: Option<PathBuf>,

    /// Text file with one flow label per line
    #[arg(long, conflicts_with = "manifest")]
    labels: Option<PathBuf>,

    /// Resource manifest JSON; the resource names are used as labels
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Candidates to suggest per unresolved label
    #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "summary")]
    output: OutputFormat,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Summary,
}

fn read_labels(args: &Args) -> Result<Vec<String>> {
    if let Some(path) = &args.labels {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading labels from {}", path.display()))?;
        return Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect());
    }
    if let Some(path) = &args.manifest {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening manifest {}", path.display()))?;
        let resources: Vec<ResourceMetadata> = serde_json::from_reader(file)?;
        return Ok(resources.into_iter().map(|r| r.name).collect());
    }
    anyhow::bail!("one of --labels or --manifest is required")
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let catalog = load_catalog_path(&args.catalog)
        .with_context(|| format!("loading catalog {}", args.catalog.display()))?;
    let overrides = match &args.overrides {
        Some(path) => OverrideTable::from_csv_path(path)
            .with_context(|| format!("loading overrides {}", path.display()))?,
        None => OverrideTable::new(),
    };
    info!("{} catalog entries, {} overrides", catalog.len(), overrides.len());

    let labels = read_labels(&args)?;
    let resolver = NameResolver::new(catalog, overrides);
    let report = resolver.resolve_all(labels.iter().map(String::as_str));
    let suggestions = suggest_overrides(
        &WeightedTokenSetScorer,
        &report.failures,
        resolver.catalog(),
        args.top_k,
    );

    match args.output {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&suggestions)?;
            println!("{}", json);
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            writer.write_record([
                "raw_label",
                "simplified_key",
                "rank",
                "catalog_name",
                "substation_number",
                "score",
            ])?;
            for suggestion in &suggestions {
                for (rank, candidate) in suggestion.candidates.iter().enumerate() {
                    writer.write_record([
                        suggestion.raw_label.clone(),
                        suggestion.simplified_key.clone(),
                        (rank + 1).to_string(),
                        candidate.catalog_name.clone(),
                        candidate.substation_number.to_string(),
                        format!("{:.1}", candidate.score),
                    ])?;
                }
            }
            writer.flush()?;
        }
        OutputFormat::Summary => {
            println!("Name Resolution Summary");
            println!("=======================");
            println!("Labels:     {}", labels.len());
            println!("Linked:     {}", report.links.len());
            println!("Unresolved: {}", report.failures.len());
            println!();
            for suggestion in &suggestions {
                println!("  {}", suggestion.problem);
                for candidate in &suggestion.candidates {
                    println!(
                        "      {:>5.1}  {} ({})",
                        candidate.score, candidate.catalog_name, candidate.substation_number
                    );
                }
            }
        }
    }

    Ok(())
}
