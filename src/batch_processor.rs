use crate::resources::LocatedResource;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error};
use rayon::prelude::*;
use std::time::Instant;
use substation_flows::error::{EntityFailure, PipelineError};
use substation_flows::{
    check_integrity, merge_into_store, normalize, EntityLocks, HistoryStore, MergeStats,
    PipelineConfig,
};

const MAX_LISTED_FAILURES: usize = 100;

/// Outcome for one entity whose download was stored.
#[derive(Debug, Clone)]
pub struct EntityReport {
    pub entity: String,
    pub rows: usize,
    pub latest: Option<DateTime<Utc>>,
    pub merge: MergeStats,
    /// Advisory integrity warnings; these never fail the entity.
    pub warnings: Vec<String>,
}

impl EntityReport {
    pub fn passed(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub stored: Vec<EntityReport>,
    pub failed: Vec<EntityFailure>,
}

pub struct BatchProcessor<'a, S: HistoryStore + ?Sized> {
    store: &'a S,
    locks: EntityLocks,
    config: &'a PipelineConfig,
    show_progress: bool,
}

impl<'a, S: HistoryStore + ?Sized> BatchProcessor<'a, S> {
    pub fn new(store: &'a S, config: &'a PipelineConfig) -> Self {
        Self {
            store,
            locks: EntityLocks::new(),
            config,
            show_progress: true,
        }
    }

    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Run every resource through normalize, integrity check and merge. Entities are
    /// independent: a failure is recorded and the rest of the batch carries on.
    pub fn process(&self, resources: &[LocatedResource]) -> BatchSummary {
        let pb = if self.show_progress {
            let pb = ProgressBar::new(resources.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            {
                pb.set_style(style);
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        let start = Instant::now();
        let outcomes: Vec<Result<EntityReport, EntityFailure>> = resources
            .par_iter()
            .map(|resource| {
                let outcome = self.process_one(resource).map_err(|error| EntityFailure {
                    entity: resource.label().to_string(),
                    file: Some(resource.path.display().to_string()),
                    error,
                });
                pb.inc(1);
                outcome
            })
            .collect();
        pb.finish_with_message("Resources processed");
        debug!("Processed {} resources in {:?}", resources.len(), start.elapsed());

        let mut summary = BatchSummary::default();
        for outcome in outcomes {
            match outcome {
                Ok(report) => summary.stored.push(report),
                Err(failure) => {
                    error!("{}", failure);
                    summary.failed.push(failure);
                }
            }
        }
        summary
    }

    fn process_one(&self, resource: &LocatedResource) -> Result<EntityReport, PipelineError> {
        let bytes = std::fs::read(&resource.path)?;
        let table = normalize(&bytes, resource.label())?;

        let warnings = check_integrity(&table, self.config.max_age())
            .iter()
            .map(|w| w.to_string())
            .collect();
        let rows = table.len();
        let latest = table.latest_timestamp();
        let merge = merge_into_store(self.store, &self.locks, table)?;

        Ok(EntityReport {
            entity: resource.label().to_string(),
            rows,
            latest,
            merge,
            warnings,
        })
    }
}

pub fn print_summary(summary: &BatchSummary) {
    let added: usize = summary.stored.iter().map(|r| r.merge.added_rows()).sum();
    let with_warnings: Vec<&EntityReport> =
        summary.stored.iter().filter(|r| !r.passed()).collect();

    println!("\n{}", "=".repeat(60));
    println!("📊 Ingest Summary");
    println!("{}", "=".repeat(60));
    println!("  ✅ Stored:   {} entities ({} new rows)", summary.stored.len(), added);
    println!("  ⚠️  Warnings: {} entities", with_warnings.len());
    println!("  ❌ Failed:   {} entities", summary.failed.len());

    for report in with_warnings.iter().take(MAX_LISTED_FAILURES) {
        let latest = report
            .latest
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!("\n  ⚠️  {} ({} rows, latest {})", report.entity, report.rows, latest);
        for warning in &report.warnings {
            println!("      {}", warning);
        }
    }

    if !summary.failed.is_empty() {
        println!("\n❌ Failed entities:");
        for failure in summary.failed.iter().take(MAX_LISTED_FAILURES) {
            println!("  {}", failure);
        }
        if summary.failed.len() > MAX_LISTED_FAILURES {
            println!("  ... and {} more", summary.failed.len() - MAX_LISTED_FAILURES);
        }
    }
}
