use anyhow::{bail, Result};
use chrono::Duration;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use substation_flows::{check_integrity, ParquetHistoryStore};

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub partitions: usize,
    pub records: usize,
    pub issues: Vec<(PathBuf, String)>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check every stored partition: readable, sorted, free of duplicate timestamps, and
/// clean under the integrity check.
pub fn verify_store(root: &Path, max_age: Duration) -> Result<VerifyReport> {
    if !root.is_dir() {
        bail!("history store {} does not exist", root.display());
    }
    let store = ParquetHistoryStore::new(root)?;
    let partitions = store.list_partitions()?;

    println!("\n🔍 Data Quality Verification");
    println!("{}", "=".repeat(60));
    println!("📁 Checking {} partitions in {}", partitions.len(), root.display());

    let mut report = VerifyReport {
        partitions: partitions.len(),
        ..Default::default()
    };

    for path in partitions {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        println!("\n  Verifying: {}", name);

        let table = match ParquetHistoryStore::read_partition(&path) {
            Ok(table) => table,
            Err(e) => {
                println!("    ❌ Unreadable: {}", e);
                report.issues.push((path, e.to_string()));
                continue;
            }
        };
        report.records += table.len();

        let distinct: HashSet<_> = table.records.iter().map(|r| r.timestamp).collect();
        let duplicates = table.len() - distinct.len();
        if duplicates > 0 {
            println!("    ❌ Found {} duplicate timestamps", duplicates);
            report
                .issues
                .push((path.clone(), format!("{} duplicate timestamps", duplicates)));
        } else {
            println!("    ✅ No duplicates found");
        }

        if is_sorted(&table) {
            println!("    ✅ Data is properly sorted");
        } else {
            println!("    ⚠️  Data is not sorted by timestamp");
            report.issues.push((path.clone(), "not sorted".to_string()));
        }

        for warning in check_integrity(&table, max_age) {
            println!("    ⚠️  {}", warning);
            report.issues.push((path.clone(), warning.to_string()));
        }

        println!("    📊 Total records: {}", table.len());
    }

    println!("\n{}", "=".repeat(60));
    if report.passed() {
        println!("✅ Data quality verification passed! No issues found.");
    } else {
        println!(
            "⚠️  Data quality verification found {} issues",
            report.issues.len()
        );
    }

    Ok(report)
}

fn is_sorted(table: &substation_flows::FlowTable) -> bool {
    table
        .records
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp)
}
