use crate::error::{CatalogError, ValidationError, Violation};
use crate::models::{ResourceMetadata, SubstationCatalogEntry};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const NUMBER_COLUMN: &str = "substation_number";
const NAME_COLUMN: &str = "substation_name";
const TYPE_COLUMN: &str = "substation_type";
const LATITUDE_COLUMN: &str = "latitude";
const LONGITUDE_COLUMN: &str = "longitude";

/// The catalog covers about 192,000 substations; numbers stay well below a million.
const MAX_SUBSTATION_NUMBER: u32 = 1_000_000;
const NAME_LENGTH: std::ops::RangeInclusive<usize> = 2..=64;
const LATITUDE_RANGE: std::ops::RangeInclusive<f64> = 49.0..=61.0;
const LONGITUDE_RANGE: std::ops::RangeInclusive<f64> = -9.0..=2.0;

pub fn to_snake_case(header: &str) -> String {
    header.trim().to_lowercase().replace(' ', "_")
}

/// Return the single element matching `predicate`. Zero or several matches is an error:
/// taking the first match silently would hide a change in the portal's listing.
pub fn find_one_match<'a, T, F>(predicate: F, haystack: &'a [T]) -> Result<&'a T, CatalogError>
where
    F: Fn(&T) -> bool,
{
    if haystack.is_empty() {
        return Err(CatalogError::NoResources);
    }
    let mut matches = haystack.iter().filter(|item| predicate(item));
    match (matches.next(), matches.next()) {
        (Some(found), None) => Ok(found),
        (None, _) => Err(CatalogError::NotExactlyOne { found: 0 }),
        (Some(_), Some(_)) => Err(CatalogError::NotExactlyOne {
            found: 2 + matches.count(),
        }),
    }
}

/// Pick the single CSV resource from the catalog package listing.
pub fn select_catalog_resource(
    resources: &[ResourceMetadata],
) -> Result<&ResourceMetadata, CatalogError> {
    find_one_match(|r: &ResourceMetadata| r.format.eq_ignore_ascii_case("csv"), resources)
}

/// Keep flow resources worth downloading: CSV, larger than `min_size` bytes, first
/// occurrence of each name, and (when `max_age` is set) modified after `now - max_age`.
/// Several "live" feeds have not been updated for months.
pub fn select_flow_resources(
    resources: Vec<ResourceMetadata>,
    min_size: u64,
    max_age: Option<Duration>,
    now: DateTime<Utc>,
) -> Vec<ResourceMetadata> {
    let total = resources.len();
    let mut seen = HashSet::new();
    let selected: Vec<ResourceMetadata> = resources
        .into_iter()
        .filter(|r| r.format.eq_ignore_ascii_case("csv") && r.size > min_size)
        .filter(|r| seen.insert(r.name.clone()))
        .filter(|r| max_age.map_or(true, |age| r.last_modified >= now - age))
        .collect();
    debug!("Selected {} of {} flow resources", selected.len(), total);
    selected
}

pub fn load_catalog_path(path: &Path) -> Result<Vec<SubstationCatalogEntry>, CatalogError> {
    let bytes = std::fs::read(path)?;
    load_catalog_csv(&bytes)
}

/// Parse the location catalog, keep primary substations and validate every row.
pub fn load_catalog_csv(bytes: &[u8]) -> Result<Vec<SubstationCatalogEntry>, CatalogError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| to_snake_case(h.trim_start_matches('\u{feff}')))
        .collect();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| CatalogError::MissingColumn(name.to_string()))
    };
    let number_idx = column(NUMBER_COLUMN)?;
    let name_idx = column(NAME_COLUMN)?;
    let type_idx = column(TYPE_COLUMN)?;
    let lat_idx = column(LATITUDE_COLUMN)?;
    let lon_idx = column(LONGITUDE_COLUMN)?;

    let mut entries = Vec::new();
    let mut violations = Vec::new();
    let mut first_row_for_number: HashMap<u32, usize> = HashMap::new();

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        let substation_type = field(type_idx).to_string();
        if !substation_type.to_lowercase().contains("primary") {
            continue;
        }

        let substation_name = field(name_idx).to_string();
        if !NAME_LENGTH.contains(&substation_name.chars().count()) {
            violations.push(catalog_violation(row, NAME_COLUMN, "name length outside 2..=64"));
        }

        let substation_number = match field(number_idx).parse::<u32>() {
            Ok(n) if n > 0 && n < MAX_SUBSTATION_NUMBER => n,
            _ => {
                violations.push(catalog_violation(
                    row,
                    NUMBER_COLUMN,
                    format!("'{}' is not in 1..{}", field(number_idx), MAX_SUBSTATION_NUMBER),
                ));
                continue;
            }
        };
        if let Some(first) = first_row_for_number.insert(substation_number, row) {
            violations.push(catalog_violation(
                row,
                NUMBER_COLUMN,
                format!("{} duplicates row {}", substation_number, first),
            ));
        }

        let latitude = parse_coordinate(
            field(lat_idx),
            LATITUDE_COLUMN,
            &LATITUDE_RANGE,
            row,
            &mut violations,
        );
        let longitude = parse_coordinate(
            field(lon_idx),
            LONGITUDE_COLUMN,
            &LONGITUDE_RANGE,
            row,
            &mut violations,
        );

        entries.push(SubstationCatalogEntry {
            substation_number,
            substation_name,
            substation_type,
            latitude,
            longitude,
        });
    }

    if !violations.is_empty() {
        return Err(ValidationError { violations }.into());
    }

    info!("Loaded {} primary substations from catalog", entries.len());
    Ok(entries)
}

fn parse_coordinate(
    raw: &str,
    column: &str,
    range: &std::ops::RangeInclusive<f64>,
    row: usize,
    violations: &mut Vec<Violation>,
) -> Option<f64> {
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<f64>() {
        Ok(value) if range.contains(&value) => Some(value),
        _ => {
            violations.push(catalog_violation(
                row,
                column,
                format!("'{}' outside {:?}", raw, range),
            ));
            None
        }
    }
}

fn catalog_violation(row: usize, field: &str, reason: impl Into<String>) -> Violation {
    Violation {
        row: Some(row),
        field: field.to_string(),
        reason: reason.into(),
    }
}
