//! Turns a raw flow CSV in any of the known portal layouts into a validated `FlowTable`.
//!
//! Column names differ between licence areas and over time:
//!
//! ```text
//! East Midlands  ValueDate,                       MVA,                     Volts
//! West Midlands  ValueDate, Amps,                 MVA, MVAr,      MW,      Volts
//! South Wales    ValueDate, Current Inst, Derived MVA, MVAr Inst, MW Inst, Volts Inst
//! South West     ValueDate, Current Inst,              MVAr Inst, MW Inst, Volts Inst
//! Long format    site, time, unit, value
//! ```
//!
//! The layout is always detected from the header row and the data, never from the file
//! name. Identity comes from the caller's label, not from the file.

use crate::error::{FormatError, PipelineError};
use crate::models::{FlowTable, MeasurementRecord, PowerField};
use crate::schema;
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use csv::StringRecord;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalColumn {
    Timestamp,
    Power(PowerField),
}

/// Every historical header we know how to map onto the canonical schema.
const HEADER_RENAMES: &[(&str, CanonicalColumn)] = &[
    ("timestamp", CanonicalColumn::Timestamp),
    ("time", CanonicalColumn::Timestamp),
    ("ValueDate", CanonicalColumn::Timestamp),
    ("Timestamp", CanonicalColumn::Timestamp),
    ("MW", CanonicalColumn::Power(PowerField::ActivePower)),
    ("MW Inst", CanonicalColumn::Power(PowerField::ActivePower)),
    ("Derived MW", CanonicalColumn::Power(PowerField::ActivePower)),
    ("MVA", CanonicalColumn::Power(PowerField::ApparentPower)),
    ("MVA Inst", CanonicalColumn::Power(PowerField::ApparentPower)),
    ("Derived MVA", CanonicalColumn::Power(PowerField::ApparentPower)),
    ("MVAr", CanonicalColumn::Power(PowerField::ReactivePower)),
    ("MVAr Inst", CanonicalColumn::Power(PowerField::ReactivePower)),
    ("Derived MVAr", CanonicalColumn::Power(PowerField::ReactivePower)),
];

const LONG_UNIT_HEADER: &str = "unit";
const LONG_VALUE_HEADER: &str = "value";

const NULL_TOKENS: &[&str] = &["", "NA", "N/A", "null", "NULL", "None"];

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%d/%m/%Y %H:%M:%S%.f%:z",
];

const NAIVE_UTC_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.fZ",
    "%Y-%m-%d %H:%M:%S%.f UTC",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// A source column and the canonical column it becomes.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRename {
    pub index: usize,
    pub source: String,
    pub target: CanonicalColumn,
}

/// The closed set of layouts. Each variant carries the concrete rename table to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Wide { renames: Vec<ColumnRename> },
    /// One row per (site, time, unit, value); `value` is pivoted into the `unit` column.
    LongPivoted {
        unit: PowerField,
        renames: Vec<ColumnRename>,
    },
}

impl Layout {
    pub fn renames(&self) -> &[ColumnRename] {
        match self {
            Layout::Wide { renames } | Layout::LongPivoted { renames, .. } => renames,
        }
    }

    pub fn power_fields(&self) -> Vec<PowerField> {
        self.renames()
            .iter()
            .filter_map(|r| match r.target {
                CanonicalColumn::Power(field) => Some(field),
                CanonicalColumn::Timestamp => None,
            })
            .collect()
    }

    fn timestamp_rename(&self) -> Option<&ColumnRename> {
        self.renames()
            .iter()
            .find(|r| r.target == CanonicalColumn::Timestamp)
    }
}

/// Classify a file from its headers and rows.
pub fn detect_layout(headers: &[String], rows: &[StringRecord]) -> Result<Layout, FormatError> {
    let position = |name: &str| headers.iter().position(|h| h == name);

    let layout = match (position(LONG_UNIT_HEADER), position(LONG_VALUE_HEADER)) {
        (Some(unit_idx), Some(value_idx)) => {
            let unit = single_unit(rows, unit_idx)?;
            let mut renames = time_renames(headers);
            renames.push(ColumnRename {
                index: value_idx,
                source: LONG_VALUE_HEADER.to_string(),
                target: CanonicalColumn::Power(unit),
            });
            Layout::LongPivoted { unit, renames }
        }
        _ => {
            let renames = headers
                .iter()
                .enumerate()
                .filter_map(|(index, header)| {
                    canonical_column(header).map(|target| ColumnRename {
                        index,
                        source: header.clone(),
                        target,
                    })
                })
                .collect();
            Layout::Wide { renames }
        }
    };

    check_unique_targets(layout.renames())?;
    if layout.timestamp_rename().is_none() {
        return Err(FormatError::MissingTimeColumn {
            headers: headers.to_vec(),
        });
    }
    Ok(layout)
}

fn canonical_column(header: &str) -> Option<CanonicalColumn> {
    HEADER_RENAMES
        .iter()
        .find(|(source, _)| *source == header)
        .map(|(_, target)| *target)
}

fn time_renames(headers: &[String]) -> Vec<ColumnRename> {
    headers
        .iter()
        .enumerate()
        .filter(|(_, h)| canonical_column(h) == Some(CanonicalColumn::Timestamp))
        .map(|(index, header)| ColumnRename {
            index,
            source: header.clone(),
            target: CanonicalColumn::Timestamp,
        })
        .collect()
}

/// A long-format file must never silently mix units.
fn single_unit(rows: &[StringRecord], unit_idx: usize) -> Result<PowerField, FormatError> {
    let mut units: Vec<String> = Vec::new();
    for row in rows {
        let unit = row.get(unit_idx).unwrap_or("").to_string();
        if !units.contains(&unit) {
            units.push(unit);
        }
    }

    let only_unit = match units.as_slice() {
        [unit] => PowerField::from_column_name(unit),
        _ => None,
    };
    match only_unit {
        Some(field @ (PowerField::ActivePower | PowerField::ApparentPower)) => Ok(field),
        _ => Err(FormatError::UnitMismatch { units }),
    }
}

fn check_unique_targets(renames: &[ColumnRename]) -> Result<(), FormatError> {
    for (i, rename) in renames.iter().enumerate() {
        let sources: Vec<String> = renames
            .iter()
            .filter(|other| other.target == rename.target)
            .map(|other| other.source.clone())
            .collect();
        let first = renames.iter().position(|other| other.target == rename.target);
        if sources.len() > 1 && first == Some(i) {
            let canonical = match rename.target {
                CanonicalColumn::Timestamp => "timestamp".to_string(),
                CanonicalColumn::Power(field) => field.column_name().to_string(),
            };
            return Err(FormatError::DuplicateColumn { canonical, sources });
        }
    }
    Ok(())
}

/// Parse any of the timestamp notations seen in portal files. Values without an offset
/// are taken to be UTC already. Sub-millisecond digits are dropped to match the stored
/// `Datetime(ms)` resolution, so merge keys and persisted keys agree.
pub fn parse_utc_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    parse_any_notation(raw.trim()).map(|ts| ts.trunc_subsecs(3))
}

fn parse_any_notation(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in NAIVE_UTC_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

fn parse_power(raw: &str) -> Result<Option<f32>, ()> {
    let raw = raw.trim();
    if NULL_TOKENS.contains(&raw) {
        return Ok(None);
    }
    raw.parse::<f32>().map(Some).map_err(|_| ())
}

fn read_csv(bytes: &[u8]) -> Result<(Vec<String>, Vec<StringRecord>), FormatError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| FormatError::Csv(e.to_string()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let rows = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| FormatError::Csv(e.to_string()))?;

    Ok((headers, rows))
}

/// Normalize raw CSV bytes retrieved under `label` into sorted, validated records.
pub fn normalize(bytes: &[u8], label: &str) -> Result<FlowTable, PipelineError> {
    let (headers, rows) = read_csv(bytes)?;
    if rows.is_empty() {
        return Err(FormatError::Empty.into());
    }

    let layout = detect_layout(&headers, &rows)?;
    debug!("{}: detected {:?}", label, layout);

    let time_idx = layout
        .timestamp_rename()
        .map(|r| r.index)
        .ok_or_else(|| FormatError::MissingTimeColumn {
            headers: headers.clone(),
        })?;
    let power_columns: Vec<(usize, PowerField)> = layout
        .renames()
        .iter()
        .filter_map(|r| match r.target {
            CanonicalColumn::Power(field) => Some((r.index, field)),
            CanonicalColumn::Timestamp => None,
        })
        .collect();

    let mut records = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        // Header is line 1.
        let line = i + 2;
        let raw_time = row.get(time_idx).unwrap_or("");
        let timestamp =
            parse_utc_timestamp(raw_time).ok_or_else(|| FormatError::InvalidTimestamp {
                line,
                value: raw_time.to_string(),
            })?;

        let mut record = MeasurementRecord::new(label, timestamp);
        for (idx, field) in &power_columns {
            let raw_value = row.get(*idx).unwrap_or("");
            let value = parse_power(raw_value).map_err(|_| FormatError::InvalidNumber {
                line,
                column: field.column_name().to_string(),
                value: raw_value.to_string(),
            })?;
            record = record.with_value(*field, value);
        }
        records.push(record);
    }

    records.sort_by_key(|r| r.timestamp);

    let table = FlowTable::new(label, layout.power_fields(), records);
    Ok(schema::validate(table)?)
}
