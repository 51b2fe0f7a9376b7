use crate::models::PowerField;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// The raw file could not be mapped onto any known layout. Fatal for that file only.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormatError {
    #[error("file has no data rows")]
    Empty,
    #[error("malformed CSV: {0}")]
    Csv(String),
    #[error("no recognizable time column (headers: {headers:?})")]
    MissingTimeColumn { headers: Vec<String> },
    #[error("long-format file must carry a single unit of MW or MVA, found {units:?}")]
    UnitMismatch { units: Vec<String> },
    #[error("headers {sources:?} all map to canonical column '{canonical}'")]
    DuplicateColumn {
        canonical: String,
        sources: Vec<String>,
    },
    #[error("unparseable timestamp '{value}' on line {line}")]
    InvalidTimestamp { line: usize, value: String },
    #[error("unparseable {column} value '{value}' on line {line}")]
    InvalidNumber {
        line: usize,
        column: String,
        value: String,
    },
}

/// A single failed check. `row` is `None` for set-level problems.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub row: Option<usize>,
    pub field: String,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "row {} {}: {}", row, self.field, self.reason),
            None => write!(f, "{}: {}", self.field, self.reason),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{} validation violation(s): {}", .violations.len(), join_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Advisory only. Produced by `check_integrity`, never returned as an `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrityWarning {
    Invalid(Violation),
    Stale {
        latest: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    },
    NoRecords,
}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityWarning::Invalid(v) => write!(f, "{}", v),
            IntegrityWarning::Stale { latest, cutoff } => write!(
                f,
                "stale data: latest timestamp {} is older than {}",
                latest.to_rfc3339(),
                cutoff.to_rfc3339()
            ),
            IntegrityWarning::NoRecords => f.write_str("no records"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("'{label}' (simplified '{key}') matches {} catalog entries: {candidates:?}", .candidates.len())]
    Ambiguous {
        label: String,
        key: String,
        candidates: Vec<u32>,
    },
    #[error("'{label}' (simplified '{key}') has no catalog match")]
    Unmatched { label: String, key: String },
    #[error("override for '{key}' points at unknown catalog target '{target}'")]
    UnknownOverrideTarget { key: String, target: String },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("catalog is missing column '{0}'")]
    MissingColumn(String),
    #[error("catalog validation failed: {0}")]
    Invalid(#[from] ValidationError),
    #[error("expected exactly one matching resource, found {found}")]
    NotExactlyOne { found: usize },
    #[error("resource list is empty")]
    NoResources,
    #[error("override table: {0}")]
    Override(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored history is unreadable: {0}")]
    Corrupt(String),
    #[error("parquet error: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("history belongs to '{existing}', not '{incoming}'")]
    EntityMismatch { existing: String, incoming: String },
    #[error("cannot combine histories: {0}")]
    Frame(#[from] StoreError),
}

/// Everything that can fail inside one entity's pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A per-entity failure as surfaced at the batch boundary.
#[derive(Debug)]
pub struct EntityFailure {
    pub entity: String,
    pub file: Option<String>,
    pub error: PipelineError,
}

impl fmt::Display for EntityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{} ({}): {}", self.entity, file, self.error),
            None => write!(f, "{}: {}", self.entity, self.error),
        }
    }
}

impl Violation {
    pub fn row(row: usize, field: PowerField, reason: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            field: field.column_name().to_string(),
            reason: reason.into(),
        }
    }

    pub fn set_level(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            row: None,
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
