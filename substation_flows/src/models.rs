use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const SUBSTATION_NAME_COLUMN: &str = "substation_name";

/// Power fields a flow file may carry. The column names are fixed by downstream consumers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PowerField {
    #[serde(rename = "MW")]
    ActivePower,
    #[serde(rename = "MVA")]
    ApparentPower,
    #[serde(rename = "MVAr")]
    ReactivePower,
}

impl PowerField {
    pub const ALL: [PowerField; 3] = [
        PowerField::ActivePower,
        PowerField::ApparentPower,
        PowerField::ReactivePower,
    ];

    pub fn column_name(&self) -> &'static str {
        match self {
            PowerField::ActivePower => "MW",
            PowerField::ApparentPower => "MVA",
            PowerField::ReactivePower => "MVAr",
        }
    }

    pub fn from_column_name(name: &str) -> Option<Self> {
        PowerField::ALL
            .into_iter()
            .find(|field| field.column_name() == name)
    }
}

impl fmt::Display for PowerField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// One timestamped reading for one substation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementRecord {
    #[serde(rename = "substation_name")]
    pub entity_key: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "MW")]
    pub active_power_mw: Option<f32>,
    #[serde(rename = "MVA")]
    pub apparent_power_mva: Option<f32>,
    #[serde(rename = "MVAr")]
    pub reactive_power_mvar: Option<f32>,
}

impl MeasurementRecord {
    pub fn new(entity_key: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity_key: entity_key.into(),
            timestamp,
            active_power_mw: None,
            apparent_power_mva: None,
            reactive_power_mvar: None,
        }
    }

    pub fn with_value(mut self, field: PowerField, value: Option<f32>) -> Self {
        self.set_value(field, value);
        self
    }

    pub fn set_value(&mut self, field: PowerField, value: Option<f32>) {
        match field {
            PowerField::ActivePower => self.active_power_mw = value,
            PowerField::ApparentPower => self.apparent_power_mva = value,
            PowerField::ReactivePower => self.reactive_power_mvar = value,
        }
    }

    pub fn value(&self, field: PowerField) -> Option<f32> {
        match field {
            PowerField::ActivePower => self.active_power_mw,
            PowerField::ApparentPower => self.apparent_power_mva,
            PowerField::ReactivePower => self.reactive_power_mvar,
        }
    }
}

/// A batch of records for a single entity together with the set of power columns the
/// batch carries. Column presence is tracked separately from values: a column can be
/// present and still hold nulls.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowTable {
    pub entity_key: String,
    pub fields: BTreeSet<PowerField>,
    pub records: Vec<MeasurementRecord>,
}

impl FlowTable {
    pub fn new(
        entity_key: impl Into<String>,
        fields: impl IntoIterator<Item = PowerField>,
        records: Vec<MeasurementRecord>,
    ) -> Self {
        Self {
            entity_key: entity_key.into(),
            fields: fields.into_iter().collect(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_field(&self, field: PowerField) -> bool {
        self.fields.contains(&field)
    }

    /// Canonical column names in output order.
    pub fn column_names(&self) -> Vec<&'static str> {
        let mut columns = vec![TIMESTAMP_COLUMN];
        columns.extend(self.fields.iter().map(|f| f.column_name()));
        columns.push(SUBSTATION_NAME_COLUMN);
        columns
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.records.iter().map(|r| r.timestamp).max()
    }

    pub fn is_sorted_unique(&self) -> bool {
        self.records
            .windows(2)
            .all(|pair| pair[0].timestamp < pair[1].timestamp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubstationCatalogEntry {
    pub substation_number: u32,
    pub substation_name: String,
    pub substation_type: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    ManualOverride,
    ExactSimplifiedMatch,
    /// Only ever produced by the triage report, never by automatic resolution.
    FuzzyFallback,
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionMethod::ManualOverride => "manual_override",
            ResolutionMethod::ExactSimplifiedMatch => "exact_simplified_match",
            ResolutionMethod::FuzzyFallback => "fuzzy_fallback",
        };
        f.write_str(name)
    }
}

/// Audit record linking a flow-side label to a catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NameLink {
    pub raw_label: String,
    pub simplified_key: String,
    pub resolved_catalog_name: String,
    pub substation_number: u32,
    pub resolution_method: ResolutionMethod,
}

/// Metadata the portal client supplies alongside each downloaded resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceMetadata {
    /// e.g. "Aberaeron 11kV Transformer Flows"
    pub name: String,
    pub format: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    /// Local path of the downloaded bytes, relative to the manifest.
    #[serde(default)]
    pub file: Option<String>,
}
