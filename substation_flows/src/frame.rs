//! Conversion between typed flow tables and the persisted polars layout.
//!
//! `timestamp` is `Datetime(ms, "UTC")`, each power column present in the table is
//! `Float32`, and `substation_name` repeats the entity key on every row.

use crate::error::StoreError;
use crate::models::{
    FlowTable, MeasurementRecord, PowerField, SUBSTATION_NAME_COLUMN, TIMESTAMP_COLUMN,
};
use chrono::{DateTime, Utc};
use polars::prelude::*;

pub(crate) fn to_dataframe(table: &FlowTable) -> Result<DataFrame, StoreError> {
    let millis: Vec<i64> = table
        .records
        .iter()
        .map(|r| r.timestamp.timestamp_millis())
        .collect();
    let timestamps = Series::new(TIMESTAMP_COLUMN.into(), millis).cast(&DataType::Datetime(
        TimeUnit::Milliseconds,
        Some("UTC".into()),
    ))?;

    let mut columns = vec![timestamps];
    for field in &table.fields {
        let values: Vec<Option<f32>> = table.records.iter().map(|r| r.value(*field)).collect();
        columns.push(Series::new(field.column_name().into(), values));
    }
    let names: Vec<&str> = table.records.iter().map(|r| r.entity_key.as_str()).collect();
    columns.push(Series::new(SUBSTATION_NAME_COLUMN.into(), names));

    Ok(DataFrame::new(columns)?)
}

pub(crate) fn corrupt(reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt(reason.into())
}

/// Rebuild a table from a frame. With `expected_entity` set every row must carry that
/// name; otherwise the key comes from the first row, or `fallback_entity` when empty.
pub(crate) fn from_dataframe(
    df: &DataFrame,
    expected_entity: Option<&str>,
    fallback_entity: &str,
) -> Result<FlowTable, StoreError> {
    let ts_column = df
        .column(TIMESTAMP_COLUMN)
        .map_err(|_| corrupt("missing timestamp column"))?;
    let millis_per_unit = match ts_column.dtype() {
        DataType::Datetime(TimeUnit::Milliseconds, _) => 1,
        DataType::Datetime(TimeUnit::Microseconds, _) => 1_000,
        DataType::Datetime(TimeUnit::Nanoseconds, _) => 1_000_000,
        other => return Err(corrupt(format!("timestamp column has type {}", other))),
    };
    let raw = ts_column.cast(&DataType::Int64)?;
    let mut timestamps: Vec<DateTime<Utc>> = Vec::with_capacity(df.height());
    for (row, value) in raw.i64()?.into_iter().enumerate() {
        let ts = value
            .and_then(|v| DateTime::<Utc>::from_timestamp_millis(v / millis_per_unit))
            .ok_or_else(|| corrupt(format!("row {} has no valid timestamp", row)))?;
        timestamps.push(ts);
    }

    let names: Vec<Option<String>> = df
        .column(SUBSTATION_NAME_COLUMN)
        .map_err(|_| corrupt("missing substation_name column"))?
        .str()?
        .into_iter()
        .map(|name| name.map(str::to_string))
        .collect();

    let entity_key = match (expected_entity, names.first().cloned().flatten()) {
        (Some(expected), _) => expected.to_string(),
        (None, Some(stored)) => stored,
        (None, None) => fallback_entity.to_string(),
    };
    if let Some(row) = names
        .iter()
        .position(|name| name.as_deref() != Some(entity_key.as_str()))
    {
        return Err(corrupt(format!(
            "row {} belongs to {:?}, expected '{}'",
            row, names[row], entity_key
        )));
    }

    let mut fields = Vec::new();
    let mut records: Vec<MeasurementRecord> = timestamps
        .into_iter()
        .map(|ts| MeasurementRecord::new(entity_key.clone(), ts))
        .collect();
    for field in PowerField::ALL {
        let Ok(column) = df.column(field.column_name()) else {
            continue;
        };
        fields.push(field);
        let values = column.cast(&DataType::Float32)?;
        for (record, value) in records.iter_mut().zip(values.f32()?.into_iter()) {
            record.set_value(field, value);
        }
    }

    Ok(FlowTable::new(entity_key, fields, records))
}
