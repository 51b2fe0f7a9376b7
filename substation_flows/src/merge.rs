use crate::error::{MergeError, StoreError};
use crate::frame::{from_dataframe, to_dataframe};
use crate::models::{FlowTable, TIMESTAMP_COLUMN};
use polars::prelude::*;

/// Merge a new batch into an entity's existing history.
///
/// The result carries the union of both sides' columns; rows from a side without a
/// column hold nulls for it. When both sides carry the same timestamp the incoming row
/// replaces the stored row entirely. Overlapping download windows make this the normal
/// case on re-ingestion. The output is sorted ascending with unique timestamps and is
/// meant to replace the stored history wholesale.
pub fn merge_history(
    existing: Option<FlowTable>,
    mut incoming: FlowTable,
) -> Result<FlowTable, MergeError> {
    let Some(mut existing) = existing else {
        let df = to_dataframe(&incoming)?;
        return finish(df, incoming);
    };

    if existing.entity_key != incoming.entity_key {
        return Err(MergeError::EntityMismatch {
            existing: existing.entity_key,
            incoming: incoming.entity_key,
        });
    }

    // Project both sides onto the superset schema so the frames stack column for column.
    let fields: Vec<_> = existing.fields.union(&incoming.fields).copied().collect();
    existing.fields.extend(fields.iter().copied());
    incoming.fields.extend(fields);

    let mut df = to_dataframe(&existing)?;
    df.vstack_mut(&to_dataframe(&incoming)?).map_err(StoreError::from)?;
    finish(df, incoming)
}

/// Keep the last row per timestamp, sort, and read the typed table back.
fn finish(df: DataFrame, template: FlowTable) -> Result<FlowTable, MergeError> {
    let merged = df
        .unique_stable(Some(&[TIMESTAMP_COLUMN.into()]), UniqueKeepStrategy::Last, None)
        .and_then(|df| df.sort([TIMESTAMP_COLUMN], SortMultipleOptions::default()))
        .map_err(StoreError::from)?;

    let table = from_dataframe(&merged, Some(&template.entity_key), &template.entity_key)?;
    Ok(FlowTable::new(table.entity_key, template.fields, table.records))
}

/// Counts reported for one entity's merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeStats {
    pub existing_rows: usize,
    pub incoming_rows: usize,
    pub merged_rows: usize,
}

impl MergeStats {
    /// Rows in the merged history that were not there before.
    pub fn added_rows(&self) -> usize {
        self.merged_rows.saturating_sub(self.existing_rows)
    }
}
