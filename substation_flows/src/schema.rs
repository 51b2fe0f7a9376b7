//! Canonical measurement schema.
//!
//! `validate` is the hard gate used at ingestion boundaries; `check_integrity` is the
//! advisory variant used for monitoring and never fails.

use crate::error::{IntegrityWarning, ValidationError, Violation};
use crate::models::{FlowTable, PowerField, SUBSTATION_NAME_COLUMN};
use chrono::{DateTime, Duration, Utc};

/// Primary substations usually carry tens of MW; the bound only catches gross errors.
pub const MIN_POWER: f32 = -1_000.0;
pub const MAX_POWER: f32 = 1_000.0;

pub fn default_max_age() -> Duration {
    Duration::hours(24)
}

/// Validate a batch. Columns missing from the batch are allowed, but at least one of MW
/// or MVA must be present; a file carrying only MVAr has no usable power signal.
pub fn validate(table: FlowTable) -> Result<FlowTable, ValidationError> {
    let violations = collect_violations(&table);
    if violations.is_empty() {
        Ok(table)
    } else {
        Err(ValidationError { violations })
    }
}

/// Advisory checks: every validation violation plus a staleness check against `now`.
pub fn check_integrity(table: &FlowTable, max_age: Duration) -> Vec<IntegrityWarning> {
    check_integrity_at(table, max_age, Utc::now())
}

pub fn check_integrity_at(
    table: &FlowTable,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Vec<IntegrityWarning> {
    let mut warnings: Vec<IntegrityWarning> = collect_violations(table)
        .into_iter()
        .map(IntegrityWarning::Invalid)
        .collect();

    match table.latest_timestamp() {
        Some(latest) => {
            let cutoff = now - max_age;
            if latest < cutoff {
                warnings.push(IntegrityWarning::Stale { latest, cutoff });
            }
        }
        None => warnings.push(IntegrityWarning::NoRecords),
    }

    warnings
}

fn collect_violations(table: &FlowTable) -> Vec<Violation> {
    let mut violations = Vec::new();

    if !table.has_field(PowerField::ActivePower) && !table.has_field(PowerField::ApparentPower) {
        violations.push(Violation::set_level(
            "MW/MVA",
            "batch must contain at least one of 'MW' or 'MVA' columns",
        ));
    }

    if table.entity_key.trim().is_empty() {
        violations.push(Violation::set_level(SUBSTATION_NAME_COLUMN, "empty substation name"));
    }

    for (row, record) in table.records.iter().enumerate() {
        if record.entity_key != table.entity_key {
            violations.push(Violation {
                row: Some(row),
                field: SUBSTATION_NAME_COLUMN.to_string(),
                reason: format!(
                    "record belongs to '{}', batch is '{}'",
                    record.entity_key, table.entity_key
                ),
            });
        }

        for field in PowerField::ALL {
            let Some(value) = record.value(field) else {
                continue;
            };
            if !table.has_field(field) {
                violations.push(Violation::row(row, field, "value present for undeclared column"));
            } else if !value.is_finite() || !(MIN_POWER..=MAX_POWER).contains(&value) {
                violations.push(Violation::row(
                    row,
                    field,
                    format!("{} outside [{}, {}]", value, MIN_POWER, MAX_POWER),
                ));
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MeasurementRecord;
    use chrono::TimeZone;

    fn table_with(fields: &[PowerField], value: f32) -> FlowTable {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut record = MeasurementRecord::new("test", t);
        for field in fields {
            record = record.with_value(*field, Some(value));
        }
        FlowTable::new("test", fields.iter().copied(), vec![record])
    }

    #[test]
    fn test_validation_requires_mw_or_mva() {
        assert!(validate(table_with(&[PowerField::ActivePower], 10.0)).is_ok());
        assert!(validate(table_with(&[PowerField::ApparentPower], 10.0)).is_ok());
        assert!(validate(table_with(
            &[PowerField::ActivePower, PowerField::ApparentPower],
            10.0
        ))
        .is_ok());

        let err = validate(table_with(&[PowerField::ReactivePower], 5.0)).unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert!(err.to_string().contains("at least one of 'MW' or 'MVA'"));
    }

    #[test]
    fn test_mvar_does_not_affect_mw_mva_requirement() {
        assert!(validate(table_with(
            &[PowerField::ActivePower, PowerField::ReactivePower],
            1.0
        ))
        .is_ok());
        let empty = FlowTable::new("test", [PowerField::ReactivePower], vec![]);
        assert!(validate(empty).is_err());
        let empty_mw = FlowTable::new("test", [PowerField::ActivePower], vec![]);
        assert!(validate(empty_mw).is_ok());
    }

    #[test]
    fn test_every_out_of_range_value_is_reported() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let records = vec![
            MeasurementRecord::new("test", t)
                .with_value(PowerField::ActivePower, Some(1_500.0))
                .with_value(PowerField::ReactivePower, Some(-2_000.0)),
            MeasurementRecord::new("test", t + Duration::minutes(30))
                .with_value(PowerField::ActivePower, Some(f32::NAN)),
            MeasurementRecord::new("test", t + Duration::minutes(60))
                .with_value(PowerField::ActivePower, Some(1_000.0)),
        ];
        let table = FlowTable::new(
            "test",
            [PowerField::ActivePower, PowerField::ReactivePower],
            records,
        );

        let err = validate(table).unwrap_err();
        let located: Vec<(Option<usize>, &str)> = err
            .violations
            .iter()
            .map(|v| (v.row, v.field.as_str()))
            .collect();
        assert_eq!(
            located,
            vec![(Some(0), "MW"), (Some(0), "MVAr"), (Some(1), "MW")]
        );
    }

    #[test]
    fn test_integrity_reports_staleness_without_failing() {
        let table = table_with(&[PowerField::ActivePower], 3.0);
        let now = Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap();

        let warnings = check_integrity_at(&table, default_max_age(), now);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], IntegrityWarning::Stale { .. }));

        let fresh_now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert!(check_integrity_at(&table, default_max_age(), fresh_now).is_empty());
    }

    #[test]
    fn test_integrity_aggregates_violations() {
        let table = table_with(&[PowerField::ReactivePower], 5_000.0);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        let warnings = check_integrity_at(&table, default_max_age(), now);
        assert_eq!(warnings.len(), 2);
        assert!(warnings
            .iter()
            .all(|w| matches!(w, IntegrityWarning::Invalid(_))));
    }

    #[test]
    fn test_integrity_flags_empty_batches() {
        let table = FlowTable::new("test", [PowerField::ActivePower], vec![]);
        let warnings = check_integrity(&table, default_max_age());
        assert_eq!(warnings, vec![IntegrityWarning::NoRecords]);
    }
}
