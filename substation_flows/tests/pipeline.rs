use substation_flows::error::StoreError;
use substation_flows::models::ResolutionMethod;
use substation_flows::{
    load_catalog_csv, merge_into_store, normalize, EntityLocks, HistoryStore, NameResolver,
    OverrideTable, ParquetHistoryStore, PipelineError, PowerField,
};
use tempfile::TempDir;

const LOCATIONS: &str = include_str!("../test_data/primary_substation_locations.csv");
const OVERRIDES: &str = include_str!("../test_data/name_overrides.csv");
const ABERAERON: &str = include_str!("../test_data/aberaeron-primary-transformer-flows.csv");
const ALBRIGHTON: &str =
    include_str!("../test_data/albrighton-11kv-primary-transformer-flows.csv");
const FILTON: &str = include_str!("../test_data/filton-dc-primary-transformer-flows.csv");

const ABERAERON_LABEL: &str = "Aberaeron Town Primary Transformer Flows";
const ALBRIGHTON_LABEL: &str = "Albrighton 11Kv Primary Transformer Flows";
const FILTON_LABEL: &str = "Filton Dc Primary Transformer Flows";

#[test]
fn test_ingest_is_idempotent_on_reingestion() {
    let dir = TempDir::new().unwrap();
    let store = ParquetHistoryStore::new(dir.path()).unwrap();
    let locks = EntityLocks::new();

    let batch = normalize(ABERAERON.as_bytes(), ABERAERON_LABEL).unwrap();
    let first = merge_into_store(&store, &locks, batch.clone()).unwrap();
    let second = merge_into_store(&store, &locks, batch).unwrap();

    assert_eq!(first.merged_rows, 4);
    assert_eq!(second.added_rows(), 0);

    let history = store.read(ABERAERON_LABEL).unwrap().unwrap();
    assert_eq!(history.len(), 4);
    assert!(history.is_sorted_unique());
    assert_eq!(
        history.column_names(),
        vec!["timestamp", "MW", "MVA", "MVAr", "substation_name"]
    );
}

#[test]
fn test_mva_only_download_merges_into_mw_history() {
    let dir = TempDir::new().unwrap();
    let store = ParquetHistoryStore::new(dir.path()).unwrap();
    let locks = EntityLocks::new();

    let mw_only = "ValueDate,MW Inst\n\
                   2025-01-14T09:00:00Z,1.70\n\
                   2025-01-14T09:30:00Z,1.75\n";
    let mva_only = "site,time,unit,value\n\
                    x,2025-01-14T09:30:00Z,MVA,1.90\n\
                    x,2025-01-14T10:00:00Z,MVA,1.95\n";

    merge_into_store(&store, &locks, normalize(mw_only.as_bytes(), FILTON_LABEL).unwrap()).unwrap();
    let stats =
        merge_into_store(&store, &locks, normalize(mva_only.as_bytes(), FILTON_LABEL).unwrap())
            .unwrap();
    assert_eq!(stats.merged_rows, 3);

    let history = store.read(FILTON_LABEL).unwrap().unwrap();
    assert!(history.has_field(PowerField::ActivePower));
    assert!(history.has_field(PowerField::ApparentPower));
    // The incoming row for 09:30 replaced the stored one, MW included.
    assert_eq!(history.records[1].active_power_mw, None);
    assert_eq!(history.records[1].apparent_power_mva, Some(1.90));
}

#[test]
fn test_sub_millisecond_readings_collapse_before_storage() {
    let dir = TempDir::new().unwrap();
    let store = ParquetHistoryStore::new(dir.path()).unwrap();
    let locks = EntityLocks::new();

    let csv = "ValueDate,MW\n\
               2026-03-01T00:00:00.0001Z,1.0\n\
               2026-03-01T00:00:00.0002Z,2.0\n";
    let stats =
        merge_into_store(&store, &locks, normalize(csv.as_bytes(), FILTON_LABEL).unwrap()).unwrap();
    assert_eq!(stats.merged_rows, 1);

    let history = store.read(FILTON_LABEL).unwrap().unwrap();
    assert_eq!(history.len(), 1);
    assert!(history.is_sorted_unique());
    assert_eq!(history.records[0].active_power_mw, Some(2.0));
}

#[test]
fn test_corrupt_history_does_not_block_other_entities() {
    let dir = TempDir::new().unwrap();
    let store = ParquetHistoryStore::new(dir.path()).unwrap();
    let locks = EntityLocks::new();
    std::fs::write(store.partition_path(ALBRIGHTON_LABEL), b"garbage").unwrap();

    let albrighton = normalize(ALBRIGHTON.as_bytes(), ALBRIGHTON_LABEL).unwrap();
    let filton = normalize(FILTON.as_bytes(), FILTON_LABEL).unwrap();

    let failed = merge_into_store(&store, &locks, albrighton);
    assert!(matches!(
        failed,
        Err(PipelineError::Store(StoreError::Corrupt(_)))
    ));
    assert!(merge_into_store(&store, &locks, filton).is_ok());
    assert_eq!(store.list_partitions().unwrap().len(), 2);
}

#[test]
fn test_labels_resolve_against_catalog() {
    let catalog = load_catalog_csv(LOCATIONS.as_bytes()).unwrap();
    let overrides = OverrideTable::from_csv_reader(OVERRIDES.as_bytes()).unwrap();
    let resolver = NameResolver::new(catalog, overrides);

    let report = resolver.resolve_all([ABERAERON_LABEL, ALBRIGHTON_LABEL, FILTON_LABEL]);
    assert!(report.failures.is_empty());

    let links: Vec<(u32, ResolutionMethod)> = report
        .links
        .iter()
        .map(|l| (l.substation_number, l.resolution_method))
        .collect();
    assert_eq!(
        links,
        vec![
            (110002, ResolutionMethod::ManualOverride),
            (110001, ResolutionMethod::ExactSimplifiedMatch),
            (110007, ResolutionMethod::ExactSimplifiedMatch),
        ]
    );
}
