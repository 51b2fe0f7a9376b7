use substation_flows::{
    check_integrity, merge_into_store, normalize, EntityLocks, HistoryStore,
    InMemoryHistoryStore, PowerField,
};
use substation_flows::schema::default_max_age;

const LABEL: &str = "Albrighton 11Kv Primary Transformer Flows";
const FLOWS: &str = include_str!("../test_data/albrighton-11kv-primary-transformer-flows.csv");

fn main() -> anyhow::Result<()> {
    // Normalize a wide-format download
    let table = normalize(FLOWS.as_bytes(), LABEL)?;
    let columns: Vec<&str> = table.column_names();
    println!("Normalized {} rows with columns {:?}", table.len(), columns);

    for warning in check_integrity(&table, default_max_age()) {
        println!("  ⚠️  {}", warning);
    }

    // Merge the same download twice: the second pass adds nothing
    let store = InMemoryHistoryStore::new();
    let locks = EntityLocks::new();
    let first = merge_into_store(&store, &locks, table.clone())?;
    let second = merge_into_store(&store, &locks, table)?;

    println!("First merge added {} rows", first.added_rows());
    println!("Second merge added {} rows", second.added_rows());

    if let Some(history) = store.read(LABEL)? {
        let latest = history.records.last();
        if let Some(mw) = latest.and_then(|record| record.value(PowerField::ActivePower)) {
            println!("Latest MW reading: {:.2} ({} rows stored)", mw, history.len());
        }
    }
    Ok(())
}
