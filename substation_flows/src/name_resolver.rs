//! Links flow-side labels to location-catalog entries.
//!
//! The two datasets are maintained independently and spell names differently
//! ("Albrighton 11Kv Primary Transformer Flows" vs "Albrighton"). Both sides are reduced
//! to a simplified key, a curated override table patches the known edge cases, and the
//! keys are joined by exact equality. Fuzzy scoring lives in `fuzzy` and is never used
//! here.

use crate::error::{CatalogError, ResolutionError};
use crate::models::{NameLink, ResolutionMethod, SubstationCatalogEntry};
use log::{debug, info, warn};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

fn simplify_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            // Portal resource names: "Aberaeron 11kV Transformer Flows"
            (r"(?i)\s*\bprimary transformer flows\b", ""),
            (r"(?i)\s*\btransformer flows\b", ""),
            (r"(?i)\d{2,}kv", ""),
            // "Sheffield Road 33 11 6 6kv S Stn", "Sandy Lane 33 6.6kV S Stn"
            (r"(?i)\b6[ .]6\s?kv\b", ""),
            (r"\bS[ /]Stn\b", ""),
            ("/", " "),
            (r"\b(?:132|66|33|11)\b", ""),
            (r"\bPrimary\b", ""),
            // "Infinity Park 33 11 Kv S Stn"
            (r"(?i)\bkv\b", ""),
            (r"\s+", " "),
        ]
        .into_iter()
        .map(|(pattern, replacement)| {
            (
                Regex::new(pattern).expect("simplification patterns are valid"),
                replacement,
            )
        })
        .collect()
    })
}

fn simplify_once(name: &str) -> String {
    let mut out = name.to_string();
    for (re, replacement) in simplify_rules() {
        out = re.replace_all(&out, *replacement).into_owned();
    }
    out.trim().trim_end_matches('.').trim().to_string()
}

/// Reduce a substation name to its join key. Applied identically to flow labels and
/// catalog names. Rules are re-applied until nothing changes, so the result is a fixed
/// point: `simplify(simplify(x)) == simplify(x)`.
pub fn simplify(name: &str) -> String {
    let mut current = simplify_once(name);
    loop {
        let next = simplify_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideTarget {
    /// Join against this catalog-side simplified name instead.
    SimplifiedName(String),
    /// Link straight to a catalog entry. Needed when two catalog entries share a name.
    SubstationNumber(u32),
}

#[derive(Debug, Deserialize)]
struct OverrideRow {
    simplified_name_in_flows: String,
    #[serde(default)]
    simplified_name_in_catalog: Option<String>,
    #[serde(default)]
    substation_number: Option<u32>,
}

/// Curated corrections keyed by flow-side simplified name. Loaded once per process and
/// handed to the resolver.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: HashMap<String, OverrideTarget>,
}

impl OverrideTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, CatalogError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Columns: `simplified_name_in_flows`, `simplified_name_in_catalog`,
    /// `substation_number`. Each row needs one of the last two.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut table = Self::new();

        for row in csv_reader.deserialize::<OverrideRow>() {
            let row = row?;
            let target = match (row.substation_number, row.simplified_name_in_catalog) {
                (Some(number), _) => OverrideTarget::SubstationNumber(number),
                (None, Some(name)) if !name.is_empty() => {
                    OverrideTarget::SimplifiedName(simplify(&name))
                }
                _ => {
                    return Err(CatalogError::Override(format!(
                        "'{}' has neither a catalog name nor a substation number",
                        row.simplified_name_in_flows
                    )))
                }
            };
            let key = simplify(&row.simplified_name_in_flows);
            if table.entries.insert(key.clone(), target).is_some() {
                return Err(CatalogError::Override(format!("duplicate key '{}'", key)));
            }
        }

        info!("Loaded {} name overrides", table.len());
        Ok(table)
    }

    pub fn insert(&mut self, flow_key: impl Into<String>, target: OverrideTarget) {
        self.entries.insert(flow_key.into(), target);
    }

    pub fn get(&self, flow_key: &str) -> Option<&OverrideTarget> {
        self.entries.get(flow_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of resolving a batch of labels.
#[derive(Debug, Default)]
pub struct ResolutionReport {
    pub links: Vec<NameLink>,
    pub failures: Vec<ResolutionError>,
}

pub struct NameResolver {
    catalog: Vec<SubstationCatalogEntry>,
    by_key: HashMap<String, Vec<usize>>,
    by_number: HashMap<u32, usize>,
    overrides: OverrideTable,
}

impl NameResolver {
    pub fn new(catalog: Vec<SubstationCatalogEntry>, overrides: OverrideTable) -> Self {
        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_number = HashMap::new();
        for (idx, entry) in catalog.iter().enumerate() {
            by_key
                .entry(simplify(&entry.substation_name))
                .or_default()
                .push(idx);
            by_number.insert(entry.substation_number, idx);
        }

        let shared = by_key.values().filter(|idxs| idxs.len() > 1).count();
        if shared > 0 {
            debug!("{} simplified catalog names are shared by several entries", shared);
        }

        Self {
            catalog,
            by_key,
            by_number,
            overrides,
        }
    }

    pub fn catalog(&self) -> &[SubstationCatalogEntry] {
        &self.catalog
    }

    /// Resolve one flow-side label. Ambiguous keys are reported, never guessed.
    pub fn resolve(&self, label: &str) -> Result<NameLink, ResolutionError> {
        let key = simplify(label);

        match self.overrides.get(&key) {
            Some(OverrideTarget::SubstationNumber(number)) => {
                let idx = self.by_number.get(number).copied().ok_or_else(|| {
                    ResolutionError::UnknownOverrideTarget {
                        key: key.clone(),
                        target: number.to_string(),
                    }
                })?;
                Ok(self.link(label, &key, idx, ResolutionMethod::ManualOverride))
            }
            Some(OverrideTarget::SimplifiedName(catalog_key)) => {
                match self.by_key.get(catalog_key).map(Vec::as_slice) {
                    Some([idx]) => {
                        Ok(self.link(label, &key, *idx, ResolutionMethod::ManualOverride))
                    }
                    Some(idxs) if !idxs.is_empty() => Err(self.ambiguous(label, &key, idxs)),
                    _ => Err(ResolutionError::UnknownOverrideTarget {
                        key,
                        target: catalog_key.clone(),
                    }),
                }
            }
            None => match self.by_key.get(&key).map(Vec::as_slice) {
                Some([idx]) => Ok(self.link(
                    label,
                    &key,
                    *idx,
                    ResolutionMethod::ExactSimplifiedMatch,
                )),
                Some(idxs) if !idxs.is_empty() => Err(self.ambiguous(label, &key, idxs)),
                _ => Err(ResolutionError::Unmatched {
                    label: label.to_string(),
                    key,
                }),
            },
        }
    }

    pub fn resolve_all<'a, I>(&self, labels: I) -> ResolutionReport
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut report = ResolutionReport::default();
        for label in labels {
            match self.resolve(label) {
                Ok(link) => report.links.push(link),
                Err(err) => {
                    warn!("{}", err);
                    report.failures.push(err);
                }
            }
        }
        report.links.sort_by(|a, b| a.simplified_key.cmp(&b.simplified_key));
        report
    }

    fn link(&self, label: &str, key: &str, idx: usize, method: ResolutionMethod) -> NameLink {
        let entry = &self.catalog[idx];
        NameLink {
            raw_label: label.to_string(),
            simplified_key: key.to_string(),
            resolved_catalog_name: entry.substation_name.clone(),
            substation_number: entry.substation_number,
            resolution_method: method,
        }
    }

    fn ambiguous(&self, label: &str, key: &str, idxs: &[usize]) -> ResolutionError {
        let mut candidates: Vec<u32> = idxs
            .iter()
            .map(|idx| self.catalog[*idx].substation_number)
            .collect();
        candidates.sort_unstable();
        ResolutionError::Ambiguous {
            label: label.to_string(),
            key: key.to_string(),
            candidates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::load_catalog_csv;

    const LOCATIONS: &str = include_str!("../test_data/primary_substation_locations.csv");
    const OVERRIDES: &str = include_str!("../test_data/name_overrides.csv");

    fn entry(number: u32, name: &str) -> SubstationCatalogEntry {
        SubstationCatalogEntry {
            substation_number: number,
            substation_name: name.to_string(),
            substation_type: "Primary".to_string(),
            latitude: Some(52.0),
            longitude: Some(-2.0),
        }
    }

    #[test]
    fn test_simplify_known_labels() {
        let cases = [
            ("Albrighton 11Kv Primary Transformer Flows", "Albrighton"),
            ("Aberaeron 11kV Transformer Flows", "Aberaeron"),
            ("Albrighton", "Albrighton"),
            ("Sheepbridge 11/6 6kv S/Stn", "Sheepbridge"),
            ("Sheffield Road 33 11 6 6kv S Stn", "Sheffield Road"),
            ("Sandy Lane 33 6.6kV S Stn", "Sandy Lane"),
            ("Infinity Park 33 11 Kv S Stn", "Infinity Park"),
            ("Filton Dc Primary", "Filton Dc"),
            ("St. Johns 132/33kv.", "St. Johns"),
            ("Regent Street", "Regent Street"),
        ];
        for (raw, expected) in cases {
            assert_eq!(simplify(raw), expected, "{}", raw);
        }
    }

    #[test]
    fn test_simplify_is_idempotent() {
        let labels = [
            "Albrighton 11Kv Primary Transformer Flows",
            "Sheepbridge 11/6 6kv S/Stn",
            "Road 3113",
            "  Park   Lane 11kv Primary.  ",
            "66 33 11 132",
            "A / B / C",
            "Milford Haven Grid",
            "Mill St 11 1 Kv..",
        ];
        for label in labels {
            let once = simplify(label);
            assert_eq!(simplify(&once), once, "{}", label);
        }
    }

    #[test]
    fn test_exact_simplified_match() {
        let resolver = NameResolver::new(vec![entry(1, "Albrighton")], OverrideTable::new());
        let link = resolver
            .resolve("Albrighton 11Kv Primary Transformer Flows")
            .unwrap();
        assert_eq!(link.simplified_key, "Albrighton");
        assert_eq!(link.resolved_catalog_name, "Albrighton");
        assert_eq!(link.resolution_method, ResolutionMethod::ExactSimplifiedMatch);
    }

    #[test]
    fn test_shared_catalog_name_is_ambiguous() {
        let resolver = NameResolver::new(
            vec![entry(7, "Park Lane"), entry(3, "Park Lane 11kv")],
            OverrideTable::new(),
        );
        assert_eq!(
            resolver.resolve("Park Lane Primary Transformer Flows"),
            Err(ResolutionError::Ambiguous {
                label: "Park Lane Primary Transformer Flows".to_string(),
                key: "Park Lane".to_string(),
                candidates: vec![3, 7],
            })
        );
    }

    #[test]
    fn test_override_by_number_disambiguates() {
        let mut overrides = OverrideTable::new();
        overrides.insert("Park Lane", OverrideTarget::SubstationNumber(7));
        let resolver =
            NameResolver::new(vec![entry(7, "Park Lane"), entry(3, "Park Lane")], overrides);
        let link = resolver.resolve("Park Lane Primary").unwrap();
        assert_eq!(link.substation_number, 7);
        assert_eq!(link.resolution_method, ResolutionMethod::ManualOverride);
    }

    #[test]
    fn test_override_by_name_replaces_key() {
        let mut overrides = OverrideTable::new();
        overrides.insert(
            "Aberaeron Town",
            OverrideTarget::SimplifiedName("Aberaeron".to_string()),
        );
        let resolver = NameResolver::new(vec![entry(2, "Aberaeron")], overrides);
        let link = resolver.resolve("Aberaeron Town Primary").unwrap();
        assert_eq!(link.simplified_key, "Aberaeron Town");
        assert_eq!(link.resolved_catalog_name, "Aberaeron");
        assert_eq!(link.resolution_method, ResolutionMethod::ManualOverride);
    }

    #[test]
    fn test_override_to_unknown_target_is_reported() {
        let mut overrides = OverrideTable::new();
        overrides.insert("Nowhere", OverrideTarget::SubstationNumber(99));
        let resolver = NameResolver::new(vec![entry(2, "Aberaeron")], overrides);
        assert!(matches!(
            resolver.resolve("Nowhere"),
            Err(ResolutionError::UnknownOverrideTarget { .. })
        ));
    }

    #[test]
    fn test_unmatched_label() {
        let resolver = NameResolver::new(vec![entry(2, "Aberaeron")], OverrideTable::new());
        assert!(matches!(
            resolver.resolve("Zebra Crossing Primary"),
            Err(ResolutionError::Unmatched { .. })
        ));
    }

    #[test]
    fn test_override_csv_against_catalog_fixture() {
        let catalog = load_catalog_csv(LOCATIONS.as_bytes()).unwrap();
        let overrides = OverrideTable::from_csv_reader(OVERRIDES.as_bytes()).unwrap();
        assert_eq!(overrides.len(), 2);

        let resolver = NameResolver::new(catalog, overrides);
        let report = resolver.resolve_all([
            "Albrighton 11Kv Primary Transformer Flows",
            "Park Lane Birmingham Primary Transformer Flows",
            "Park Lane Primary Transformer Flows",
            "Sheepbridge 11/6 6kv S/Stn",
            "Infinity Park Primary Transformer Flows",
        ]);

        let linked: Vec<(&str, u32)> = report
            .links
            .iter()
            .map(|l| (l.simplified_key.as_str(), l.substation_number))
            .collect();
        assert_eq!(
            linked,
            vec![
                ("Albrighton", 110001),
                ("Infinity Park", 110006),
                ("Park Lane Birmingham", 110003),
                ("Sheepbridge", 110005),
            ]
        );
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            ResolutionError::Ambiguous { candidates, .. } if candidates == &vec![110003, 110004]
        ));
    }

    #[test]
    fn test_override_rows_need_a_target() {
        let csv = "simplified_name_in_flows,simplified_name_in_catalog,substation_number\n\
                   Foo,,\n";
        assert!(matches!(
            OverrideTable::from_csv_reader(csv.as_bytes()),
            Err(CatalogError::Override(_))
        ));
    }
}
