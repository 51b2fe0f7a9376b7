//! Fuzzy name scoring for the offline triage report.
//!
//! The catalog contains genuine near-duplicates, so nothing here feeds automatic
//! resolution. Suggestions are for a person curating the override table.

use crate::error::ResolutionError;
use crate::models::{ResolutionMethod, SubstationCatalogEntry};
use crate::name_resolver::simplify;
use serde::Serialize;
use std::cmp::Ordering;

pub const DEFAULT_TOP_K: usize = 3;

/// Similarity of two names in `0.0..=100.0`.
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Weighted ratio over plain, token-sorted, token-set and partial comparisons.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedTokenSetScorer;

impl SimilarityScorer for WeightedTokenSetScorer {
    fn score(&self, a: &str, b: &str) -> f64 {
        let a_tokens = tokens(a);
        let b_tokens = tokens(b);
        if a_tokens.is_empty() || b_tokens.is_empty() {
            return 0.0;
        }
        let a_joined = a_tokens.join(" ");
        let b_joined = b_tokens.join(" ");

        let mut best = ratio(&a_joined, &b_joined);
        best = best.max(token_sort_ratio(&a_tokens, &b_tokens) * 0.95);
        best = best.max(token_set_ratio(&a_tokens, &b_tokens) * 0.95);

        let (shorter, longer) = if a_joined.chars().count() <= b_joined.chars().count() {
            (&a_joined, &b_joined)
        } else {
            (&b_joined, &a_joined)
        };
        if longer.chars().count() as f64 >= 1.5 * shorter.chars().count() as f64 {
            best = best.max(partial_ratio(shorter, longer) * 0.9);
        }
        best
    }
}

fn tokens(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

fn token_sort_ratio(a: &[String], b: &[String]) -> f64 {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    ratio(&a.join(" "), &b.join(" "))
}

fn token_set_ratio(a: &[String], b: &[String]) -> f64 {
    let mut common: Vec<&String> = a.iter().filter(|t| b.contains(t)).collect();
    let mut only_a: Vec<&String> = a.iter().filter(|t| !b.contains(t)).collect();
    let mut only_b: Vec<&String> = b.iter().filter(|t| !a.contains(t)).collect();
    for v in [&mut common, &mut only_a, &mut only_b] {
        v.sort();
        v.dedup();
    }

    let join = |v: &[&String]| v.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" ");
    let sect = join(&common);
    let with_a = format!("{} {}", sect, join(&only_a)).trim().to_string();
    let with_b = format!("{} {}", sect, join(&only_b)).trim().to_string();

    let mut best = ratio(&with_a, &with_b);
    if !sect.is_empty() {
        best = best.max(ratio(&sect, &with_a)).max(ratio(&sect, &with_b));
    }
    best
}

/// Best ratio of `shorter` against every equally long window of `longer`.
fn partial_ratio(shorter: &str, longer: &str) -> f64 {
    let short: Vec<char> = shorter.chars().collect();
    let long: Vec<char> = longer.chars().collect();
    if short.is_empty() || long.len() < short.len() {
        return 0.0;
    }
    (0..=long.len() - short.len())
        .map(|start| {
            let window: String = long[start..start + short.len()].iter().collect();
            ratio(shorter, &window)
        })
        .fold(0.0, f64::max)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Candidate {
    pub catalog_name: String,
    pub substation_number: u32,
    pub score: f64,
}

/// Top `k` catalog entries for `query`, comparing simplified names.
pub fn top_k_candidates<S: SimilarityScorer + ?Sized>(
    scorer: &S,
    query: &str,
    catalog: &[SubstationCatalogEntry],
    k: usize,
) -> Vec<Candidate> {
    let query_key = simplify(query);
    let mut candidates: Vec<Candidate> = catalog
        .iter()
        .map(|entry| Candidate {
            catalog_name: entry.substation_name.clone(),
            substation_number: entry.substation_number,
            score: scorer.score(&query_key, &simplify(&entry.substation_name)),
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.substation_number.cmp(&b.substation_number))
    });
    candidates.truncate(k);
    candidates
}

/// One row of the triage report.
#[derive(Debug, Clone, Serialize)]
pub struct OverrideSuggestion {
    pub raw_label: String,
    pub simplified_key: String,
    pub problem: String,
    pub resolution_method: ResolutionMethod,
    pub candidates: Vec<Candidate>,
}

/// Build suggestions for every label the resolver could not link. Ambiguous labels
/// list the entries sharing their key so the curator can pick by substation number.
pub fn suggest_overrides<S: SimilarityScorer + ?Sized>(
    scorer: &S,
    failures: &[ResolutionError],
    catalog: &[SubstationCatalogEntry],
    k: usize,
) -> Vec<OverrideSuggestion> {
    failures
        .iter()
        .map(|failure| {
            let (label, key, candidates) = match failure {
                ResolutionError::Ambiguous {
                    label,
                    key,
                    candidates,
                } => {
                    let shared: Vec<SubstationCatalogEntry> = catalog
                        .iter()
                        .filter(|e| candidates.contains(&e.substation_number))
                        .cloned()
                        .collect();
                    (label, key, top_k_candidates(scorer, label, &shared, shared.len()))
                }
                ResolutionError::Unmatched { label, key } => {
                    (label, key, top_k_candidates(scorer, label, catalog, k))
                }
                ResolutionError::UnknownOverrideTarget { key, .. } => {
                    (key, key, top_k_candidates(scorer, key, catalog, k))
                }
            };
            OverrideSuggestion {
                raw_label: label.clone(),
                simplified_key: key.clone(),
                problem: failure.to_string(),
                resolution_method: ResolutionMethod::FuzzyFallback,
                candidates,
            }
        })
        .collect()
}
