pub mod catalog;
pub mod config;
pub mod error;
mod frame;
pub mod fuzzy;
pub mod history_store;
pub mod merge;
pub mod models;
pub mod name_resolver;
pub mod normalizer;
pub mod schema;

pub use catalog::{load_catalog_csv, load_catalog_path, select_flow_resources};
pub use config::PipelineConfig;
pub use error::{
    CatalogError, EntityFailure, FormatError, IntegrityWarning, PipelineError, ResolutionError,
    StoreError, ValidationError,
};
pub use fuzzy::{suggest_overrides, SimilarityScorer, WeightedTokenSetScorer};
pub use history_store::{
    merge_into_store, EntityLocks, HistoryStore, InMemoryHistoryStore, ParquetHistoryStore,
};
pub use merge::{merge_history, MergeStats};
pub use models::{FlowTable, MeasurementRecord, NameLink, PowerField, ResourceMetadata};
pub use name_resolver::{simplify, NameResolver, OverrideTable};
pub use normalizer::normalize;
pub use schema::{check_integrity, validate};
