//! Resource bundles for decode workers.
//!
//! Two kinds of resources back a decode: shared read-only artifacts (the
//! search graph, transition map, priors and symbol table) referenced by every
//! task through an `Arc`, and per-worker mutable scorers (acoustic model,
//! feature pipeline, endpoint classifier) owned exclusively by one pool
//! worker.

use std::sync::Arc;

use crate::decoder::decodable::{AcousticModel, FeatureSource};
use crate::decoder::graph::{Fst, TransitionMap};
use crate::types::SymbolTable;
use crate::vad::SpeechClassifier;

/// Immutable artifacts shared by all decode tasks.
pub struct DecodeResources {
    /// The compiled recognition graph.
    pub graph: Arc<dyn Fst + Send + Sync>,
    /// Maps graph input labels to acoustic output columns.
    pub tree: TransitionMap,
    /// Per-unit log priors, subtracted from raw model scores.
    pub log_prior: Vec<f32>,
    /// Output-label to word mapping for rendering results.
    pub symbols: SymbolTable,
}

/// Mutable scorers owned by a single pool worker. One instance exists per
/// worker thread, so none of these need interior locking.
pub struct SpeechResources<M: AcousticModel, F: FeatureSource, C: SpeechClassifier> {
    pub model: M,
    pub features: F,
    pub classifier: C,
}
