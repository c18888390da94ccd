//! The `wfst_decoder` core library.
//!
//! A streaming speech decoder: frame-synchronous Viterbi beam search over a
//! WFST recognition graph, fed by a batched acoustic scorer and gated by a
//! voice-activity endpoint detector, with a worker pool for running many
//! concurrent decodes over a fixed set of scorer instances.

pub mod config;
pub mod decoder;
pub mod error;
pub mod runtime;
pub mod types;
pub mod vad;

pub use config::DecoderConfig;
pub use error::{DecodeError, Result};
pub use types::{Label, RecognitionResult, StateId, SymbolTable, EPSILON};
