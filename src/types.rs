//! Shared domain types for the decoder core.
//!
//! Small integer identifiers used throughout the search, plus the result and
//! symbol-table types exposed to orchestration callers.

use serde::{Deserialize, Serialize};

/// Identifier of a state in the search graph.
pub type StateId = u32;

/// Input/output label on a graph arc. Label `0` is epsilon.
pub type Label = i32;

/// The epsilon label: arcs with this input label consume no acoustic frame.
pub const EPSILON: Label = 0;

/// A recognition result published by a decode task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// The transcribed text (space-joined symbols; empty when nothing was
    /// recognized yet).
    pub text: String,
    /// True for the single result that closes an utterance segment, false
    /// for intermediate partial results.
    pub is_final: bool,
}

impl RecognitionResult {
    pub fn partial(text: String) -> Self {
        Self {
            text,
            is_final: false,
        }
    }

    pub fn final_result(text: String) -> Self {
        Self {
            text,
            is_final: true,
        }
    }
}

/// Mapping from output labels to printable symbols (the `words.txt` style
/// table of the recognition system). Index 0 is conventionally `<eps>` and is
/// never produced by the decoder's best path.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<String>,
}

impl SymbolTable {
    pub fn new(symbols: Vec<String>) -> Self {
        Self { symbols }
    }

    /// Look up a symbol by label. Unknown labels render as `<unk-N>` so a
    /// mismatched table is visible in output instead of panicking.
    pub fn symbol(&self, label: Label) -> String {
        self.symbols
            .get(label as usize)
            .cloned()
            .unwrap_or_else(|| format!("<unk-{}>", label))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Render a label sequence as a space-joined string.
    pub fn join(&self, labels: &[Label]) -> String {
        labels
            .iter()
            .map(|&l| self.symbol(l))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
