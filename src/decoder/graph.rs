//! Search-graph collaborator interface.
//!
//! The decoder consumes the compiled HCLG graph through the read-only [`Fst`]
//! trait: start state, per-state arc slices and final-cost lookup. Graph
//! construction and compilation are out of scope; [`VectorFst`] is a plain
//! in-memory implementation for callers that already hold the arcs (and for
//! tests).

use crate::types::{Label, StateId, EPSILON};

/// A directed edge in the search graph. `ilabel == 0` marks a non-emitting
/// (epsilon) arc that consumes no acoustic frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arc {
    pub ilabel: Label,
    pub olabel: Label,
    pub weight: f32,
    pub next_state: StateId,
}

impl Arc {
    pub fn new(ilabel: Label, olabel: Label, weight: f32, next_state: StateId) -> Self {
        Self {
            ilabel,
            olabel,
            weight,
            next_state,
        }
    }

    pub fn is_emitting(&self) -> bool {
        self.ilabel != EPSILON
    }
}

/// Read-only queryable search graph. Immutable for the lifetime of any
/// decoder borrowing it.
pub trait Fst {
    /// The start state of the graph.
    fn start(&self) -> StateId;

    /// Outgoing arcs of `state`.
    fn arcs(&self, state: StateId) -> &[Arc];

    /// Final cost of `state`, `f32::INFINITY` when the state is not final.
    fn final_cost(&self, state: StateId) -> f32;

    fn is_final(&self, state: StateId) -> bool {
        self.final_cost(state).is_finite()
    }
}

/// Vector-backed graph: arcs grouped per state, optional final costs.
#[derive(Debug, Clone, Default)]
pub struct VectorFst {
    start: StateId,
    arcs: Vec<Vec<Arc>>,
    final_costs: Vec<f32>,
}

impl VectorFst {
    pub fn new(num_states: usize) -> Self {
        Self {
            start: 0,
            arcs: vec![Vec::new(); num_states],
            final_costs: vec![f32::INFINITY; num_states],
        }
    }

    pub fn set_start(&mut self, state: StateId) {
        debug_assert!((state as usize) < self.arcs.len());
        self.start = state;
    }

    pub fn set_final(&mut self, state: StateId, cost: f32) {
        self.final_costs[state as usize] = cost;
    }

    pub fn add_arc(&mut self, from: StateId, arc: Arc) {
        debug_assert!((arc.next_state as usize) < self.arcs.len());
        self.arcs[from as usize].push(arc);
    }

    pub fn num_states(&self) -> usize {
        self.arcs.len()
    }
}

impl Fst for VectorFst {
    fn start(&self) -> StateId {
        self.start
    }

    fn arcs(&self, state: StateId) -> &[Arc] {
        &self.arcs[state as usize]
    }

    fn final_cost(&self, state: StateId) -> f32 {
        self.final_costs
            .get(state as usize)
            .copied()
            .unwrap_or(f32::INFINITY)
    }
}

/// Mapping from decoder-visible unit indices (transition ids) to acoustic
/// model output columns (pdf ids). Units are one-based; index 0 is epsilon
/// and never scored.
#[derive(Debug, Clone)]
pub struct TransitionMap {
    pdf_of: Vec<u32>,
}

impl TransitionMap {
    /// `pdf_of[unit]` gives the output column for `unit`. Entry 0 is unused.
    pub fn new(pdf_of: Vec<u32>) -> Self {
        Self { pdf_of }
    }

    /// Identity mapping for models whose output columns are indexed directly
    /// by `unit - 1`.
    pub fn identity(num_units: usize) -> Self {
        let mut pdf_of = Vec::with_capacity(num_units + 1);
        pdf_of.push(0);
        pdf_of.extend((0..num_units as u32).collect::<Vec<_>>());
        Self { pdf_of }
    }

    pub fn pdf(&self, unit: Label) -> usize {
        debug_assert!(unit > 0, "epsilon units are never scored");
        self.pdf_of[unit as usize] as usize
    }

    pub fn num_units(&self) -> usize {
        self.pdf_of.len().saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_fst_basic_queries() {
        let mut fst = VectorFst::new(3);
        fst.add_arc(0, Arc::new(1, 5, 0.5, 1));
        fst.add_arc(1, Arc::new(0, 0, 0.1, 2));
        fst.set_final(2, 0.0);

        assert_eq!(fst.start(), 0);
        assert_eq!(fst.arcs(0).len(), 1);
        assert!(fst.arcs(0)[0].is_emitting());
        assert!(!fst.arcs(1)[0].is_emitting());
        assert!(!fst.is_final(0));
        assert!(fst.is_final(2));
        assert_eq!(fst.final_cost(2), 0.0);
    }

    #[test]
    fn identity_transition_map() {
        let map = TransitionMap::identity(4);
        assert_eq!(map.num_units(), 4);
        assert_eq!(map.pdf(1), 0);
        assert_eq!(map.pdf(4), 3);
    }
}
