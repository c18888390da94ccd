//! Frame-synchronous Viterbi beam search over a WFST.
//!
//! Each decoding step expands emitting arcs (consuming one acoustic frame)
//! and then relaxes epsilon arcs to a fixed point, recombining hypotheses so
//! at most one token survives per graph state. Pruning is dual: a beam width
//! around the best cost, tightened when the active set exceeds `max_active`
//! and loosened so at least `min_active` tokens survive.
//!
//! Tokens form an immutable backward-linked history; `Rc` back-links keep a
//! predecessor alive exactly as long as some surviving descendant references
//! it, so pruning a token releases its whole dead ancestry at once.

use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::BeamSearchConfig;
use crate::decoder::decodable::Decodable;
use crate::decoder::graph::{Arc, Fst};
use crate::decoder::hash_list::HashList;
use crate::error::Result;
use crate::types::{Label, StateId, EPSILON};

/// Epsilon relaxations processed per closure before the worklist is abandoned.
/// Well-formed graphs terminate far below this; a zero- or negative-weight
/// epsilon cycle would otherwise spin forever.
const MAX_EPSILON_RELAXATIONS: usize = 1_000_000;

/// One hypothesis path ending at `arc.next_state`.
struct Token {
    /// Cumulative cost along the path; lower is better.
    cost: f64,
    /// The arc that produced this token.
    arc: Arc,
    prev: Option<Rc<Token>>,
}

impl Token {
    fn emitting(arc: &Arc, acoustic_cost: f64, prev: &Rc<Token>) -> Rc<Self> {
        Rc::new(Self {
            cost: prev.cost + arc.weight as f64 + acoustic_cost,
            arc: *arc,
            prev: Some(Rc::clone(prev)),
        })
    }

    fn non_emitting(arc: &Arc, prev: &Rc<Token>) -> Rc<Self> {
        Rc::new(Self {
            cost: prev.cost + arc.weight as f64,
            arc: *arc,
            prev: Some(Rc::clone(prev)),
        })
    }

    fn seed(start_state: StateId) -> Rc<Self> {
        Rc::new(Self {
            cost: 0.0,
            arc: Arc::new(EPSILON, EPSILON, 0.0, start_state),
            prev: None,
        })
    }
}

/// Streaming WFST beam-search decoder.
pub struct BeamSearchDecoder<'f> {
    fst: &'f dyn Fst,
    config: BeamSearchConfig,
    toks: HashList<Rc<Token>>,
    /// Epsilon-closure worklist.
    queue: Vec<StateId>,
    /// Scratch for order-statistic cutoffs.
    cost_scratch: Vec<f64>,
    /// Previous generation, drained from `toks` each emitting step.
    prev_toks: Vec<(StateId, Rc<Token>)>,
    /// `None` until `init_decoding` has run.
    num_frames_decoded: Option<usize>,
}

impl<'f> BeamSearchDecoder<'f> {
    pub fn new(fst: &'f dyn Fst, config: BeamSearchConfig) -> Result<Self> {
        config.validate()?;
        let mut toks = HashList::new();
        // reasonable size until the first frame tells us the active count
        toks.set_size(1000);
        Ok(Self {
            fst,
            config,
            toks,
            queue: Vec::new(),
            cost_scratch: Vec::new(),
            prev_toks: Vec::new(),
            num_frames_decoded: None,
        })
    }

    /// Seed the start state and apply the initial epsilon closure. Must be
    /// called before [`advance_decoding`](Self::advance_decoding); may be
    /// called again to start a fresh utterance.
    pub fn init_decoding(&mut self) {
        self.prev_toks.clear();
        self.toks.clear_into(&mut self.prev_toks);
        self.prev_toks.clear();

        let start = self.fst.start();
        self.toks.insert(start, Token::seed(start));
        self.process_non_emitting(f64::INFINITY);
        self.num_frames_decoded = Some(0);
    }

    /// Decode until the scorer runs out of ready frames, or until
    /// `max_frames` additional frames have been consumed.
    ///
    /// # Panics
    /// Panics if called before [`init_decoding`](Self::init_decoding).
    pub fn advance_decoding(&mut self, decodable: &mut dyn Decodable, max_frames: Option<usize>) {
        let decoded = self
            .num_frames_decoded
            .expect("init_decoding must be called before advance_decoding");
        let ready = decodable.num_frames_ready();
        assert!(
            ready >= decoded,
            "frames ready decreased between advance_decoding calls"
        );
        let mut target = ready;
        if let Some(max) = max_frames {
            target = target.min(decoded + max);
        }
        while self.num_frames_decoded.unwrap_or(0) < target {
            let cutoff = self.process_emitting(decodable);
            self.process_non_emitting(cutoff);
        }
    }

    /// Number of frames consumed so far, `None` before initialization.
    pub fn num_frames_decoded(&self) -> Option<usize> {
        self.num_frames_decoded
    }

    /// States holding an active token, for inspection and logging.
    pub fn active_states(&self) -> Vec<StateId> {
        self.toks.iter().map(|(state, _)| state).collect()
    }

    /// True iff some active token sits at a final state with finite cost.
    pub fn reached_final(&self) -> bool {
        self.toks
            .iter()
            .any(|(state, tok)| tok.cost.is_finite() && self.fst.is_final(state))
    }

    /// Best output-label sequence so far. Restricted to final states when one
    /// is reachable; `None` only when no token is active at all.
    pub fn get_best_path(&self) -> Option<Vec<Label>> {
        let mut best: Option<&Rc<Token>> = None;
        if self.reached_final() {
            let mut best_cost = f64::INFINITY;
            for (state, tok) in self.toks.iter() {
                let cost = tok.cost + self.fst.final_cost(state) as f64;
                if cost < best_cost {
                    best_cost = cost;
                    best = Some(tok);
                }
            }
        } else {
            for (_, tok) in self.toks.iter() {
                if best.map_or(true, |b| tok.cost < b.cost) {
                    best = Some(tok);
                }
            }
        }
        let best = best?;

        let mut labels = Vec::new();
        let mut cur = Some(best);
        while let Some(tok) = cur {
            // the synthetic seed has no predecessor and carries no label
            if tok.prev.is_some() && tok.arc.olabel != EPSILON {
                labels.push(tok.arc.olabel);
            }
            cur = tok.prev.as_ref();
        }
        labels.reverse();
        // repeated identical labels from consecutive arcs are one word
        labels.dedup();
        Some(labels)
    }

    /// Compute the pruning cutoff over the drained previous generation.
    /// Returns `(cutoff, adaptive_beam, index of best token)`.
    fn get_cutoff(&mut self, prev: &[(StateId, Rc<Token>)]) -> (f64, f32, Option<usize>) {
        let beam = self.config.beam as f64;
        let mut best_cost = f64::INFINITY;
        let mut best_idx = None;

        if self.config.max_active == usize::MAX && self.config.min_active == 0 {
            for (i, (_, tok)) in prev.iter().enumerate() {
                if tok.cost < best_cost {
                    best_cost = tok.cost;
                    best_idx = Some(i);
                }
            }
            return (best_cost + beam, self.config.beam, best_idx);
        }

        self.cost_scratch.clear();
        for (i, (_, tok)) in prev.iter().enumerate() {
            self.cost_scratch.push(tok.cost);
            if tok.cost < best_cost {
                best_cost = tok.cost;
                best_idx = Some(i);
            }
        }

        let beam_cutoff = best_cost + beam;
        let mut max_active_cutoff = f64::INFINITY;
        if self.cost_scratch.len() > self.config.max_active {
            let n = self.config.max_active;
            self.cost_scratch
                .select_nth_unstable_by(n, |a, b| a.total_cmp(b));
            max_active_cutoff = self.cost_scratch[n];
        }
        if max_active_cutoff < beam_cutoff {
            // max_active is tighter than the beam
            let adaptive = (max_active_cutoff - best_cost) as f32 + self.config.beam_delta;
            return (max_active_cutoff, adaptive, best_idx);
        }

        let mut min_active_cutoff = f64::INFINITY;
        if self.cost_scratch.len() > self.config.min_active {
            min_active_cutoff = if self.config.min_active == 0 {
                best_cost
            } else {
                let n = self.config.min_active;
                self.cost_scratch
                    .select_nth_unstable_by(n, |a, b| a.total_cmp(b));
                self.cost_scratch[n]
            };
        }
        if min_active_cutoff > beam_cutoff {
            // min_active is looser than the beam
            let adaptive = (min_active_cutoff - best_cost) as f32 + self.config.beam_delta;
            (min_active_cutoff, adaptive, best_idx)
        } else {
            (beam_cutoff, self.config.beam, best_idx)
        }
    }

    fn possibly_resize_hash(&mut self, num_toks: usize) {
        let target = (num_toks as f32 * self.config.hash_ratio) as usize;
        if target > self.toks.size() {
            self.toks.set_size(target);
        }
    }

    /// Expand emitting arcs for one frame. Returns the cutoff bound for the
    /// tokens created this step.
    fn process_emitting(&mut self, decodable: &mut dyn Decodable) -> f64 {
        let frame = self
            .num_frames_decoded
            .expect("process_emitting before init");

        let mut prev = std::mem::take(&mut self.prev_toks);
        prev.clear();
        self.toks.clear_into(&mut prev);

        let (weight_cutoff, adaptive_beam, best_idx) = self.get_cutoff(&prev);
        let adaptive_beam = adaptive_beam as f64;
        debug!(frame, active = prev.len(), "emitting expansion");
        self.possibly_resize_hash(prev.len());

        // Bound on the cutoff for the next frame, seeded from the single
        // best token's expansions and tightened as tokens are created.
        let mut next_weight_cutoff = f64::INFINITY;
        if let Some(idx) = best_idx {
            let (state, tok) = &prev[idx];
            for arc in self.fst.arcs(*state) {
                if arc.is_emitting() {
                    let acoustic = -decodable.log_likelihood(frame, arc.ilabel) as f64;
                    let new_weight = arc.weight as f64 + tok.cost + acoustic;
                    if new_weight + adaptive_beam < next_weight_cutoff {
                        next_weight_cutoff = new_weight + adaptive_beam;
                    }
                }
            }
        }

        for (state, tok) in prev.drain(..) {
            if tok.cost < weight_cutoff {
                debug_assert_eq!(state, tok.arc.next_state);
                for arc in self.fst.arcs(state) {
                    if !arc.is_emitting() {
                        continue;
                    }
                    let acoustic = -decodable.log_likelihood(frame, arc.ilabel) as f64;
                    let new_weight = arc.weight as f64 + tok.cost + acoustic;
                    if new_weight >= next_weight_cutoff {
                        continue; // pruned
                    }
                    if new_weight + adaptive_beam < next_weight_cutoff {
                        next_weight_cutoff = new_weight + adaptive_beam;
                    }
                    let new_tok = Token::emitting(arc, acoustic, &tok);
                    match self.toks.find_mut(arc.next_state) {
                        None => self.toks.insert(arc.next_state, new_tok),
                        Some(existing) => {
                            // recombination: keep the cheaper hypothesis
                            if existing.cost > new_tok.cost {
                                *existing = new_tok;
                            }
                        }
                    }
                }
            }
            // previous-generation tokens survive only through back-links
            drop(tok);
        }
        self.prev_toks = prev;

        self.num_frames_decoded = Some(frame + 1);
        next_weight_cutoff
    }

    /// Relax epsilon arcs to a fixed point below `cutoff`.
    fn process_non_emitting(&mut self, cutoff: f64) {
        debug_assert!(self.queue.is_empty());
        let mut queue = std::mem::take(&mut self.queue);
        queue.extend(self.toks.iter().map(|(state, _)| state));

        let mut relaxations = 0usize;
        while let Some(state) = queue.pop() {
            relaxations += 1;
            if relaxations > MAX_EPSILON_RELAXATIONS {
                warn!(
                    limit = MAX_EPSILON_RELAXATIONS,
                    "epsilon closure did not converge; graph likely has a \
                     non-positive-weight epsilon cycle"
                );
                queue.clear();
                break;
            }

            let tok = Rc::clone(self.toks.find(state).expect("queued state has a token"));
            if tok.cost > cutoff {
                continue;
            }
            debug_assert_eq!(state, tok.arc.next_state);
            for arc in self.fst.arcs(state) {
                if arc.is_emitting() {
                    continue;
                }
                let new_tok = Token::non_emitting(arc, &tok);
                if new_tok.cost > cutoff {
                    continue; // pruned
                }
                match self.toks.find_mut(arc.next_state) {
                    None => {
                        self.toks.insert(arc.next_state, new_tok);
                        queue.push(arc.next_state);
                    }
                    Some(existing) => {
                        if existing.cost > new_tok.cost {
                            *existing = new_tok;
                            queue.push(arc.next_state);
                        }
                    }
                }
            }
        }
        self.queue = queue;
    }
}
