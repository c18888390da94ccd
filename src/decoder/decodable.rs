//! Batched acoustic scoring for the decoder.
//!
//! The beam search asks for one `(frame, unit)` score at a time but neural
//! acoustic models are only fast when called on a batch of frames.
//! [`CachingDecodable`] sits between the two: it keeps a dense window of
//! scaled, prior-normalized log-likelihoods and refills the whole window with
//! a single batched forward pass whenever a requested frame falls outside it.
//!
//! The model and the feature pipeline are external collaborators consumed
//! through the [`AcousticModel`] and [`FeatureSource`] traits.

use tracing::debug;

use crate::config::DecodableConfig;
use crate::decoder::graph::TransitionMap;
use crate::error::{DecodeError, Result};
use crate::types::Label;

/// Batched forward scorer with fixed input/output dimensionality. The
/// decoder requires raw (pre-softmax) outputs; normalized models are
/// rejected at construction.
pub trait AcousticModel {
    fn in_dim(&self) -> usize;
    fn out_dim(&self) -> usize;

    /// True when the final layer already produces normalized probabilities.
    fn outputs_normalized(&self) -> bool;

    /// Run the model over `num_frames` rows of `in_dim()` features packed
    /// row-major in `input`, writing `num_frames * out_dim()` raw scores
    /// into `output` (which is cleared first).
    fn forward(&mut self, input: &[f32], num_frames: usize, output: &mut Vec<f32>);
}

/// Pull-based producer of feature frames.
pub trait FeatureSource {
    fn feature_dim(&self) -> usize;

    /// Number of frames currently available. Never decreases within one
    /// utterance.
    fn num_frames_ready(&self) -> usize;

    /// Copy frame `frame` into `out` (`feature_dim()` values). `frame` must
    /// be below `num_frames_ready()`.
    fn read_frame(&self, frame: usize, out: &mut [f32]);

    fn accept_waveform(&mut self, samples: &[f32]);

    /// Signal end of stream so trailing frames can be flushed.
    fn set_done(&mut self);

    /// Discard all state, ready for a fresh utterance.
    fn reset(&mut self);
}

/// The score source consumed by the beam search.
pub trait Decodable {
    /// Scaled, prior-normalized log-likelihood of `unit` at `frame`.
    /// `frame` must be below `num_frames_ready()`; the decoder negates the
    /// value into a cost.
    fn log_likelihood(&mut self, frame: usize, unit: Label) -> f32;

    fn num_frames_ready(&self) -> usize;
}

/// Streaming likelihood cache over an acoustic model and feature source.
pub struct CachingDecodable<'a, M: AcousticModel, F: FeatureSource> {
    tree: &'a TransitionMap,
    log_prior: &'a [f32],
    config: DecodableConfig,
    model: &'a mut M,
    features: &'a mut F,

    /// First frame covered by the current window; the window is empty when
    /// `window_rows == 0`.
    begin_frame: usize,
    window_rows: usize,
    window: Vec<f32>,

    input_scratch: Vec<f32>,
    output_scratch: Vec<f32>,
}

impl<'a, M: AcousticModel, F: FeatureSource> CachingDecodable<'a, M, F> {
    pub fn new(
        tree: &'a TransitionMap,
        log_prior: &'a [f32],
        config: DecodableConfig,
        model: &'a mut M,
        features: &'a mut F,
    ) -> Result<Self> {
        config.validate()?;
        if model.outputs_normalized() {
            return Err(DecodeError::Model(
                "acoustic model output is normalized; raw scores are required".to_string(),
            ));
        }
        if model.in_dim() != features.feature_dim() {
            return Err(DecodeError::Model(format!(
                "feature dim {} does not match model input dim {}",
                features.feature_dim(),
                model.in_dim()
            )));
        }
        if log_prior.len() != model.out_dim() {
            return Err(DecodeError::Model(format!(
                "prior length {} does not match model output dim {}",
                log_prior.len(),
                model.out_dim()
            )));
        }
        Ok(Self {
            tree,
            log_prior,
            config,
            model,
            features,
            begin_frame: 0,
            window_rows: 0,
            window: Vec::new(),
            input_scratch: Vec::new(),
            output_scratch: Vec::new(),
        })
    }

    /// Feed raw audio through to the feature source.
    pub fn accept_audio(&mut self, samples: &[f32]) {
        self.features.accept_waveform(samples);
    }

    /// Signal end of stream to the feature source.
    pub fn set_done(&mut self) {
        self.features.set_done();
    }

    /// Reset for the next utterance segment, invalidating the cached window.
    pub fn reset(&mut self) {
        self.features.reset();
        self.begin_frame = 0;
        self.window_rows = 0;
    }

    fn compute_for_frame(&mut self, frame: usize) {
        let ready = self.features.num_frames_ready();
        assert!(
            frame < ready,
            "requested frame {} but only {} frames are ready",
            frame,
            ready
        );

        if frame >= self.begin_frame && frame < self.begin_frame + self.window_rows {
            return; // cache hit
        }

        let stride = self.config.skip + 1;
        let input_begin = frame;
        let input_end = ready.min(input_begin + self.config.max_batch_size * stride);
        let num_rows = input_end - input_begin;
        let num_forward = (num_rows - 1) / stride + 1;
        let feat_dim = self.features.feature_dim();
        let out_dim = self.model.out_dim();

        debug!(
            input_begin,
            input_end, num_forward, "recomputing likelihood window"
        );

        self.input_scratch.clear();
        self.input_scratch.resize(num_forward * feat_dim, 0.0);
        for i in 0..num_forward {
            self.features.read_frame(
                input_begin + i * stride,
                &mut self.input_scratch[i * feat_dim..(i + 1) * feat_dim],
            );
        }

        self.model
            .forward(&self.input_scratch, num_forward, &mut self.output_scratch);
        debug_assert_eq!(self.output_scratch.len(), num_forward * out_dim);

        // Broadcast each computed row across its stride span, subtract the
        // per-unit log prior and apply the acoustic scale. The model output
        // has softmax removed, so the prior subtraction happens in log space.
        self.window.clear();
        self.window.resize(num_rows * out_dim, 0.0);
        for i in 0..num_forward {
            let src = &self.output_scratch[i * out_dim..(i + 1) * out_dim];
            for j in 0..stride {
                let row = i * stride + j;
                if row >= num_rows {
                    break;
                }
                let dst = &mut self.window[row * out_dim..(row + 1) * out_dim];
                for (k, out) in dst.iter_mut().enumerate() {
                    *out = (src[k] - self.log_prior[k]) * self.config.acoustic_scale;
                }
            }
        }

        self.begin_frame = frame;
        self.window_rows = num_rows;
    }
}

impl<M: AcousticModel, F: FeatureSource> Decodable for CachingDecodable<'_, M, F> {
    fn log_likelihood(&mut self, frame: usize, unit: Label) -> f32 {
        self.compute_for_frame(frame);
        let col = self.tree.pdf(unit);
        let out_dim = self.model.out_dim();
        self.window[(frame - self.begin_frame) * out_dim + col]
    }

    fn num_frames_ready(&self) -> usize {
        self.features.num_frames_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Frame `f` is the single feature value `f`.
    struct RampFeatures {
        ready: usize,
        done: bool,
    }

    impl FeatureSource for RampFeatures {
        fn feature_dim(&self) -> usize {
            1
        }
        fn num_frames_ready(&self) -> usize {
            self.ready
        }
        fn read_frame(&self, frame: usize, out: &mut [f32]) {
            assert!(frame < self.ready);
            out[0] = frame as f32;
        }
        fn accept_waveform(&mut self, samples: &[f32]) {
            self.ready += samples.len();
        }
        fn set_done(&mut self) {
            self.done = true;
        }
        fn reset(&mut self) {
            self.ready = 0;
            self.done = false;
        }
    }

    /// Output row for input `x` is `[x, 2x, 3x]`; counts forward calls.
    struct LinearModel {
        calls: Rc<Cell<usize>>,
        normalized: bool,
    }

    impl AcousticModel for LinearModel {
        fn in_dim(&self) -> usize {
            1
        }
        fn out_dim(&self) -> usize {
            3
        }
        fn outputs_normalized(&self) -> bool {
            self.normalized
        }
        fn forward(&mut self, input: &[f32], num_frames: usize, output: &mut Vec<f32>) {
            self.calls.set(self.calls.get() + 1);
            output.clear();
            for i in 0..num_frames {
                let x = input[i];
                output.extend_from_slice(&[x, 2.0 * x, 3.0 * x]);
            }
        }
    }

    fn score_all(
        skip: usize,
        max_batch_size: usize,
        num_frames: usize,
        calls: Rc<Cell<usize>>,
    ) -> Vec<f32> {
        let tree = TransitionMap::identity(3);
        let prior = vec![0.5, 1.0, 1.5];
        let config = DecodableConfig {
            acoustic_scale: 0.1,
            skip,
            max_batch_size,
        };
        let mut model = LinearModel {
            calls,
            normalized: false,
        };
        let mut features = RampFeatures {
            ready: num_frames,
            done: false,
        };
        let mut decodable =
            CachingDecodable::new(&tree, &prior, config, &mut model, &mut features)
                .expect("valid decodable");

        let mut scores = Vec::new();
        for frame in 0..num_frames {
            for unit in 1..=3 {
                scores.push(decodable.log_likelihood(frame, unit));
            }
        }
        scores
    }

    #[test]
    fn scores_apply_prior_and_scale() {
        let scores = score_all(0, 4, 2, Rc::new(Cell::new(0)));
        // frame 1, unit 2 -> raw 2.0, prior 1.0, scale 0.1
        assert!((scores[4] - 0.1).abs() < 1e-6);
        // frame 0, unit 1 -> raw 0.0, prior 0.5, scale 0.1
        assert!((scores[0] + 0.05).abs() < 1e-6);
    }

    #[test]
    fn batch_size_does_not_change_scores() {
        let reference = score_all(0, 1, 11, Rc::new(Cell::new(0)));
        for batch in [2, 3, 8, 64] {
            assert_eq!(score_all(0, batch, 11, Rc::new(Cell::new(0))), reference);
        }
    }

    #[test]
    fn batch_size_does_not_change_scores_with_skip() {
        let reference = score_all(2, 1, 11, Rc::new(Cell::new(0)));
        for batch in [2, 3, 8, 64] {
            assert_eq!(score_all(2, batch, 11, Rc::new(Cell::new(0))), reference);
        }
    }

    #[test]
    fn batching_reduces_forward_calls() {
        let calls = Rc::new(Cell::new(0));
        score_all(0, 4, 10, calls.clone());
        // 10 frames in windows of 4: 3 forward passes
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn skip_broadcasts_rows_across_stride() {
        let calls = Rc::new(Cell::new(0));
        let scores = score_all(1, 16, 5, calls.clone());
        assert_eq!(calls.get(), 1);
        // frames 0/1 share the row computed at frame 0, 2/3 the row at 2
        assert_eq!(scores[0..3], scores[3..6]);
        assert_eq!(scores[6..9], scores[9..12]);
        assert_ne!(scores[0..3], scores[6..9]);
    }

    #[test]
    fn rejects_normalized_model() {
        let tree = TransitionMap::identity(3);
        let prior = vec![0.0; 3];
        let mut model = LinearModel {
            calls: Rc::new(Cell::new(0)),
            normalized: true,
        };
        let mut features = RampFeatures {
            ready: 0,
            done: false,
        };
        let result = CachingDecodable::new(
            &tree,
            &prior,
            DecodableConfig::default(),
            &mut model,
            &mut features,
        );
        assert!(matches!(result, Err(DecodeError::Model(_))));
    }

    #[test]
    fn rejects_prior_dimension_mismatch() {
        let tree = TransitionMap::identity(3);
        let prior = vec![0.0; 2];
        let mut model = LinearModel {
            calls: Rc::new(Cell::new(0)),
            normalized: false,
        };
        let mut features = RampFeatures {
            ready: 0,
            done: false,
        };
        let result = CachingDecodable::new(
            &tree,
            &prior,
            DecodableConfig::default(),
            &mut model,
            &mut features,
        );
        assert!(matches!(result, Err(DecodeError::Model(_))));
    }

    #[test]
    #[should_panic]
    fn frame_beyond_ready_is_a_contract_violation() {
        let tree = TransitionMap::identity(3);
        let prior = vec![0.0; 3];
        let mut model = LinearModel {
            calls: Rc::new(Cell::new(0)),
            normalized: false,
        };
        let mut features = RampFeatures {
            ready: 2,
            done: false,
        };
        let mut decodable = CachingDecodable::new(
            &tree,
            &prior,
            DecodableConfig::default(),
            &mut model,
            &mut features,
        )
        .expect("valid decodable");
        decodable.log_likelihood(2, 1);
    }
}
