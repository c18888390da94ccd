//! Voice-activity endpoint detection.
//!
//! A two-state hysteresis machine over per-frame speech/silence
//! classifications: Silence flips to Speech after enough consecutive speech
//! frames, Speech falls back to Silence after enough consecutive silence
//! frames, and an endpoint fires once a long enough pause accumulates while
//! silent. The per-frame classification itself comes from an external
//! [`SpeechClassifier`] (a small scorer with its own feature pipeline).
//!
//! The decode task consumes this through [`Vad::process`], which also
//! forwards the samples of every frame classified as speech, each frame at
//! most once, so chunk boundaries never change what reaches the decoder.

use tracing::debug;

use crate::config::VadConfig;

/// Per-frame silence scorer consumed by the detector. Implementations own
/// their feature pipeline and model; audio goes in, silence posteriors per
/// frame come out.
pub trait SpeechClassifier {
    /// Buffer more audio.
    fn accept_waveform(&mut self, samples: &[f32]);

    /// Signal end of stream so trailing frames can be flushed.
    fn set_done(&mut self);

    /// Append the silence posterior (higher means more silent) of every
    /// frame from `from_frame` onward to `out`, returning how many frames
    /// were produced.
    fn read_silence_probs(&mut self, from_frame: usize, out: &mut Vec<f32>) -> usize;

    /// Discard all state, ready for a fresh stream.
    fn reset(&mut self);
}

impl<C: SpeechClassifier + ?Sized> SpeechClassifier for &mut C {
    fn accept_waveform(&mut self, samples: &[f32]) {
        (**self).accept_waveform(samples)
    }
    fn set_done(&mut self) {
        (**self).set_done()
    }
    fn read_silence_probs(&mut self, from_frame: usize, out: &mut Vec<f32>) -> usize {
        (**self).read_silence_probs(from_frame, out)
    }
    fn reset(&mut self) {
        (**self).reset()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VadState {
    Speech,
    Silence,
}

/// Outcome of feeding one audio chunk through the detector.
#[derive(Debug, Clone, Default)]
pub struct VadOutcome {
    /// The sub-span of the buffered audio classified as speech.
    pub speech: Vec<f32>,
    /// True when a long enough pause was detected to finalize the segment.
    pub endpoint: bool,
}

/// Two-state endpoint detector with hysteresis smoothing.
pub struct Vad<C: SpeechClassifier> {
    config: VadConfig,
    classifier: C,

    state: VadState,
    silence_frame_count: usize,
    speech_frame_count: usize,
    endpoint_detected: bool,

    /// Smoothed per-frame speech decisions since the last reset.
    results: Vec<bool>,
    /// Which frames have already had their samples forwarded. Lookback can
    /// relabel a frame after its batch was processed, so emission cannot be
    /// inferred from batch boundaries alone.
    emitted: Vec<bool>,
    /// All audio accepted since the last reset.
    audio_buffer: Vec<f32>,
    /// Next classifier frame to consume.
    next_frame: usize,
    prob_scratch: Vec<f32>,
}

impl<C: SpeechClassifier> Vad<C> {
    pub fn new(config: VadConfig, classifier: C) -> Self {
        Self {
            config,
            classifier,
            state: VadState::Silence,
            silence_frame_count: 0,
            speech_frame_count: 0,
            endpoint_detected: false,
            results: Vec::new(),
            emitted: Vec::new(),
            audio_buffer: Vec::new(),
            next_frame: 0,
            prob_scratch: Vec::new(),
        }
    }

    /// Restore the initial state, including the classifier.
    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.silence_frame_count = 0;
        self.speech_frame_count = 0;
        self.endpoint_detected = false;
        self.results.clear();
        self.emitted.clear();
        self.audio_buffer.clear();
        self.next_frame = 0;
        self.classifier.reset();
    }

    /// Feed one audio chunk; returns the speech sub-span of the audio
    /// buffered so far and whether an endpoint was reached.
    pub fn process(&mut self, audio: &[f32], end_of_stream: bool) -> VadOutcome {
        // bounded buffering: a stream that never pauses must not grow the
        // buffer without limit
        if self.audio_buffer.len() + audio.len() >= self.config.max_buffered_samples {
            debug!("audio buffer cap reached, resetting endpoint detector");
            self.reset();
        }

        if !audio.is_empty() {
            self.classifier.accept_waveform(audio);
        }
        if end_of_stream {
            self.classifier.set_done();
        }

        self.prob_scratch.clear();
        let num_frames = self
            .classifier
            .read_silence_probs(self.next_frame, &mut self.prob_scratch);

        self.endpoint_detected = false;
        for i in 0..num_frames {
            let is_speech = self.prob_scratch[i] <= self.config.silence_thresh;
            let smoothed = self.smooth(is_speech);
            self.results.push(smoothed);
            self.emitted.push(false);
        }
        if num_frames > 0 {
            self.apply_lookback();
        }

        self.audio_buffer.extend_from_slice(audio);

        let speech = self.emit_speech(self.next_frame, num_frames, end_of_stream);
        self.next_frame += num_frames;

        VadOutcome {
            speech,
            endpoint: self.endpoint_detected,
        }
    }

    /// Advance the hysteresis machine by one frame; returns the smoothed
    /// speech decision for that frame.
    fn smooth(&mut self, is_speech: bool) -> bool {
        match self.state {
            VadState::Silence => {
                if is_speech {
                    self.speech_frame_count += 1;
                    if self.speech_frame_count >= self.config.silence_to_speech_frames {
                        self.state = VadState::Speech;
                        self.silence_frame_count = 0;
                    }
                } else {
                    self.speech_frame_count = 0;
                    self.silence_frame_count += 1;
                    if self.silence_frame_count >= self.config.endpoint_trigger_frames {
                        self.endpoint_detected = true;
                    }
                }
            }
            VadState::Speech => {
                if is_speech {
                    self.silence_frame_count = 0;
                    self.speech_frame_count += 1;
                } else {
                    self.silence_frame_count += 1;
                    if self.silence_frame_count >= self.config.speech_to_silence_frames {
                        self.state = VadState::Silence;
                        self.speech_frame_count = 0;
                    }
                }
            }
        }
        self.state == VadState::Speech
    }

    /// Re-label up to `lookback_frames` frames before each silence-to-speech
    /// onset as speech, so word onsets clipped by the smoothing delay are
    /// recovered.
    fn apply_lookback(&mut self) {
        let lookback = self.config.lookback_frames;
        if lookback == 0 {
            return;
        }
        let mut cur = 0;
        while cur < self.results.len() {
            while cur < self.results.len() && !self.results[cur] {
                cur += 1;
            }
            if cur == self.results.len() {
                break;
            }
            let start = cur.saturating_sub(lookback);
            for frame in &mut self.results[start..cur] {
                *frame = true;
            }
            while cur < self.results.len() && self.results[cur] {
                cur += 1;
            }
        }
    }

    /// Collect the samples of every frame labelled speech that has not been
    /// forwarded yet, so chunk boundaries do not change which audio reaches
    /// the decoder. The scan starts `lookback_frames` before the new batch:
    /// an onset at the batch start may have relabelled frames whose chunk was
    /// already processed, and their samples are still in the buffer. At end
    /// of stream the tail beyond the last full frame is flushed too while
    /// still in speech.
    fn emit_speech(
        &mut self,
        first_frame: usize,
        num_frames: usize,
        end_of_stream: bool,
    ) -> Vec<f32> {
        let shift = self.config.frame_shift;
        let buffered = self.audio_buffer.len();
        let scan_begin = first_frame.saturating_sub(self.config.lookback_frames);
        let mut speech = Vec::new();
        for frame in scan_begin..first_frame + num_frames {
            if self.results[frame] && !self.emitted[frame] {
                self.emitted[frame] = true;
                let begin = (frame * shift).min(buffered);
                let end = ((frame + 1) * shift).min(buffered);
                speech.extend_from_slice(&self.audio_buffer[begin..end]);
            }
        }
        if end_of_stream && self.results.last().copied().unwrap_or(false) {
            let tail_begin = ((first_frame + num_frames) * shift).min(buffered);
            speech.extend_from_slice(&self.audio_buffer[tail_begin..]);
        }
        speech
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One frame per `frame_shift` samples; a sample value above 0.5 is
    /// speech (silence posterior 0), otherwise silence (posterior 1).
    struct ThresholdClassifier {
        shift: usize,
        samples: Vec<f32>,
        done: bool,
    }

    impl ThresholdClassifier {
        fn new(shift: usize) -> Self {
            Self {
                shift,
                samples: Vec::new(),
                done: false,
            }
        }
    }

    impl SpeechClassifier for ThresholdClassifier {
        fn accept_waveform(&mut self, samples: &[f32]) {
            self.samples.extend_from_slice(samples);
        }
        fn set_done(&mut self) {
            self.done = true;
        }
        fn read_silence_probs(&mut self, from_frame: usize, out: &mut Vec<f32>) -> usize {
            let ready = self.samples.len() / self.shift;
            let mut produced = 0;
            for frame in from_frame..ready {
                let v = self.samples[frame * self.shift];
                out.push(if v > 0.5 { 0.0 } else { 1.0 });
                produced += 1;
            }
            produced
        }
        fn reset(&mut self) {
            self.samples.clear();
            self.done = false;
        }
    }

    fn test_config() -> VadConfig {
        VadConfig {
            silence_thresh: 0.5,
            silence_to_speech_frames: 2,
            speech_to_silence_frames: 3,
            endpoint_trigger_frames: 5,
            lookback_frames: 0,
            frame_shift: 4,
            max_buffered_samples: 1 << 20,
        }
    }

    fn frames(pattern: &[bool], shift: usize) -> Vec<f32> {
        let mut audio = Vec::new();
        for &speech in pattern {
            audio.extend(std::iter::repeat(if speech { 1.0 } else { 0.0 }).take(shift));
        }
        audio
    }

    #[test]
    fn speech_run_is_extracted() {
        let mut vad = Vad::new(test_config(), ThresholdClassifier::new(4));
        // 3 silence, 6 speech, 2 silence frames
        let audio = frames(
            &[
                false, false, false, true, true, true, true, true, true, false, false,
            ],
            4,
        );
        let outcome = vad.process(&audio, false);
        assert!(!outcome.endpoint);
        // smoothing flips to Speech at frame 4 and the trailing 2-frame dip
        // stays below speech_to_silence_frames, so frames 4..=10 are emitted
        assert_eq!(outcome.speech.len(), (11 - 4) * 4);
    }

    #[test]
    fn endpoint_fires_after_long_silence() {
        let mut vad = Vad::new(test_config(), ThresholdClassifier::new(4));
        let audio = frames(&[false; 6], 4);
        let outcome = vad.process(&audio, false);
        assert!(outcome.endpoint);
        assert!(outcome.speech.is_empty());
    }

    #[test]
    fn pause_after_speech_triggers_endpoint() {
        let mut vad = Vad::new(test_config(), ThresholdClassifier::new(4));
        // speech, then enough silence to fall back to Silence (3 frames)
        // and then accumulate the endpoint trigger (5 more)
        let mut pattern = vec![true; 4];
        pattern.extend(vec![false; 9]);
        let outcome = vad.process(&frames(&pattern, 4), false);
        assert!(outcome.endpoint);
    }

    #[test]
    fn short_dip_does_not_leave_speech_state() {
        let mut vad = Vad::new(test_config(), ThresholdClassifier::new(4));
        // a 2-frame dip is below speech_to_silence_frames
        let pattern = [true, true, true, false, false, true, true];
        let outcome = vad.process(&frames(&pattern, 4), false);
        assert!(!outcome.endpoint);
        // dip frames stay labelled speech, so frames 1..=6 are emitted
        assert_eq!(outcome.speech.len(), (7 - 1) * 4);
    }

    #[test]
    fn lookback_recovers_onset_frames() {
        let mut config = test_config();
        config.lookback_frames = 2;
        let mut vad = Vad::new(config, ThresholdClassifier::new(4));
        let pattern = [false, false, false, false, true, true, true, true];
        let outcome = vad.process(&frames(&pattern, 4), false);
        // without lookback speech starts at frame 5; with it, frames 3..=7
        assert_eq!(outcome.speech.len(), (8 - 3) * 4);
    }

    #[test]
    fn lookback_is_chunk_invariant() {
        let mut config = test_config();
        config.lookback_frames = 2;
        let pattern = [false, false, false, false, true, true, true, true];
        let audio = frames(&pattern, 4);

        let mut whole = Vad::new(config.clone(), ThresholdClassifier::new(4));
        let whole_speech = whole.process(&audio, false).speech;
        // onset at frame 5, lookback reaches back to frame 3
        assert_eq!(whole_speech.len(), (8 - 3) * 4);

        // splitting right before the onset relabels frames of the first
        // chunk after it was processed; their audio must still come through
        let mut split = Vad::new(config, ThresholdClassifier::new(4));
        let mut split_speech = split.process(&audio[..16], false).speech;
        split_speech.extend(split.process(&audio[16..], false).speech);
        assert_eq!(split_speech, whole_speech);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut vad = Vad::new(test_config(), ThresholdClassifier::new(4));
        vad.process(&frames(&[false; 6], 4), false);
        vad.reset();
        // a fresh short silence does not immediately re-trigger
        let outcome = vad.process(&frames(&[false; 2], 4), false);
        assert!(!outcome.endpoint);
    }

    #[test]
    fn buffer_cap_resets_detector() {
        let mut config = test_config();
        config.max_buffered_samples = 64;
        let mut vad = Vad::new(config, ThresholdClassifier::new(4));
        vad.process(&frames(&[true; 10], 4), false); // 40 samples
        let outcome = vad.process(&frames(&[true; 10], 4), false); // would exceed
        assert!(!outcome.endpoint);
        assert!(vad.audio_buffer.len() <= 64);
    }
}
