//! One streaming decode, from audio chunks to recognition results.
//!
//! A [`DecodeTask`] is the unit of work submitted to the worker pool. The
//! caller keeps a handle to it and talks to the running decode through two
//! queues: audio chunks in, [`RecognitionResult`]s out. An empty chunk marks
//! end of stream. Each non-final chunk produces a partial result; an endpoint
//! or end of stream produces a final result and (for an endpoint) restarts
//! the decoder for the next segment.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::DecoderConfig;
use crate::decoder::decodable::{AcousticModel, CachingDecodable, FeatureSource};
use crate::decoder::graph::Fst;
use crate::decoder::search::BeamSearchDecoder;
use crate::error::Result;
use crate::runtime::pool::PoolTask;
use crate::runtime::queue::MessageQueue;
use crate::runtime::resources::{DecodeResources, SpeechResources};
use crate::types::RecognitionResult;
use crate::vad::{SpeechClassifier, Vad};

/// Handle to one streaming decode. Shared between the submitting thread
/// (which feeds audio and reads results) and the worker running it.
pub struct DecodeTask<M, F, C> {
    config: DecoderConfig,
    resources: Arc<DecodeResources>,
    audio: MessageQueue<Vec<f32>>,
    results: MessageQueue<RecognitionResult>,
    cancelled: AtomicBool,
    _scorers: PhantomData<fn(M, F, C)>,
}

impl<M, F, C> DecodeTask<M, F, C>
where
    M: AcousticModel,
    F: FeatureSource,
    C: SpeechClassifier,
{
    pub fn new(config: DecoderConfig, resources: Arc<DecodeResources>) -> Self {
        Self {
            config,
            resources,
            audio: MessageQueue::new(),
            results: MessageQueue::new(),
            cancelled: AtomicBool::new(false),
            _scorers: PhantomData,
        }
    }

    /// Feed one audio chunk. Chunks must be non-empty; the empty chunk is
    /// reserved as the end-of-stream marker sent by [`finish`](Self::finish).
    pub fn push_audio(&self, samples: Vec<f32>) {
        assert!(!samples.is_empty(), "audio chunks must be non-empty");
        self.audio.push(samples);
    }

    /// Signal end of stream. The task flushes trailing audio, publishes one
    /// last final result and stops.
    pub fn finish(&self) {
        self.audio.push(Vec::new());
    }

    /// Abort the decode. The best text so far is published as a final result
    /// before the worker moves on.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // wake the worker if it is blocked waiting for audio
        self.audio.push(Vec::new());
    }

    /// Blocking read of the next published result.
    pub fn next_result(&self) -> RecognitionResult {
        self.results.pop()
    }

    /// Non-blocking read of the next published result.
    pub fn try_next_result(&self) -> Option<RecognitionResult> {
        self.results.try_pop()
    }

    fn render(&self, decoder: &BeamSearchDecoder<'_>) -> String {
        match decoder.get_best_path() {
            Some(labels) => self.resources.symbols.join(&labels),
            None => String::new(),
        }
    }

    fn run_inner(&self, scorers: &mut SpeechResources<M, F, C>) -> Result<()> {
        // workers reuse scorers across tasks
        scorers.features.reset();
        scorers.classifier.reset();

        let mut vad = Vad::new(self.config.vad.clone(), &mut scorers.classifier);
        let mut decodable = CachingDecodable::new(
            &self.resources.tree,
            &self.resources.log_prior,
            self.config.decodable.clone(),
            &mut scorers.model,
            &mut scorers.features,
        )?;
        let graph: &dyn Fst = self.resources.graph.as_ref();
        let mut decoder = BeamSearchDecoder::new(graph, self.config.search.clone())?;
        decoder.init_decoding();

        loop {
            let chunk = self.audio.pop();
            if self.cancelled.load(Ordering::SeqCst) {
                debug!("decode task cancelled");
                self.results
                    .push(RecognitionResult::final_result(self.render(&decoder)));
                return Ok(());
            }

            let end_of_stream = chunk.is_empty();
            let outcome = vad.process(&chunk, end_of_stream);
            if !outcome.speech.is_empty() {
                decodable.accept_audio(&outcome.speech);
            }
            if end_of_stream {
                decodable.set_done();
            }
            decoder.advance_decoding(&mut decodable, None);
            let text = self.render(&decoder);

            if end_of_stream {
                self.results.push(RecognitionResult::final_result(text));
                return Ok(());
            }
            if outcome.endpoint {
                debug!(
                    frames = decoder.num_frames_decoded().unwrap_or(0),
                    "endpoint, finalizing segment"
                );
                self.results.push(RecognitionResult::final_result(text));
                decodable.reset();
                decoder.init_decoding();
                vad.reset();
            } else {
                self.results.push(RecognitionResult::partial(text));
            }
        }
    }
}

impl<M, F, C> PoolTask<SpeechResources<M, F, C>> for DecodeTask<M, F, C>
where
    M: AcousticModel,
    F: FeatureSource,
    C: SpeechClassifier,
{
    fn run(&self, scorers: &mut SpeechResources<M, F, C>) {
        if let Err(err) = self.run_inner(scorers) {
            error!(%err, "decode task failed");
            // unblock consumers waiting on a final result
            self.results
                .push(RecognitionResult::final_result(String::new()));
        }
    }
}
