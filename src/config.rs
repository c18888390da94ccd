//! Configuration for the decoder core.
//!
//! Each component has its own config struct with serde defaults and a
//! `validate()` method; [`DecoderConfig`] aggregates them and can be loaded
//! from a TOML file and environment variables via `figment`.
//!
//! Validation is strict: an out-of-range value is a construction-time error,
//! never silently clamped.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};

// Default value functions for serde defaults
fn default_beam() -> f32 {
    16.0
}
fn default_max_active() -> usize {
    usize::MAX
}
fn default_min_active() -> usize {
    20
}
fn default_beam_delta() -> f32 {
    0.5
}
fn default_hash_ratio() -> f32 {
    2.0
}
fn default_acoustic_scale() -> f32 {
    0.1
}
fn default_skip() -> usize {
    0
}
fn default_max_batch_size() -> usize {
    16
}
fn default_silence_thresh() -> f32 {
    0.5
}
fn default_silence_to_speech_frames() -> usize {
    3
}
fn default_speech_to_silence_frames() -> usize {
    15
}
fn default_endpoint_trigger_frames() -> usize {
    100
}
fn default_lookback_frames() -> usize {
    0
}
fn default_frame_shift() -> usize {
    160
}
fn default_max_buffered_samples() -> usize {
    10 * 60 * 16000
}
fn default_num_workers() -> usize {
    num_cpus::get()
}

/// Beam-search pruning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamSearchConfig {
    /// Beam width: hypotheses worse than best-cost-plus-beam are pruned.
    #[serde(default = "default_beam")]
    pub beam: f32,

    /// Upper bound on the number of active tokens kept per frame. When the
    /// active set exceeds this, the beam is tightened to the max_active-th
    /// best cost.
    #[serde(default = "default_max_active")]
    pub max_active: usize,

    /// Lower bound on search breadth: the beam is widened so at least this
    /// many tokens survive (when that many exist).
    #[serde(default = "default_min_active")]
    pub min_active: usize,

    /// Slack added when widening the adaptive beam from an active-count
    /// cutoff.
    #[serde(default = "default_beam_delta")]
    pub beam_delta: f32,

    /// Hash buckets per active token; the token store is resized each frame
    /// to `active * hash_ratio`.
    #[serde(default = "default_hash_ratio")]
    pub hash_ratio: f32,
}

impl Default for BeamSearchConfig {
    fn default() -> Self {
        Self {
            beam: default_beam(),
            max_active: default_max_active(),
            min_active: default_min_active(),
            beam_delta: default_beam_delta(),
            hash_ratio: default_hash_ratio(),
        }
    }
}

impl BeamSearchConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.beam > 0.0) {
            return Err(DecodeError::InvalidConfig(format!(
                "beam must be positive, got {}",
                self.beam
            )));
        }
        if self.max_active <= 1 {
            return Err(DecodeError::InvalidConfig(format!(
                "max_active must be > 1, got {}",
                self.max_active
            )));
        }
        if self.min_active >= self.max_active {
            return Err(DecodeError::InvalidConfig(format!(
                "min_active ({}) must be < max_active ({})",
                self.min_active, self.max_active
            )));
        }
        if !(self.hash_ratio >= 1.0) {
            return Err(DecodeError::InvalidConfig(format!(
                "hash_ratio must be >= 1.0, got {}",
                self.hash_ratio
            )));
        }
        Ok(())
    }
}

/// Batched acoustic scoring parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodableConfig {
    /// Scale applied to prior-normalized log-likelihoods.
    #[serde(default = "default_acoustic_scale")]
    pub acoustic_scale: f32,

    /// Frames skipped between forward passes; computed rows are broadcast
    /// across the stride `skip + 1`.
    #[serde(default = "default_skip")]
    pub skip: usize,

    /// Maximum number of forward passes batched into one model call.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for DecodableConfig {
    fn default() -> Self {
        Self {
            acoustic_scale: default_acoustic_scale(),
            skip: default_skip(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl DecodableConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.acoustic_scale > 0.0) {
            return Err(DecodeError::InvalidConfig(format!(
                "acoustic_scale must be positive, got {}",
                self.acoustic_scale
            )));
        }
        if self.max_batch_size == 0 {
            return Err(DecodeError::InvalidConfig(
                "max_batch_size must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Endpoint detector parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// A frame whose silence posterior exceeds this is classified silence.
    #[serde(default = "default_silence_thresh")]
    pub silence_thresh: f32,

    /// Consecutive speech frames required for the Silence -> Speech
    /// transition.
    #[serde(default = "default_silence_to_speech_frames")]
    pub silence_to_speech_frames: usize,

    /// Consecutive silence frames required for the Speech -> Silence
    /// transition.
    #[serde(default = "default_speech_to_silence_frames")]
    pub speech_to_silence_frames: usize,

    /// Consecutive silence frames, while in the Silence state, that fire an
    /// endpoint.
    #[serde(default = "default_endpoint_trigger_frames")]
    pub endpoint_trigger_frames: usize,

    /// Frames re-labelled as speech before each silence -> speech onset.
    #[serde(default = "default_lookback_frames")]
    pub lookback_frames: usize,

    /// Samples per classifier frame, used to map frame spans back to audio
    /// sample spans.
    #[serde(default = "default_frame_shift")]
    pub frame_shift: usize,

    /// Cap on buffered audio; the detector resets itself rather than grow
    /// past this.
    #[serde(default = "default_max_buffered_samples")]
    pub max_buffered_samples: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_thresh: default_silence_thresh(),
            silence_to_speech_frames: default_silence_to_speech_frames(),
            speech_to_silence_frames: default_speech_to_silence_frames(),
            endpoint_trigger_frames: default_endpoint_trigger_frames(),
            lookback_frames: default_lookback_frames(),
            frame_shift: default_frame_shift(),
            max_buffered_samples: default_max_buffered_samples(),
        }
    }
}

impl VadConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.silence_thresh > 0.0 && self.silence_thresh < 1.0) {
            return Err(DecodeError::InvalidConfig(format!(
                "silence_thresh must be in (0, 1), got {}",
                self.silence_thresh
            )));
        }
        if self.frame_shift == 0 {
            return Err(DecodeError::InvalidConfig(
                "frame_shift must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Worker-pool parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of worker threads; each one permanently owns one scorer
    /// resource.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(DecodeError::InvalidConfig(
                "num_workers must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Aggregate configuration loaded from multiple sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderConfig {
    #[serde(default)]
    pub search: BeamSearchConfig,
    #[serde(default)]
    pub decodable: DecodableConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl DecoderConfig {
    /// Load configuration with precedence:
    /// 1. Environment variables prefixed `WFST_` (highest priority)
    /// 2. The given TOML file (if it exists)
    /// 3. Built-in defaults (lowest priority)
    pub fn load(path: &str) -> Result<Self> {
        let config: DecoderConfig = Figment::from(Serialized::defaults(DecoderConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("WFST_").split("__"))
            .extract()
            .map_err(|e| {
                DecodeError::InvalidConfig(format!("failed to load configuration: {}", e))
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.search.validate()?;
        self.decodable.validate()?;
        self.vad.validate()?;
        self.runtime.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(DecoderConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_negative_beam() {
        let config = BeamSearchConfig {
            beam: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DecodeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_min_active_at_max_active() {
        let config = BeamSearchConfig {
            max_active: 10,
            min_active: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_small_hash_ratio() {
        let config = BeamSearchConfig {
            hash_ratio: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_batch() {
        let config = DecodableConfig {
            max_batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_toml_with_defaults() {
        use std::io::Write;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("decoder.toml");
        let mut file = std::fs::File::create(&path).expect("create");
        write!(
            file,
            "[search]\nbeam = 12.0\nmax_active = 7000\n\n[decodable]\nskip = 1\n"
        )
        .expect("write");

        let config = DecoderConfig::load(path.to_str().expect("utf-8 path")).expect("load");
        assert_eq!(config.search.beam, 12.0);
        assert_eq!(config.search.max_active, 7000);
        assert_eq!(config.decodable.skip, 1);
        // untouched sections fall back to defaults
        assert_eq!(config.vad.silence_to_speech_frames, 3);
    }
}
