// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Vocoder configuration: modes, quality presets, and optimization flags.

use bitflags::bitflags;

use libetude_core::errors::{invalid_argument_error, Result};

bitflags! {
    /// Optimization switches applied on top of the quality preset.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct OptimizationFlags: u32 {
        /// Prefer throughput: in real-time mode this disables the post-filter and noise shaping.
        const SPEED = 0x01;
        /// Prefer a smaller working set over cached intermediates.
        const LOW_MEMORY = 0x02;
    }
}

/// The execution mode of a vocoder context.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VocoderMode {
    /// One-shot conversion of a whole mel tensor.
    Batch,
    /// Chunked conversion with overlap carried across chunk boundaries.
    Streaming,
    /// Streaming with bounded lookahead and speed-biased processing.
    Realtime,
}

/// Output quality presets, weakest to strongest.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityPreset {
    Draft,
    Normal,
    High,
    Ultra,
}

/// The concrete processing policy a preset selects.
#[derive(Copy, Clone, Debug)]
pub struct QualityPolicy {
    pub post_filter: bool,
    pub noise_shaping: bool,
    /// Scalar quality factor applied to quality-sensitive stages.
    pub quality_factor: f32,
    /// Relative processing cost versus the `Normal` preset.
    pub cost_factor: f32,
}

impl QualityPreset {
    pub fn policy(&self) -> QualityPolicy {
        match *self {
            QualityPreset::Draft => QualityPolicy {
                post_filter: false,
                noise_shaping: false,
                quality_factor: 0.5,
                cost_factor: 0.6,
            },
            QualityPreset::Normal => QualityPolicy {
                post_filter: true,
                noise_shaping: false,
                quality_factor: 0.75,
                cost_factor: 1.0,
            },
            QualityPreset::High => QualityPolicy {
                post_filter: true,
                noise_shaping: true,
                quality_factor: 0.9,
                cost_factor: 1.4,
            },
            QualityPreset::Ultra => QualityPolicy {
                post_filter: true,
                noise_shaping: true,
                quality_factor: 1.0,
                cost_factor: 2.0,
            },
        }
    }

    /// Every preset, weakest first.
    pub fn all() -> [QualityPreset; 4] {
        [QualityPreset::Draft, QualityPreset::Normal, QualityPreset::High, QualityPreset::Ultra]
    }
}

/// Maps quality/speed weights to a preset:
/// `q/(q+s) < 0.25` is draft, `< 0.5` normal, `< 0.75` high, and ultra otherwise.
pub fn preset_for_weights(quality_weight: f32, speed_weight: f32) -> QualityPreset {
    let total = quality_weight + speed_weight;
    let ratio = if total > 0.0 { quality_weight / total } else { 0.5 };

    if ratio < 0.25 {
        QualityPreset::Draft
    }
    else if ratio < 0.5 {
        QualityPreset::Normal
    }
    else if ratio < 0.75 {
        QualityPreset::High
    }
    else {
        QualityPreset::Ultra
    }
}

/// Configuration of a vocoder context.
#[derive(Clone, Debug)]
pub struct VocoderConfig {
    pub sample_rate: u32,
    pub mel_channels: usize,
    pub hop_length: usize,
    pub win_length: usize,
    pub quality: QualityPreset,
    pub mode: VocoderMode,
    pub optimizations: OptimizationFlags,
    /// The maximum number of mel frames per streaming chunk.
    pub chunk_size: usize,
    pub lookahead_frames: usize,
    pub max_latency_ms: f32,
}

impl Default for VocoderConfig {
    fn default() -> Self {
        VocoderConfig {
            sample_rate: 24000,
            mel_channels: 80,
            hop_length: 256,
            win_length: 1024,
            quality: QualityPreset::Normal,
            mode: VocoderMode::Batch,
            optimizations: OptimizationFlags::empty(),
            chunk_size: 32,
            lookahead_frames: 4,
            max_latency_ms: 100.0,
        }
    }
}

impl VocoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return invalid_argument_error("sample rate must be non-zero");
        }
        if self.mel_channels == 0 {
            return invalid_argument_error("mel channel count must be non-zero");
        }
        if self.hop_length == 0 || self.win_length < self.hop_length {
            return invalid_argument_error("window must cover at least one hop");
        }
        if self.chunk_size == 0 {
            return invalid_argument_error("chunk size must be non-zero");
        }
        Ok(())
    }

    /// The lookahead actually honoured: real-time mode caps it at two frames.
    pub fn effective_lookahead(&self) -> usize {
        match self.mode {
            VocoderMode::Realtime => self.lookahead_frames.min(2),
            _ => self.lookahead_frames,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_weight_mapping() {
        assert_eq!(preset_for_weights(0.1, 0.9), QualityPreset::Draft);
        assert_eq!(preset_for_weights(0.3, 0.7), QualityPreset::Normal);
        assert_eq!(preset_for_weights(0.6, 0.4), QualityPreset::High);
        assert_eq!(preset_for_weights(0.9, 0.1), QualityPreset::Ultra);
        assert_eq!(preset_for_weights(0.75, 0.25), QualityPreset::Ultra);
    }

    #[test]
    fn verify_policy_monotonic_cost() {
        let costs: Vec<f32> =
            QualityPreset::all().iter().map(|p| p.policy().cost_factor).collect();
        assert!(costs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn verify_realtime_caps_lookahead() {
        let mut config = VocoderConfig { lookahead_frames: 8, ..Default::default() };
        assert_eq!(config.effective_lookahead(), 8);

        config.mode = VocoderMode::Realtime;
        assert_eq!(config.effective_lookahead(), 2);
    }

    #[test]
    fn verify_validation() {
        assert!(VocoderConfig::default().validate().is_ok());

        let bad = VocoderConfig { hop_length: 0, ..Default::default() };
        assert!(bad.validate().is_err());
    }
}
