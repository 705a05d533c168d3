// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The vocoder runtime: mel spectrogram in, audio samples out.
//!
//! A [`Vocoder`] context owns a DSP block diagram (synthesizer, post-filter, sink), the state of
//! an optional streaming session, and cumulative statistics, all behind one mutex so a context
//! can be shared between threads. Audio is produced in batch ([`Vocoder::mel_to_audio`]),
//! streaming ([`Vocoder::process_chunk`] with an overlap of one hop carried across chunk
//! boundaries), or real-time mode (bounded lookahead, speed-biased processing).

mod config;
mod stats;
mod synth;

pub use config::{
    preset_for_weights, OptimizationFlags, QualityPolicy, QualityPreset, VocoderConfig,
    VocoderMode,
};
pub use stats::VocoderStats;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use parking_lot::Mutex;

use libetude_core::errors::{
    buffer_size_mismatch_error, invalid_argument_error, invalid_state_error, Result,
};
use libetude_core::graph::{BlockDesc, BlockKind, Diagram, DiagramOptions, PortKind, PortSpec};
use libetude_core::tensor::{DataType, Tensor};
use libetude_format_lef::{LayerKind, StreamingModel};

use stats::StatsAccum;
use synth::{PostFilterBlock, PostFilterState, SinkBlock, SinkState, SynthBlock, SynthState};

struct Inner {
    config: VocoderConfig,
    diagram: Diagram,
    synth: Arc<Mutex<SynthState>>,
    post_filter: Arc<Mutex<PostFilterState>>,
    sink: Arc<Mutex<SinkState>>,
    model: Option<StreamingModel>,
    streaming: bool,
    current_frame: u64,
    /// The last hop of raw synthesis, delayed into the next chunk's output.
    overlap: Vec<f32>,
    quality_scale: f32,
    speed_scale: f32,
    adaptive_target_ms: Option<f64>,
    stats: StatsAccum,
}

/// A thread-safe vocoder context.
pub struct Vocoder {
    inner: Mutex<Inner>,
}

impl Vocoder {
    /// Creates a context with identity oscillator gains.
    pub fn new(config: VocoderConfig) -> Result<Vocoder> {
        Vocoder::build(config, None)
    }

    /// Creates a context from a LEF model file.
    ///
    /// The model's audio metadata overrides the corresponding config fields, and a
    /// vocoder-kind layer, when present, provides the per-channel oscillator gains.
    pub fn from_model(path: &Path, mut config: VocoderConfig) -> Result<Vocoder> {
        let model = StreamingModel::open(path)?;

        let audio = model.meta().audio;
        if audio.sample_rate > 0 {
            config.sample_rate = audio.sample_rate as u32;
        }
        if audio.mel_channels > 0 {
            config.mel_channels = audio.mel_channels as usize;
        }
        if audio.hop_length > 0 {
            config.hop_length = audio.hop_length as usize;
        }
        if audio.win_length > 0 {
            config.win_length = audio.win_length as usize;
        }

        info!(
            "vocoder model '{}' v{}: {} mel channels at {} Hz",
            model.meta().name,
            model.meta().version,
            config.mel_channels,
            config.sample_rate
        );

        Vocoder::build(config, Some(model))
    }

    fn build(config: VocoderConfig, model: Option<StreamingModel>) -> Result<Vocoder> {
        config.validate()?;

        let synth = Arc::new(Mutex::new(SynthState::new(
            config.sample_rate,
            config.mel_channels,
            config.hop_length,
        )));
        let post_filter = Arc::new(Mutex::new(PostFilterState::new()));
        let sink = Arc::new(Mutex::new(SinkState { samples: Vec::new() }));

        if let Some(model) = &model {
            if let Some(entry) =
                model.layers().iter().find(|entry| entry.kind == LayerKind::Vocoder)
            {
                let gains = model.load_layer_f32(entry.id)?;
                if gains.len() == config.mel_channels {
                    synth.lock().gains = gains;
                }
                else {
                    debug!("ignoring vocoder layer with mismatched channel count");
                }
            }
        }

        let capacity = config.chunk_size * config.hop_length;
        let audio_port = PortSpec { kind: PortKind::Audio, capacity };

        let mut diagram = Diagram::new(DiagramOptions::default());

        let synth_id = diagram.add_block(BlockDesc {
            name: "synth".to_string(),
            kind: BlockKind::Synthesizer,
            processor: Some(Box::new(SynthBlock { state: Arc::clone(&synth) })),
            inputs: vec![],
            outputs: vec![audio_port],
        })?;

        let filter_id = diagram.add_block(BlockDesc {
            name: "post-filter".to_string(),
            kind: BlockKind::Filter,
            processor: Some(Box::new(PostFilterBlock { state: Arc::clone(&post_filter) })),
            inputs: vec![audio_port],
            outputs: vec![audio_port],
        })?;

        let sink_id = diagram.add_block(BlockDesc {
            name: "sink".to_string(),
            kind: BlockKind::Analyzer,
            processor: Some(Box::new(SinkBlock { state: Arc::clone(&sink) })),
            inputs: vec![audio_port],
            outputs: vec![],
        })?;

        diagram.connect(synth_id, 0, filter_id, 0)?;
        diagram.connect(filter_id, 0, sink_id, 0)?;

        diagram.validate()?;
        diagram.build()?;
        diagram.initialize()?;

        let mut inner = Inner {
            overlap: vec![0.0; config.hop_length],
            config,
            diagram,
            synth,
            post_filter,
            sink,
            model,
            streaming: false,
            current_frame: 0,
            quality_scale: 1.0,
            speed_scale: 1.0,
            adaptive_target_ms: None,
            stats: StatsAccum::new(),
        };
        inner.apply_quality();

        Ok(Vocoder { inner: Mutex::new(inner) })
    }

    pub fn config(&self) -> VocoderConfig {
        self.inner.lock().config.clone()
    }

    /// Replaces the configuration. Refused while a streaming session is active; the diagram and
    /// synthesis state are rebuilt.
    pub fn update_config(&self, config: VocoderConfig) -> Result<()> {
        config.validate()?;

        let mut inner = self.inner.lock();
        if inner.streaming {
            return invalid_state_error("cannot reconfigure during a streaming session");
        }

        let model = inner.model.take();
        let replacement = Vocoder::build(config, model)?.inner.into_inner();

        *inner = replacement;
        Ok(())
    }

    pub fn set_quality(&self, preset: QualityPreset) {
        let mut inner = self.inner.lock();
        inner.config.quality = preset;
        inner.apply_quality();
    }

    /// Switches the execution mode. Refused while streaming.
    pub fn set_mode(&self, mode: VocoderMode) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.streaming {
            return invalid_state_error("cannot switch modes during a streaming session");
        }
        inner.config.mode = mode;
        inner.apply_quality();
        Ok(())
    }

    pub fn set_optimization(&self, flags: OptimizationFlags) {
        let mut inner = self.inner.lock();
        inner.config.optimizations = flags;
        inner.apply_quality();
    }

    /// Maps quality and speed weights onto a preset and the derived scales.
    pub fn balance_quality_speed(&self, quality_weight: f32, speed_weight: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&quality_weight) || !(0.0..=1.0).contains(&speed_weight) {
            return invalid_argument_error("weights must lie in [0, 1]");
        }

        let mut inner = self.inner.lock();
        inner.config.quality = preset_for_weights(quality_weight, speed_weight);
        inner.quality_scale = 0.5 + 0.5 * quality_weight;
        inner.speed_scale = 0.5 + 0.5 * speed_weight;
        inner.apply_quality();
        Ok(())
    }

    /// Enables adaptive quality: before each chunk the strongest preset whose estimated
    /// processing time fits `target_latency_ms` is selected.
    pub fn enable_adaptive_quality(&self, target_latency_ms: f64) -> Result<()> {
        if target_latency_ms <= 0.0 {
            return invalid_argument_error("target latency must be positive");
        }

        let mut inner = self.inner.lock();
        inner.adaptive_target_ms = Some(target_latency_ms);
        inner.adapt_quality();
        Ok(())
    }

    pub fn disable_adaptive_quality(&self) {
        self.inner.lock().adaptive_target_ms = None;
    }

    /// Converts a whole mel tensor to audio.
    ///
    /// `mel` is `[frames, mel_channels]` f32. On entry `*len_io` is the capacity of `audio_out`
    /// and must be at least `frames * hop_length`; on return it is the number of samples
    /// written.
    pub fn mel_to_audio(
        &self,
        mel: &Tensor,
        audio_out: &mut [f32],
        len_io: &mut usize,
    ) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.streaming {
            return invalid_state_error("batch conversion is not available while streaming");
        }

        let (frames, values) = inner.check_mel(mel)?;
        let needed = frames * inner.config.hop_length;

        if *len_io < needed || audio_out.len() < needed {
            return buffer_size_mismatch_error("output buffer is too small");
        }

        let started = Instant::now();

        // Batch runs on fresh synthesis state so repeated conversions are reproducible.
        inner.reset_pipeline();

        let chunk = inner.config.chunk_size;
        let mel_channels = inner.config.mel_channels;
        let mut produced = 0;

        for start in (0..frames).step_by(chunk) {
            let end = (start + chunk).min(frames);
            let span = end - start;

            let raw = inner.run_pipeline(
                &values[start * mel_channels..end * mel_channels],
                span,
            )?;

            audio_out[produced..produced + raw.len()].copy_from_slice(&raw);
            produced += raw.len();
        }

        *len_io = produced;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let audio_ms = produced as f64 / inner.config.sample_rate as f64 * 1000.0;
        inner.stats.record(frames, elapsed_ms, audio_ms);
        inner.stats.score_output(&audio_out[..produced]);

        Ok(())
    }

    /// Begins a streaming session: zeroes the overlap, rewinds the frame counter, and resets the
    /// synthesis state.
    pub fn start_streaming(&self) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.streaming {
            return invalid_state_error("streaming session already active");
        }

        if inner.config.mode == VocoderMode::Batch {
            inner.config.mode = VocoderMode::Streaming;
            inner.apply_quality();
        }

        inner.streaming = true;
        inner.current_frame = 0;
        inner.overlap.iter_mut().for_each(|s| *s = 0.0);
        inner.reset_pipeline();

        debug!("streaming session started");
        Ok(())
    }

    /// Converts one mel chunk. Requires an active streaming session; chunks larger than
    /// `chunk_size` frames are rejected.
    ///
    /// The output is delayed by one hop: each call emits the previous call's final hop first,
    /// so chunk joins are free of discontinuities. `*len_io` is capacity in, length out.
    pub fn process_chunk(
        &self,
        mel: &Tensor,
        audio_out: &mut [f32],
        len_io: &mut usize,
    ) -> Result<()> {
        let mut inner = self.inner.lock();

        if !inner.streaming {
            return invalid_state_error("no active streaming session");
        }

        let (frames, values) = inner.check_mel(mel)?;
        if frames > inner.config.chunk_size {
            return invalid_argument_error("chunk exceeds the configured chunk size");
        }

        let needed = frames * inner.config.hop_length;
        if *len_io < needed || audio_out.len() < needed {
            return buffer_size_mismatch_error("output buffer is too small");
        }

        let started = Instant::now();

        inner.adapt_quality();

        let raw = inner.run_pipeline(&values, frames)?;

        // Delay line: emit the carried overlap, then all but the last hop of this chunk; the
        // final hop becomes the next carry.
        let hop = inner.config.hop_length;
        audio_out[..hop].copy_from_slice(&inner.overlap);
        audio_out[hop..needed].copy_from_slice(&raw[..needed - hop]);
        inner.overlap.copy_from_slice(&raw[needed - hop..needed]);

        inner.current_frame += frames as u64;
        *len_io = needed;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let audio_ms = needed as f64 / inner.config.sample_rate as f64 * 1000.0;
        inner.stats.record(frames, elapsed_ms, audio_ms);
        inner.stats.score_output(&audio_out[..needed]);

        Ok(())
    }

    /// Converts one mel chunk and delivers the audio through `callback` in hop-sized runs.
    /// The callback is not retained after the call returns.
    pub fn process_chunk_with(
        &self,
        mel: &Tensor,
        callback: &mut dyn FnMut(&[f32]),
    ) -> Result<()> {
        let frames = match mel.shape().first() {
            Some(&frames) => frames,
            None => return invalid_argument_error("mel tensor must be two-dimensional"),
        };

        let hop = self.inner.lock().config.hop_length;
        let mut buffer = vec![0.0f32; frames * hop];
        let mut len = buffer.len();

        self.process_chunk(mel, &mut buffer, &mut len)?;

        for run in buffer[..len].chunks(hop) {
            callback(run);
        }

        Ok(())
    }

    /// Ends the streaming session, flushing the carried overlap into `final_out`.
    pub fn stop_streaming(&self, final_out: &mut [f32], len_io: &mut usize) -> Result<()> {
        let mut inner = self.inner.lock();

        if !inner.streaming {
            return invalid_state_error("no active streaming session");
        }

        let hop = inner.config.hop_length;
        if *len_io < hop || final_out.len() < hop {
            return buffer_size_mismatch_error("output buffer is too small for the overlap");
        }

        final_out[..hop].copy_from_slice(&inner.overlap);
        *len_io = hop;

        inner.streaming = false;
        inner.overlap.iter_mut().for_each(|s| *s = 0.0);

        debug!("streaming session stopped after {} frames", inner.current_frame);
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.lock().streaming
    }

    /// The `(quality_scale, speed_scale)` pair derived by the last
    /// [`balance_quality_speed`](Vocoder::balance_quality_speed) call.
    pub fn scales(&self) -> (f32, f32) {
        let inner = self.inner.lock();
        (inner.quality_scale, inner.speed_scale)
    }

    /// Mel frames consumed by the current streaming session.
    pub fn current_frame(&self) -> u64 {
        self.inner.lock().current_frame
    }

    pub fn stats(&self) -> VocoderStats {
        self.inner.lock().stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.inner.lock().stats.reset();
    }
}

impl Inner {
    /// Validates the mel input contract and gathers its values.
    fn check_mel(&self, mel: &Tensor) -> Result<(usize, Vec<f32>)> {
        if mel.dtype() != DataType::F32 {
            return invalid_argument_error("mel tensor must be f32");
        }
        if mel.ndim() != 2 {
            return invalid_argument_error("mel tensor must be two-dimensional");
        }
        if mel.shape()[1] != self.config.mel_channels {
            return invalid_argument_error("mel channel count disagrees with the configuration");
        }

        let frames = mel.shape()[0];
        let values = mel.to_f32_vec()?;
        Ok((frames, values))
    }

    /// Stages mel frames and runs one diagram pass, returning the raw pipeline output.
    fn run_pipeline(&mut self, values: &[f32], frames: usize) -> Result<Vec<f32>> {
        {
            let mut synth = self.synth.lock();
            synth.mel = values.to_vec();
            synth.frames = frames;
        }

        self.diagram.process(frames * self.config.hop_length)?;

        Ok(std::mem::take(&mut self.sink.lock().samples))
    }

    /// Resets synthesis and filter state for a fresh, reproducible run.
    fn reset_pipeline(&mut self) {
        self.synth.lock().reset();
        self.post_filter.lock().reset();
        self.sink.lock().samples.clear();
    }

    /// Applies the quality preset, mode, and optimization flags to the post-filter.
    fn apply_quality(&mut self) {
        let policy = self.config.quality.policy();

        let mut filter = self.post_filter.lock();
        filter.enabled = policy.post_filter;
        filter.noise_shaping = policy.noise_shaping;
        // A stronger quality factor smooths less aggressively.
        filter.alpha = (0.5 + 0.5 * policy.quality_factor).min(1.0);

        if self.config.mode == VocoderMode::Realtime
            && self.config.optimizations.contains(OptimizationFlags::SPEED)
        {
            filter.enabled = false;
            filter.noise_shaping = false;
        }
    }

    /// Picks the strongest preset whose estimated per-chunk processing time fits the adaptive
    /// latency target.
    fn adapt_quality(&mut self) {
        let target_ms = match self.adaptive_target_ms {
            Some(target) => target,
            None => return,
        };

        let per_frame_ms = match self.stats.avg_ms_per_frame() {
            Some(avg) => avg,
            None => return,
        };

        let current_cost = f64::from(self.config.quality.policy().cost_factor);
        let chunk_frames = self.config.chunk_size as f64;

        let mut chosen = QualityPreset::Draft;
        for preset in QualityPreset::all() {
            let cost = f64::from(preset.policy().cost_factor);
            let estimated = per_frame_ms / current_cost * cost * chunk_frames;
            if estimated <= target_ms {
                chosen = preset;
            }
        }

        if chosen != self.config.quality {
            debug!("adaptive quality switched to {:?}", chosen);
            self.config.quality = chosen;
            self.apply_quality();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libetude_core::errors::ErrorKind;
    use libetude_core::tensor::Tensor;

    fn small_config() -> VocoderConfig {
        VocoderConfig {
            sample_rate: 8000,
            mel_channels: 8,
            hop_length: 32,
            win_length: 128,
            chunk_size: 4,
            ..Default::default()
        }
    }

    fn mel_tensor(frames: usize, channels: usize, seed: f32) -> Tensor {
        let values: Vec<f32> = (0..frames * channels)
            .map(|i| ((i as f32 * 0.37 + seed).sin() * 0.5 + 0.5) * 0.2)
            .collect();
        Tensor::from_f32(&[frames, channels], &values).unwrap()
    }

    #[test]
    fn verify_batch_output_length() {
        let vocoder = Vocoder::new(small_config()).unwrap();
        let mel = mel_tensor(10, 8, 0.0);

        let mut audio = vec![0.0f32; 10 * 32];
        let mut len = audio.len();
        vocoder.mel_to_audio(&mel, &mut audio, &mut len).unwrap();

        assert_eq!(len, 320);
        assert!(audio.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn verify_capacity_too_small() {
        let vocoder = Vocoder::new(small_config()).unwrap();
        let mel = mel_tensor(10, 8, 0.0);

        let mut audio = vec![0.0f32; 64];
        let mut len = audio.len();
        let err = vocoder.mel_to_audio(&mel, &mut audio, &mut len).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BufferSizeMismatch);
    }

    #[test]
    fn verify_wrong_channel_count() {
        let vocoder = Vocoder::new(small_config()).unwrap();
        let mel = mel_tensor(10, 4, 0.0);

        let mut audio = vec![0.0f32; 10 * 32];
        let mut len = audio.len();
        let err = vocoder.mel_to_audio(&mel, &mut audio, &mut len).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn verify_streaming_misuse() {
        let vocoder = Vocoder::new(small_config()).unwrap();
        let mel = mel_tensor(2, 8, 0.0);

        let mut audio = vec![0.0f32; 2 * 32];
        let mut len = audio.len();

        // Chunk processing before start_streaming is a state error.
        assert_eq!(
            vocoder.process_chunk(&mel, &mut audio, &mut len).unwrap_err().kind(),
            ErrorKind::InvalidState
        );

        vocoder.start_streaming().unwrap();
        assert!(vocoder.is_streaming());
        assert_eq!(vocoder.start_streaming().unwrap_err().kind(), ErrorKind::InvalidState);

        // Oversized chunks are rejected.
        let big = mel_tensor(9, 8, 0.0);
        let mut big_out = vec![0.0f32; 9 * 32];
        let mut big_len = big_out.len();
        assert_eq!(
            vocoder.process_chunk(&big, &mut big_out, &mut big_len).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );

        let mut tail = vec![0.0f32; 32];
        let mut tail_len = tail.len();
        vocoder.stop_streaming(&mut tail, &mut tail_len).unwrap();
        assert!(!vocoder.is_streaming());
    }

    #[test]
    fn verify_streaming_conservation() {
        // The concatenated streaming output equals the batch output shifted by one hop.
        let config = small_config();
        let hop = config.hop_length;

        let vocoder = Vocoder::new(config.clone()).unwrap();
        let mel = mel_tensor(12, 8, 1.0);

        let mut batch = vec![0.0f32; 12 * hop];
        let mut batch_len = batch.len();
        vocoder.mel_to_audio(&mel, &mut batch, &mut batch_len).unwrap();

        vocoder.start_streaming().unwrap();

        let mut streamed = Vec::new();
        for start in [0usize, 4, 8] {
            let chunk = mel.slice(&[start, 0], &[start + 4, 8]).unwrap();

            let mut out = vec![0.0f32; 4 * hop];
            let mut len = out.len();
            vocoder.process_chunk(&chunk, &mut out, &mut len).unwrap();
            streamed.extend_from_slice(&out[..len]);
        }

        let mut tail = vec![0.0f32; hop];
        let mut tail_len = tail.len();
        vocoder.stop_streaming(&mut tail, &mut tail_len).unwrap();
        streamed.extend_from_slice(&tail[..tail_len]);

        // Streaming emits a hop of leading silence, then the batch signal exactly.
        assert_eq!(streamed.len(), batch_len + hop);
        assert!(streamed[..hop].iter().all(|&s| s == 0.0));

        for i in 0..batch_len {
            assert!(
                (streamed[hop + i] - batch[i]).abs() < 1e-6,
                "sample {} diverged: {} vs {}",
                i,
                streamed[hop + i],
                batch[i]
            );
        }
    }

    #[test]
    fn verify_frame_counter_advances() {
        let vocoder = Vocoder::new(small_config()).unwrap();
        vocoder.start_streaming().unwrap();

        let mel = mel_tensor(3, 8, 0.0);
        let mut out = vec![0.0f32; 3 * 32];
        let mut len = out.len();
        vocoder.process_chunk(&mel, &mut out, &mut len).unwrap();
        assert_eq!(vocoder.current_frame(), 3);

        vocoder.process_chunk(&mel, &mut out, &mut len).unwrap();
        assert_eq!(vocoder.current_frame(), 6);
    }

    #[test]
    fn verify_callback_delivery() {
        let vocoder = Vocoder::new(small_config()).unwrap();
        vocoder.start_streaming().unwrap();

        let mel = mel_tensor(4, 8, 0.0);
        let mut runs = 0;
        let mut total = 0;

        vocoder
            .process_chunk_with(&mel, &mut |samples| {
                runs += 1;
                total += samples.len();
            })
            .unwrap();

        assert_eq!(runs, 4);
        assert_eq!(total, 4 * 32);
    }

    #[test]
    fn verify_quality_policy_changes_output() {
        let config = small_config();
        let mel = mel_tensor(8, 8, 2.0);

        let run = |preset: QualityPreset| -> Vec<f32> {
            let vocoder = Vocoder::new(config.clone()).unwrap();
            vocoder.set_quality(preset);

            let mut audio = vec![0.0f32; 8 * 32];
            let mut len = audio.len();
            vocoder.mel_to_audio(&mel, &mut audio, &mut len).unwrap();
            audio
        };

        // Draft bypasses the post-filter, so its output differs from ultra's.
        assert_ne!(run(QualityPreset::Draft), run(QualityPreset::Ultra));
    }

    #[test]
    fn verify_balance_weights() {
        let vocoder = Vocoder::new(small_config()).unwrap();

        vocoder.balance_quality_speed(0.1, 0.9).unwrap();
        assert_eq!(vocoder.config().quality, QualityPreset::Draft);

        vocoder.balance_quality_speed(0.9, 0.1).unwrap();
        assert_eq!(vocoder.config().quality, QualityPreset::Ultra);

        let (quality_scale, speed_scale) = vocoder.scales();
        assert!((quality_scale - 0.95).abs() < 1e-6);
        assert!((speed_scale - 0.55).abs() < 1e-6);

        assert_eq!(
            vocoder.balance_quality_speed(1.5, 0.0).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn verify_adaptive_quality_tracks_target() {
        let vocoder = Vocoder::new(small_config()).unwrap();
        let mel = mel_tensor(8, 8, 0.0);

        // Seed the per-frame timing estimate.
        let mut audio = vec![0.0f32; 8 * 32];
        let mut len = audio.len();
        vocoder.mel_to_audio(&mel, &mut audio, &mut len).unwrap();

        // A generous target admits the strongest preset.
        vocoder.enable_adaptive_quality(1e9).unwrap();
        assert_eq!(vocoder.config().quality, QualityPreset::Ultra);

        // An impossible target falls back to the weakest.
        vocoder.enable_adaptive_quality(1e-9).unwrap();
        assert_eq!(vocoder.config().quality, QualityPreset::Draft);

        assert!(vocoder.enable_adaptive_quality(0.0).is_err());
    }

    #[test]
    fn verify_stats_accumulate() {
        let vocoder = Vocoder::new(small_config()).unwrap();
        let mel = mel_tensor(8, 8, 0.0);

        let mut audio = vec![0.0f32; 8 * 32];
        let mut len = audio.len();
        vocoder.mel_to_audio(&mel, &mut audio, &mut len).unwrap();

        let stats = vocoder.stats();
        assert_eq!(stats.operations, 1);
        assert_eq!(stats.frames, 8);

        vocoder.reset_stats();
        assert_eq!(vocoder.stats().operations, 0);
    }

    #[test]
    fn verify_update_config_rejected_while_streaming() {
        let vocoder = Vocoder::new(small_config()).unwrap();
        vocoder.start_streaming().unwrap();

        let err = vocoder.update_config(small_config()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn verify_realtime_speed_disables_post_filter() {
        let config = VocoderConfig {
            mode: VocoderMode::Realtime,
            optimizations: OptimizationFlags::SPEED,
            quality: QualityPreset::Ultra,
            ..small_config()
        };

        let mel = mel_tensor(8, 8, 2.0);

        let fast = Vocoder::new(config).unwrap();
        let mut fast_audio = vec![0.0f32; 8 * 32];
        let mut len = fast_audio.len();
        fast.mel_to_audio(&mel, &mut fast_audio, &mut len).unwrap();

        // Draft also bypasses the filter; with the same input the raw waveform matches.
        let draft = Vocoder::new(VocoderConfig {
            quality: QualityPreset::Draft,
            ..small_config()
        })
        .unwrap();
        let mut draft_audio = vec![0.0f32; 8 * 32];
        let mut draft_len = draft_audio.len();
        draft.mel_to_audio(&mel, &mut draft_audio, &mut draft_len).unwrap();

        assert_eq!(fast_audio, draft_audio);
    }
}
