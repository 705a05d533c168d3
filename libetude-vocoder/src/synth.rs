// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The synthesis blocks driven by the vocoder's block diagram.
//!
//! Synthesis is a deterministic sinusoidal bank: each mel channel drives one oscillator at the
//! channel's mel-spaced center frequency, amplitude-interpolated across each hop. Oscillator
//! phases persist across calls, so chunked synthesis continues the batch waveform exactly. The
//! post-filter is a one-pole smoother with optional first-order noise shaping; the sink collects
//! the final samples for the vocoder to hand back to the caller.

use std::sync::Arc;

use parking_lot::Mutex;

use libetude_core::errors::{internal_error, Result};
use libetude_core::graph::{BlockProcessor, Port};

/// Converts a frequency in Hz to mels.
fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Converts mels to a frequency in Hz.
fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

/// State shared between the vocoder context and its synthesizer block.
pub(crate) struct SynthState {
    /// Staged mel frames, row-major `[frame][channel]`. Consumed by one `process` call.
    pub mel: Vec<f32>,
    pub frames: usize,
    /// Per-channel oscillator gain, from the model's vocoder layer when present.
    pub gains: Vec<f32>,
    phases: Vec<f32>,
    prev_amps: Vec<f32>,
    /// Per-channel angular increment in radians per sample.
    omegas: Vec<f32>,
    channels: usize,
    hop: usize,
}

impl SynthState {
    pub fn new(sample_rate: u32, channels: usize, hop: usize) -> SynthState {
        let mel_top = hz_to_mel(sample_rate as f32 * 0.45);

        let omegas = (0..channels)
            .map(|m| {
                let center = mel_to_hz((m as f32 + 0.5) / channels as f32 * mel_top);
                2.0 * std::f32::consts::PI * center / sample_rate as f32
            })
            .collect();

        SynthState {
            mel: Vec::new(),
            frames: 0,
            gains: vec![1.0; channels],
            phases: vec![0.0; channels],
            prev_amps: vec![0.0; channels],
            omegas,
            channels,
            hop,
        }
    }

    /// Clears the oscillator state for a fresh run.
    pub fn reset(&mut self) {
        self.mel.clear();
        self.frames = 0;
        self.phases.iter_mut().for_each(|p| *p = 0.0);
        self.prev_amps.iter_mut().for_each(|a| *a = 0.0);
    }

    /// Synthesizes the staged frames into `out`, which must hold `frames * hop` samples.
    fn render(&mut self, out: &mut [f32]) {
        let scale = 2.0 / self.channels as f32;

        let mel = std::mem::take(&mut self.mel);
        let frames = std::mem::take(&mut self.frames);

        for frame in 0..frames {
            let amps = &mel[frame * self.channels..(frame + 1) * self.channels];

            for k in 0..self.hop {
                // Linear amplitude interpolation across the hop keeps frame joins click-free.
                let blend = (k + 1) as f32 / self.hop as f32;
                let mut sample = 0.0f32;

                for m in 0..self.channels {
                    let amp = self.prev_amps[m] + (amps[m] - self.prev_amps[m]) * blend;
                    sample += amp * self.gains[m] * self.phases[m].sin();

                    self.phases[m] += self.omegas[m];
                    if self.phases[m] > std::f32::consts::TAU {
                        self.phases[m] -= std::f32::consts::TAU;
                    }
                }

                out[frame * self.hop + k] = sample * scale;
            }

            self.prev_amps.copy_from_slice(amps);
        }
    }
}

/// The synthesizer block: consumes staged mel frames, produces audio on its output port.
pub(crate) struct SynthBlock {
    pub state: Arc<Mutex<SynthState>>,
}

impl BlockProcessor for SynthBlock {
    fn process(
        &mut self,
        _inputs: &mut [Port],
        outputs: &mut [Port],
        frames: usize,
    ) -> Result<()> {
        let mut state = self.state.lock();

        if state.frames * state.hop != frames {
            return internal_error("staged mel frames disagree with the processing frame count");
        }

        let mut samples = vec![0.0f32; frames];
        state.render(&mut samples);

        outputs[0].write_audio(&samples)
    }
}

/// State shared between the vocoder context and its post-filter block.
pub(crate) struct PostFilterState {
    pub enabled: bool,
    pub noise_shaping: bool,
    /// Smoothing coefficient in `(0, 1]`; one disables smoothing.
    pub alpha: f32,
    last: f32,
    shaped_error: f32,
}

impl PostFilterState {
    pub fn new() -> PostFilterState {
        PostFilterState {
            enabled: true,
            noise_shaping: false,
            alpha: 0.9,
            last: 0.0,
            shaped_error: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.last = 0.0;
        self.shaped_error = 0.0;
    }
}

/// The post-filter block: one-pole smoothing plus optional error-feedback noise shaping of the
/// 16-bit quantization grid.
pub(crate) struct PostFilterBlock {
    pub state: Arc<Mutex<PostFilterState>>,
}

impl BlockProcessor for PostFilterBlock {
    fn process(
        &mut self,
        inputs: &mut [Port],
        outputs: &mut [Port],
        frames: usize,
    ) -> Result<()> {
        let samples = inputs[0].audio()?;
        let mut state = self.state.lock();

        let mut out = Vec::with_capacity(frames);
        for &x in samples.iter().take(frames) {
            let mut y = if state.enabled {
                state.last + state.alpha * (x - state.last)
            }
            else {
                x
            };
            state.last = y;

            if state.noise_shaping {
                // First-order error feedback onto the 16-bit output grid.
                let target = y + state.shaped_error;
                let quantized = (target * 32767.0).round() / 32767.0;
                state.shaped_error = target - quantized;
                y = quantized;
            }

            out.push(y);
        }

        outputs[0].write_audio(&out)
    }
}

/// State shared between the vocoder context and its sink block.
pub(crate) struct SinkState {
    pub samples: Vec<f32>,
}

/// The sink block: captures the processed audio for the vocoder to return.
pub(crate) struct SinkBlock {
    pub state: Arc<Mutex<SinkState>>,
}

impl BlockProcessor for SinkBlock {
    fn process(
        &mut self,
        inputs: &mut [Port],
        _outputs: &mut [Port],
        frames: usize,
    ) -> Result<()> {
        let samples = inputs[0].audio()?;

        let mut state = self.state.lock();
        state.samples.clear();
        state.samples.extend_from_slice(&samples[..frames]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{PostFilterState, SynthState};

    #[test]
    fn verify_mel_spacing_monotonic() {
        let state = SynthState::new(24000, 80, 256);
        assert!(state.omegas.windows(2).all(|w| w[0] < w[1]));
        assert!(state.omegas.iter().all(|&w| w > 0.0 && w < std::f32::consts::PI));
    }

    #[test]
    fn verify_silence_in_silence_out() {
        let mut state = SynthState::new(24000, 8, 64);
        state.mel = vec![0.0; 8 * 2];
        state.frames = 2;

        let mut out = vec![1.0f32; 128];
        state.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn verify_chunked_render_matches_batch() {
        let mel: Vec<f32> = (0..8 * 4).map(|i| ((i % 7) as f32) * 0.1).collect();

        // Batch: all four frames at once.
        let mut batch = SynthState::new(24000, 8, 64);
        batch.mel = mel.clone();
        batch.frames = 4;
        let mut batch_out = vec![0.0f32; 4 * 64];
        batch.render(&mut batch_out);

        // Chunked: two frames at a time; phases persist between calls.
        let mut chunked = SynthState::new(24000, 8, 64);
        let mut chunk_out = Vec::new();
        for half in 0..2 {
            chunked.mel = mel[half * 2 * 8..(half + 1) * 2 * 8].to_vec();
            chunked.frames = 2;
            let mut out = vec![0.0f32; 2 * 64];
            chunked.render(&mut out);
            chunk_out.extend_from_slice(&out);
        }

        assert_eq!(batch_out, chunk_out);
    }

    #[test]
    fn verify_post_filter_state_resets() {
        let state = Arc::new(Mutex::new(PostFilterState::new()));
        state.lock().last = 0.7;
        state.lock().reset();
        assert_eq!(state.lock().last, 0.0);
    }
}
