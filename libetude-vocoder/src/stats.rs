// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Vocoder processing statistics.

/// A read-only snapshot of a vocoder context's cumulative statistics.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct VocoderStats {
    /// Processing operations sampled (batch calls and streaming chunks).
    pub operations: u64,
    /// Mel frames converted.
    pub frames: u64,
    pub avg_processing_ms: f64,
    pub peak_processing_ms: f64,
    /// Audio duration produced divided by wall processing time. Greater than one means faster
    /// than real time.
    pub realtime_factor: f64,
    /// An SNR-style proxy of output quality in dB.
    pub quality_score_db: f64,
}

pub(crate) struct StatsAccum {
    operations: u64,
    frames: u64,
    total_processing_ms: f64,
    peak_processing_ms: f64,
    total_audio_ms: f64,
    quality_score_db: f64,
}

impl StatsAccum {
    pub fn new() -> StatsAccum {
        StatsAccum {
            operations: 0,
            frames: 0,
            total_processing_ms: 0.0,
            peak_processing_ms: 0.0,
            total_audio_ms: 0.0,
            quality_score_db: 0.0,
        }
    }

    /// Records one processing operation.
    pub fn record(&mut self, frames: usize, processing_ms: f64, audio_ms: f64) {
        self.operations += 1;
        self.frames += frames as u64;
        self.total_processing_ms += processing_ms;
        self.peak_processing_ms = self.peak_processing_ms.max(processing_ms);
        self.total_audio_ms += audio_ms;
    }

    /// Updates the quality proxy from an output buffer.
    ///
    /// Without a reference signal the score is a smoothness proxy: the ratio of signal power to
    /// first-difference power, in dB. Harsh, noisy output scores low; silence scores zero.
    pub fn score_output(&mut self, samples: &[f32]) {
        if samples.len() < 2 {
            return;
        }

        let signal: f64 =
            samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum::<f64>() / samples.len() as f64;

        let diff: f64 = samples
            .windows(2)
            .map(|w| {
                let d = f64::from(w[1]) - f64::from(w[0]);
                d * d
            })
            .sum::<f64>()
            / (samples.len() - 1) as f64;

        if signal <= 0.0 {
            self.quality_score_db = 0.0;
        }
        else {
            let floor = diff.max(1e-12);
            self.quality_score_db = 10.0 * (signal / floor).log10();
        }
    }

    /// Mean processing milliseconds per mel frame, when anything has been recorded.
    pub fn avg_ms_per_frame(&self) -> Option<f64> {
        if self.frames == 0 {
            return None;
        }
        Some(self.total_processing_ms / self.frames as f64)
    }

    pub fn snapshot(&self) -> VocoderStats {
        VocoderStats {
            operations: self.operations,
            frames: self.frames,
            avg_processing_ms: if self.operations == 0 {
                0.0
            }
            else {
                self.total_processing_ms / self.operations as f64
            },
            peak_processing_ms: self.peak_processing_ms,
            realtime_factor: if self.total_processing_ms > 0.0 {
                self.total_audio_ms / self.total_processing_ms
            }
            else {
                0.0
            },
            quality_score_db: self.quality_score_db,
        }
    }

    pub fn reset(&mut self) {
        *self = StatsAccum::new();
    }
}

#[cfg(test)]
mod tests {
    use super::StatsAccum;

    #[test]
    fn verify_record_and_snapshot() {
        let mut accum = StatsAccum::new();
        accum.record(32, 5.0, 340.0);
        accum.record(32, 15.0, 340.0);

        let stats = accum.snapshot();
        assert_eq!(stats.operations, 2);
        assert_eq!(stats.frames, 64);
        assert_eq!(stats.avg_processing_ms, 10.0);
        assert_eq!(stats.peak_processing_ms, 15.0);
        assert!((stats.realtime_factor - 34.0).abs() < 1e-9);
    }

    #[test]
    fn verify_quality_score_orders_signals() {
        let mut smooth = StatsAccum::new();
        let mut harsh = StatsAccum::new();

        let slow: Vec<f32> = (0..512).map(|i| (i as f32 * 0.01).sin()).collect();
        let fast: Vec<f32> = (0..512).map(|i| (i as f32 * 2.0).sin()).collect();

        smooth.score_output(&slow);
        harsh.score_output(&fast);

        assert!(smooth.snapshot().quality_score_db > harsh.snapshot().quality_score_db);
    }

    #[test]
    fn verify_reset() {
        let mut accum = StatsAccum::new();
        accum.record(8, 1.0, 10.0);
        accum.reset();
        assert_eq!(accum.snapshot(), Default::default());
    }
}
