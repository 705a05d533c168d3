// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end: write a model, load it, and synthesize audio from a mel tensor.

use libetude::core::tensor::Tensor;
use libetude::lef::{
    ArchInfo, AudioInfo, LayerCodec, LayerDesc, LayerKind, LefBuilder, ModelMeta, QuantKind,
    TokenizerInfo,
};
use libetude::vocoder::{Vocoder, VocoderConfig};

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn write_model(path: &std::path::Path, mel_channels: usize) {
    let mut builder = LefBuilder::new(ModelMeta {
        name: "pipeline-voice".to_string(),
        version: "1.0".to_string(),
        author: "etude".to_string(),
        description: "end-to-end fixture".to_string(),
        arch: ArchInfo { hidden_size: 64, num_layers: 1, num_heads: 1, vocab_size: 64 },
        audio: AudioInfo {
            sample_rate: 8000,
            mel_channels: mel_channels as i32,
            hop_length: 32,
            win_length: 128,
        },
        tokenizer: TokenizerInfo { kind: "phoneme".to_string(), vocab_size: 64 },
    })
    .with_codec(LayerCodec::Lz4);

    // A vocoder layer carrying per-channel oscillator gains.
    let gains: Vec<f32> = (0..mel_channels).map(|m| 1.0 + m as f32 * 0.05).collect();
    builder
        .add_layer(LayerDesc {
            id: 0,
            kind: LayerKind::Vocoder,
            quant: QuantKind::None,
            data: f32_bytes(&gains),
            compress: true,
        })
        .unwrap();

    builder.write_file(path).unwrap();
}

#[test]
fn verify_model_to_audio_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("voice.lef");

    write_model(&path, 8);

    // The model's audio metadata wins over the caller's defaults.
    let vocoder = Vocoder::from_model(&path, VocoderConfig::default()).unwrap();
    let config = vocoder.config();
    assert_eq!(config.sample_rate, 8000);
    assert_eq!(config.mel_channels, 8);
    assert_eq!(config.hop_length, 32);

    let frames = 6;
    let values: Vec<f32> =
        (0..frames * 8).map(|i| ((i as f32 * 0.31).sin() * 0.5 + 0.5) * 0.1).collect();
    let mel = Tensor::from_f32(&[frames, 8], &values).unwrap();

    let mut audio = vec![0.0f32; frames * 32];
    let mut len = audio.len();
    vocoder.mel_to_audio(&mel, &mut audio, &mut len).unwrap();

    assert_eq!(len, frames * 32);
    assert!(audio.iter().any(|&s| s != 0.0));
    assert!(audio.iter().all(|&s| s.is_finite()));

    let stats = vocoder.stats();
    assert_eq!(stats.frames, frames as u64);
    assert!(stats.realtime_factor > 0.0);
}

#[test]
fn verify_model_gains_shape_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("voice.lef");
    write_model(&path, 8);

    let mel_values: Vec<f32> = vec![0.1; 4 * 8];
    let mel = Tensor::from_f32(&[4, 8], &mel_values).unwrap();

    let from_model = Vocoder::from_model(&path, VocoderConfig::default()).unwrap();
    let plain = Vocoder::new(from_model.config()).unwrap();

    let mut a = vec![0.0f32; 4 * 32];
    let mut a_len = a.len();
    from_model.mel_to_audio(&mel, &mut a, &mut a_len).unwrap();

    let mut b = vec![0.0f32; 4 * 32];
    let mut b_len = b.len();
    plain.mel_to_audio(&mel, &mut b, &mut b_len).unwrap();

    // The model's non-unit gains produce a different waveform than identity gains.
    assert_ne!(a, b);
}
