// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Whole-file LEF/LEFX round trips over real files.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use libetude_core::errors::ErrorKind;
use libetude_format_lef::{
    ArchInfo, AudioInfo, BlendMode, ExtLayer, LayerCodec, LayerDesc, LayerKind, LefBuilder,
    LefxBuilder, LefxFile, LefxMeta, MmapModel, ModelMeta, QuantKind, StreamingModel,
    StreamingOptions, TokenizerInfo,
};

fn sample_meta() -> ModelMeta {
    ModelMeta {
        name: "test-voice".to_string(),
        version: "1.0".to_string(),
        author: "etude".to_string(),
        description: "integration fixture".to_string(),
        arch: ArchInfo { hidden_size: 128, num_layers: 3, num_heads: 2, vocab_size: 256 },
        audio: AudioInfo {
            sample_rate: 24000,
            mel_channels: 80,
            hop_length: 256,
            win_length: 1024,
        },
        tokenizer: TokenizerInfo { kind: "phoneme".to_string(), vocab_size: 256 },
    }
}

/// Deterministic pseudo-random payload that does not compress to nothing.
fn payload(seed: u32, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            (state >> 24) as u8
        })
        .collect()
}

fn write_sample_model(path: &PathBuf, sizes: &[usize], compress: bool) -> LefBuilder {
    let mut builder = LefBuilder::new(sample_meta()).with_codec(LayerCodec::Lz4);

    for (id, &len) in sizes.iter().enumerate() {
        builder
            .add_layer(LayerDesc {
                id: id as u32,
                kind: LayerKind::Linear,
                quant: QuantKind::None,
                data: payload(id as u32, len),
                compress,
            })
            .unwrap();
    }

    builder.write_file(path).unwrap();
    builder
}

#[test]
fn verify_mmap_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.lef");

    let builder = write_sample_model(&path, &[512, 2048, 128], true);

    let model = MmapModel::open(&path).unwrap();
    assert_eq!(model.meta(), &sample_meta());
    assert_eq!(model.layers().len(), 3);
    assert_eq!(model.header().model_hash, builder.model_hash().unwrap());

    for (id, &len) in [512usize, 2048, 128].iter().enumerate() {
        let bytes = model.layer_bytes(id as u32).unwrap();
        assert_eq!(bytes.as_ref(), payload(id as u32, len).as_slice());
    }

    assert_eq!(model.layer_bytes(9).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn verify_save_load_identity() {
    let dir = tempfile::tempdir().unwrap();
    let path_a = dir.path().join("a.lef");
    let path_b = dir.path().join("b.lef");

    write_sample_model(&path_a, &[300, 700], false);
    write_sample_model(&path_b, &[300, 700], false);

    // The writer is deterministic: identical models serialize byte-for-byte identically.
    assert_eq!(fs::read(&path_a).unwrap(), fs::read(&path_b).unwrap());
}

#[test]
fn verify_streaming_lru_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.lef");

    // Layers of 4096, 8192, and 2048 bytes with a 6144-byte cache budget.
    write_sample_model(&path, &[4096, 8192, 2048], false);

    let model =
        StreamingModel::open_with(&path, StreamingOptions { cache_budget: 6144 }).unwrap();

    model.load_layer(0).unwrap();
    assert!(model.cache_usage() <= 6144);

    model.load_layer(2).unwrap();
    assert_eq!(model.cache_usage(), 6144);
    assert!(model.is_cached(0) && model.is_cached(2));

    // Loading the 8192-byte layer must evict layer 0 (the least recently used) and never let
    // usage exceed the budget.
    let bytes = model.load_layer(1).unwrap();
    assert_eq!(bytes.len(), 8192);
    assert!(!model.is_cached(0));
    assert!(model.cache_usage() <= 6144);
}

#[test]
fn verify_loaders_agree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.lef");

    write_sample_model(&path, &[1024, 4096, 64], true);

    let mapped = MmapModel::open(&path).unwrap();
    let streamed = StreamingModel::open(&path).unwrap();

    assert_eq!(mapped.identity(), streamed.identity());

    for id in 0..3u32 {
        let a = mapped.layer_bytes(id).unwrap();
        let b = streamed.load_layer(id).unwrap();
        assert_eq!(a.as_ref(), b.as_slice());
    }
}

#[test]
fn verify_streaming_unload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.lef");

    write_sample_model(&path, &[1024, 1024], false);

    let model = StreamingModel::open(&path).unwrap();
    model.load_layer(0).unwrap();
    assert!(model.is_cached(0));

    assert!(model.unload_layer(0));
    assert!(!model.is_cached(0));
    assert_eq!(model.cache_usage(), 0);
    assert!(!model.unload_layer(0));
}

#[test]
fn verify_layer_corruption_detected_and_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.lef");

    write_sample_model(&path, &[256, 256], false);

    let model = StreamingModel::open(&path).unwrap();
    let layer1_offset = model.layers()[1].offset;
    drop(model);

    // Corrupt a byte inside layer 1's payload.
    let mut file = fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(layer1_offset + 10)).unwrap();
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0xff;
    file.seek(SeekFrom::Start(layer1_offset + 10)).unwrap();
    file.write_all(&byte).unwrap();
    drop(file);

    let model = StreamingModel::open(&path).unwrap();

    // The corrupt layer fails; already-valid layers remain usable.
    assert_eq!(model.load_layer(1).unwrap_err().kind(), ErrorKind::Corrupt);
    assert!(model.load_layer(0).is_ok());
}

#[test]
fn verify_header_corruption_rejected_before_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.lef");

    write_sample_model(&path, &[256], false);

    // Tamper with the layer-index offset field inside the header.
    let mut bytes = fs::read(&path).unwrap();
    bytes[24] ^= 0x01;
    fs::write(&path, &bytes).unwrap();

    assert_eq!(MmapModel::open(&path).unwrap_err().kind(), ErrorKind::Corrupt);
    assert_eq!(StreamingModel::open(&path).unwrap_err().kind(), ErrorKind::Corrupt);
}

#[test]
fn verify_lefx_binding_against_real_base() {
    let dir = tempfile::tempdir().unwrap();
    let base_path = dir.path().join("base.lef");
    let ext_path = dir.path().join("voice.lefx");

    write_sample_model(&base_path, &[64], false);
    let base = MmapModel::open(&base_path).unwrap();

    let mut builder = LefxBuilder::new(
        base.identity(),
        LefxMeta { name: "ext".to_string(), version: "0.1".to_string(), ..Default::default() },
    );
    builder
        .add_layer(ExtLayer {
            base_layer_id: 0,
            mode: BlendMode::AddScaled(1.0),
            data: vec![0u8; 64],
        })
        .unwrap();
    builder.write_file(&ext_path).unwrap();

    let ext = LefxFile::open(&ext_path).unwrap();
    ext.bind(&base.identity()).unwrap();

    // Binding against a model with a different hash fails and changes nothing.
    let other_path = dir.path().join("other.lef");
    write_sample_model(&other_path, &[64, 64], false);
    let other = MmapModel::open(&other_path).unwrap();

    assert_ne!(base.identity().hash, other.identity().hash);
    assert_eq!(
        ext.bind(&other.identity()).unwrap_err().kind(),
        ErrorKind::IncompatibleBase
    );
}
