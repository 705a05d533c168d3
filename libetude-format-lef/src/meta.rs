// LibEtude
// Copyright (c) 2025 The LibEtude Project Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The fixed-size model metadata block.

use std::io::{Read, Write};

use libetude_core::errors::Result;
use libetude_core::io::{ReadBytes, WriteBytes};

/// The serialized size of [`ModelMeta`] in bytes.
pub(crate) const META_SIZE: u64 = 452;

const NAME_LEN: usize = 64;
const VERSION_LEN: usize = 16;
const AUTHOR_LEN: usize = 64;
const DESCRIPTION_LEN: usize = 256;
const TOKENIZER_KIND_LEN: usize = 16;

/// The acoustic model's architecture dimensions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchInfo {
    pub hidden_size: i32,
    pub num_layers: i32,
    pub num_heads: i32,
    pub vocab_size: i32,
}

/// The audio parameters the model was trained for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioInfo {
    pub sample_rate: i32,
    pub mel_channels: i32,
    pub hop_length: i32,
    pub win_length: i32,
}

/// Tokenizer identification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenizerInfo {
    pub kind: String,
    pub vocab_size: i32,
}

/// The model metadata block: identity strings plus architecture, audio, and tokenizer
/// configuration. All strings are bounded and NUL-terminated on disk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelMeta {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub arch: ArchInfo,
    pub audio: AudioInfo,
    pub tokenizer: TokenizerInfo,
}

impl ModelMeta {
    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_fixed_str(&self.name, NAME_LEN)?;
        writer.write_fixed_str(&self.version, VERSION_LEN)?;
        writer.write_fixed_str(&self.author, AUTHOR_LEN)?;
        writer.write_fixed_str(&self.description, DESCRIPTION_LEN)?;

        writer.write_i32(self.arch.hidden_size)?;
        writer.write_i32(self.arch.num_layers)?;
        writer.write_i32(self.arch.num_heads)?;
        writer.write_i32(self.arch.vocab_size)?;

        writer.write_i32(self.audio.sample_rate)?;
        writer.write_i32(self.audio.mel_channels)?;
        writer.write_i32(self.audio.hop_length)?;
        writer.write_i32(self.audio.win_length)?;

        writer.write_fixed_str(&self.tokenizer.kind, TOKENIZER_KIND_LEN)?;
        writer.write_i32(self.tokenizer.vocab_size)?;
        Ok(())
    }

    pub(crate) fn read_from<R: Read>(reader: &mut R) -> Result<ModelMeta> {
        Ok(ModelMeta {
            name: reader.read_fixed_str(NAME_LEN)?,
            version: reader.read_fixed_str(VERSION_LEN)?,
            author: reader.read_fixed_str(AUTHOR_LEN)?,
            description: reader.read_fixed_str(DESCRIPTION_LEN)?,
            arch: ArchInfo {
                hidden_size: reader.read_i32()?,
                num_layers: reader.read_i32()?,
                num_heads: reader.read_i32()?,
                vocab_size: reader.read_i32()?,
            },
            audio: AudioInfo {
                sample_rate: reader.read_i32()?,
                mel_channels: reader.read_i32()?,
                hop_length: reader.read_i32()?,
                win_length: reader.read_i32()?,
            },
            tokenizer: TokenizerInfo {
                kind: reader.read_fixed_str(TOKENIZER_KIND_LEN)?,
                vocab_size: reader.read_i32()?,
            },
        })
    }

    /// Serializes the block into a byte vector, e.g. for hashing.
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(META_SIZE as usize);
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn sample_meta() -> ModelMeta {
        ModelMeta {
            name: "demo-voice".to_string(),
            version: "1.2.0".to_string(),
            author: "etude".to_string(),
            description: "A small demonstration voice.".to_string(),
            arch: ArchInfo { hidden_size: 256, num_layers: 4, num_heads: 4, vocab_size: 512 },
            audio: AudioInfo {
                sample_rate: 24000,
                mel_channels: 80,
                hop_length: 256,
                win_length: 1024,
            },
            tokenizer: TokenizerInfo { kind: "phoneme".to_string(), vocab_size: 512 },
        }
    }

    #[test]
    fn verify_meta_round_trip() {
        let meta = sample_meta();

        let bytes = meta.to_bytes().unwrap();
        assert_eq!(bytes.len() as u64, META_SIZE);

        let back = ModelMeta::read_from(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn verify_overlong_name_rejected() {
        let mut meta = sample_meta();
        meta.name = "n".repeat(64);
        assert!(meta.to_bytes().is_err());
    }
}
