//! Body compression for signature and patch files.

use std::io::{Read, Write};

use crate::error::{Error, Result};

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_LG_WINDOW: u32 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Brotli,
    Gzip,
    Zstd,
}

impl CompressionAlgorithm {
    pub fn to_wire(self) -> u32 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Brotli => 1,
            CompressionAlgorithm::Gzip => 2,
            CompressionAlgorithm::Zstd => 3,
        }
    }

    pub fn from_wire(value: u32) -> Result<Self> {
        match value {
            0 => Ok(CompressionAlgorithm::None),
            1 => Ok(CompressionAlgorithm::Brotli),
            2 => Ok(CompressionAlgorithm::Gzip),
            3 => Ok(CompressionAlgorithm::Zstd),
            other => Err(Error::InvalidHeader(format!(
                "unknown compression algorithm {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSettings {
    pub algorithm: CompressionAlgorithm,
    pub quality: i32,
}

impl CompressionSettings {
    /// Fast brotli, for files that are about to be sent somewhere.
    pub const TRANSPORT: CompressionSettings = CompressionSettings {
        algorithm: CompressionAlgorithm::Brotli,
        quality: 1,
    };

    /// Slow brotli, for files that will be stored.
    pub const LONG_TERM: CompressionSettings = CompressionSettings {
        algorithm: CompressionAlgorithm::Brotli,
        quality: 9,
    };

    pub const NONE: CompressionSettings = CompressionSettings {
        algorithm: CompressionAlgorithm::None,
        quality: 0,
    };
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self::TRANSPORT
    }
}

pub fn compress(data: &[u8], settings: CompressionSettings) -> Result<Vec<u8>> {
    match settings.algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Brotli => {
            if !(1..=11).contains(&settings.quality) {
                return Err(Error::InvalidHeader(format!(
                    "brotli quality must be 1-11, got {}",
                    settings.quality
                )));
            }
            let mut out = Vec::with_capacity(data.len() / 2);
            {
                let mut writer = brotli::CompressorWriter::new(
                    &mut out,
                    BROTLI_BUFFER_SIZE,
                    settings.quality as u32,
                    BROTLI_LG_WINDOW,
                );
                writer.write_all(data).map_err(Error::Compression)?;
                writer.flush().map_err(Error::Compression)?;
            }
            Ok(out)
        }
        CompressionAlgorithm::Gzip => Err(Error::Unimplemented("gzip compression")),
        CompressionAlgorithm::Zstd => Err(Error::Unimplemented("zstd compression")),
    }
}

pub fn decompress(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Brotli => {
            let mut out = Vec::with_capacity(data.len() * 2);
            brotli::Decompressor::new(data, BROTLI_BUFFER_SIZE)
                .read_to_end(&mut out)
                .map_err(Error::Decompression)?;
            Ok(out)
        }
        CompressionAlgorithm::Gzip => Err(Error::Unimplemented("gzip compression")),
        CompressionAlgorithm::Zstd => Err(Error::Unimplemented("zstd compression")),
    }
}
