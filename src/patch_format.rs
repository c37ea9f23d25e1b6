//! On-disk layout shared by signature and patch files.
//!
//! ```text
//! [u32 LE magic][varint header len][header message][body]
//! body (after decompression) = ([varint message len][message])*
//! ```
//!
//! Messages are `bincode`-encoded structs; field order is the schema.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::compression::{self, CompressionAlgorithm, CompressionSettings};
use crate::error::{Error, Result};
use crate::varint;

/// File kind identifiers, stored little-endian in the first four bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Magic {
    Patch = 0x0FEF_5F00,
    Signature = 0x0FEF_5F01,
    Manifest = 0x0FEF_5F02,
    Wounds = 0x0FEF_5F03,
    ZipIndex = 0x0FEF_5F04,
}

impl Magic {
    pub fn value(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionMessage {
    pub algorithm: u32,
    pub quality: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMessage {
    pub compression: CompressionMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMessage {
    pub files: Vec<FileMessage>,
    pub dirs: Vec<DirMessage>,
    pub symlinks: Vec<SymlinkMessage>,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirMessage {
    pub path: String,
    pub mode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMessage {
    pub path: String,
    pub mode: u32,
    pub size: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkMessage {
    pub path: String,
    pub mode: u32,
    pub dest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHashMessage {
    pub weak_hash: u32,
    pub strong_hash: Vec<u8>,
}

pub const SYNC_HEADER_RSYNC: u32 = 0;
pub const SYNC_HEADER_BSDIFF: u32 = 1;

/// Opens one source file's operation stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHeaderMessage {
    pub kind: u32,
    pub file_index: i64,
}

pub const SYNC_OP_BLOCK_RANGE: u32 = 0;
pub const SYNC_OP_DATA: u32 = 1;
pub const SYNC_OP_END_OF_FILE: u32 = 2049;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOpMessage {
    pub kind: u32,
    pub file_index: i64,
    pub block_index: i64,
    pub block_span: i64,
    pub data: Vec<u8>,
}

pub fn encode_message<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    bincode::serialize(message).map_err(Error::Encode)
}

pub fn decode_message<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Decode(format!("{what} message: {e}")))
}

fn header_for(settings: CompressionSettings) -> HeaderMessage {
    HeaderMessage {
        compression: CompressionMessage {
            algorithm: settings.algorithm.to_wire(),
            quality: settings.quality,
        },
    }
}

/// Frame already-encoded body messages into a complete file.
pub fn encode_file(
    magic: Magic,
    settings: CompressionSettings,
    messages: &[Vec<u8>],
) -> Result<Vec<u8>> {
    let body_len: usize = messages.iter().map(|m| m.len() + varint::MAX_VARINT_LEN).sum();
    let mut body = Vec::with_capacity(body_len);
    for message in messages {
        varint::encode_uvarint(message.len() as u64, &mut body);
        body.extend_from_slice(message);
    }

    let compressed = compression::compress(&body, settings)?;
    let header = encode_message(&header_for(settings))?;

    let mut out = Vec::with_capacity(4 + varint::MAX_VARINT_LEN + header.len() + compressed.len());
    out.extend_from_slice(&magic.value().to_le_bytes());
    varint::encode_uvarint(header.len() as u64, &mut out);
    out.extend_from_slice(&header);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Check the magic, parse the header and return the decompressed body's messages.
pub fn decode_file(data: &[u8], expected: Magic) -> Result<(CompressionSettings, Vec<Vec<u8>>)> {
    let magic_bytes: [u8; 4] = data
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::InvalidMagic {
            expected: expected.value(),
            found: 0,
        })?;
    let found = u32::from_le_bytes(magic_bytes);
    if found != expected.value() {
        return Err(Error::InvalidMagic {
            expected: expected.value(),
            found,
        });
    }

    let rest = &data[4..];
    let (header_len, used) = varint::decode_uvarint(rest)
        .map_err(|e| Error::InvalidHeader(format!("header length: {e}")))?;
    let header_end = used
        .checked_add(header_len as usize)
        .filter(|&end| end <= rest.len())
        .ok_or_else(|| Error::InvalidHeader("header extends past end of file".to_string()))?;

    let header: HeaderMessage = bincode::deserialize(&rest[used..header_end])
        .map_err(|e| Error::InvalidHeader(e.to_string()))?;
    let settings = CompressionSettings {
        algorithm: CompressionAlgorithm::from_wire(header.compression.algorithm)?,
        quality: header.compression.quality,
    };

    let body = compression::decompress(&rest[header_end..], settings.algorithm)?;
    let messages = split_messages(&body)?;

    Ok((settings, messages))
}

fn split_messages(body: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut messages = Vec::new();
    let mut pos = 0;

    while pos < body.len() {
        let (len, used) = varint::decode_uvarint(&body[pos..])?;
        pos += used;
        let end = pos
            .checked_add(len as usize)
            .filter(|&end| end <= body.len())
            .ok_or_else(|| {
                Error::Decode(format!(
                    "message of {len} bytes at offset {pos} runs past end of body"
                ))
            })?;
        messages.push(body[pos..end].to_vec());
        pos = end;
    }

    Ok(messages)
}
