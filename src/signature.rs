use rayon::prelude::*;
use std::path::Path;

use crate::block_hash::{self, BlockHash, StrongDigest};
use crate::compression::CompressionSettings;
use crate::container::{Container, FileEntry};
use crate::error::{Error, PathContext, Result};
use crate::patch_format::{self, BlockHashMessage, ContainerMessage, Magic};
use crate::util;

/// A tree's container plus the hash of every block of every file, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub compression: CompressionSettings,
    pub container: Container,
    pub block_hashes: Vec<BlockHash>,
}

impl Signature {
    pub fn new(container: Container, block_hashes: Vec<BlockHash>) -> Self {
        Self {
            compression: CompressionSettings::TRANSPORT,
            container,
            block_hashes,
        }
    }

    /// Signature of an empty tree, for diffing against nothing.
    pub fn empty() -> Self {
        Self {
            compression: CompressionSettings::NONE,
            container: Container::empty(),
            block_hashes: Vec::new(),
        }
    }

    pub fn with_compression(mut self, compression: CompressionSettings) -> Self {
        self.compression = compression;
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut messages = Vec::with_capacity(1 + self.block_hashes.len());
        messages.push(patch_format::encode_message(&self.container.to_message())?);
        for hash in &self.block_hashes {
            messages.push(patch_format::encode_message(&BlockHashMessage {
                weak_hash: hash.weak,
                strong_hash: hash.strong.to_vec(),
            })?);
        }
        patch_format::encode_file(Magic::Signature, self.compression, &messages)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (compression, messages) = patch_format::decode_file(data, Magic::Signature)?;
        let mut messages = messages.into_iter();

        let container_bytes = messages.next().ok_or(Error::EmptyBody("signature"))?;
        let container: ContainerMessage =
            patch_format::decode_message(&container_bytes, "container")?;

        let block_hashes = messages
            .map(|bytes| {
                let message: BlockHashMessage = patch_format::decode_message(&bytes, "block hash")?;
                let strong: StrongDigest = message.strong_hash.as_slice().try_into().map_err(|_| {
                    Error::Decode(format!(
                        "strong hash must be 16 bytes, got {}",
                        message.strong_hash.len()
                    ))
                })?;
                Ok(BlockHash::new(message.weak_hash, strong))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            compression,
            container: Container::from_message(container)?,
            block_hashes,
        })
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).with_path(path)?;
        Self::decode(&data)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let data = self.encode()?;
        std::fs::write(path, data).with_path(path)
    }

    /// Block hashes belonging to the file at `file_index`.
    pub fn file_block_hashes(&self, file_index: usize) -> &[BlockHash] {
        let start: usize = self.container.files[..file_index]
            .iter()
            .map(|f| block_hash::num_blocks(f.size))
            .sum();
        let count = block_hash::num_blocks(self.container.files[file_index].size);
        let end = (start + count).min(self.block_hashes.len());
        &self.block_hashes[start.min(end)..end]
    }
}

/// Scan `dir` and hash every file's blocks.
pub fn sign(dir: &Path) -> Result<Signature> {
    let root = dir.canonicalize().with_path(dir)?;
    let container = Container::scan(&root)?;

    let per_file: Vec<Vec<BlockHash>> = container
        .files
        .par_iter()
        .map(|file| block_hash::generate_hashes(&util::join_relative(&root, &file.name)))
        .collect::<Result<_>>()?;
    let block_hashes: Vec<BlockHash> = per_file.into_iter().flatten().collect();

    tracing::info!(
        dir = %root.display(),
        files = container.files.len(),
        blocks = block_hashes.len(),
        "signed directory"
    );

    Ok(Signature::new(container, block_hashes))
}

/// Sign a lone file as a tree holding just that file, under its own name.
fn sign_file(path: &Path) -> Result<Signature> {
    let meta = std::fs::metadata(path).with_path(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidPatch(format!("{} has no file name", path.display())))?;
    let block_hashes = block_hash::generate_hashes(path)?;

    let container = Container {
        files: vec![FileEntry {
            name,
            mode: util::permission_bits(&meta, &util::EntryKind::File),
            size: meta.len(),
        }],
        ..Default::default()
    };
    tracing::info!(file = %path.display(), blocks = block_hashes.len(), "signed single file");

    Ok(Signature::new(container, block_hashes))
}

/// Turn a diff target argument into a signature.
///
/// `/dev/null` is the empty tree and a directory is signed on the spot. A
/// regular file is read as a signature; one without the signature magic is
/// signed as a one-file tree instead.
pub fn load_or_make_signature(path: &Path) -> Result<Signature> {
    if path == Path::new("/dev/null") {
        return Ok(Signature::empty());
    }

    let meta = std::fs::metadata(path).with_path(path)?;
    if meta.is_dir() {
        return sign(path);
    }

    match Signature::read_from(path) {
        Err(Error::InvalidMagic { .. }) => {
            tracing::debug!(file = %path.display(), "not a signature, signing as a single file");
            sign_file(path)
        }
        other => other,
    }
}
