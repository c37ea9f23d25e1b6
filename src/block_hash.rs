use std::path::Path;

use crate::container::Container;
use crate::error::{Error, Result};
use crate::rolling_hash::RollingHash;
use crate::util;

/// Fixed block size for hashing, anchoring and the rolling window.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// 128-bit strong digest of one block.
pub type StrongDigest = [u8; 16];

/// BLAKE3 truncated to 128 bits.
pub fn strong_digest(data: &[u8]) -> StrongDigest {
    let mut out = [0u8; 16];
    out.copy_from_slice(&blake3::hash(data).as_bytes()[..16]);
    out
}

/// Position of a block inside a signature's container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Anchor {
    pub file_index: usize,
    pub block_index: usize,
    /// `file_size % BLOCK_SIZE` for the final block of a file, otherwise 0.
    /// Zero always means a full-length block.
    pub short_size: usize,
}

impl Anchor {
    pub fn block_len(&self) -> usize {
        if self.short_size == 0 {
            BLOCK_SIZE
        } else {
            self.short_size
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHash {
    pub weak: u32,
    pub strong: StrongDigest,
    pub anchor: Option<Anchor>,
}

impl BlockHash {
    pub fn new(weak: u32, strong: StrongDigest) -> Self {
        Self {
            weak,
            strong,
            anchor: None,
        }
    }

    /// Hash one block of bytes, unanchored.
    pub fn from_block(block: &[u8]) -> Self {
        Self::new(RollingHash::hash_of(block), strong_digest(block))
    }

    pub fn is_anchored(&self) -> bool {
        self.anchor.is_some()
    }

    /// Same content, ignoring placement.
    pub fn same_content(&self, other: &BlockHash) -> bool {
        self.weak == other.weak && self.strong == other.strong
    }
}

/// Number of blocks a file of `file_size` bytes is split into.
pub fn num_blocks(file_size: u64) -> usize {
    file_size.div_ceil(BLOCK_SIZE as u64) as usize
}

/// Hash every `BLOCK_SIZE`-aligned chunk of `data`; the last one may be short.
pub fn hash_blocks(data: &[u8]) -> Vec<BlockHash> {
    data.chunks(BLOCK_SIZE).map(BlockHash::from_block).collect()
}

/// Read a file and hash its blocks.
pub fn generate_hashes(path: &Path) -> Result<Vec<BlockHash>> {
    let data = util::load_file(path)?;
    Ok(hash_blocks(&data))
}

/// Give each hash of a signature's flat list its `(file, block, short size)` position.
///
/// Walks the container's files in order and consumes `ceil(size / BLOCK_SIZE)`
/// hashes per file, the same segmentation [`hash_blocks`] produces. Empty
/// files consume none.
pub fn anchor_block_hashes(hashes: &[BlockHash], container: &Container) -> Result<Vec<BlockHash>> {
    let expected: usize = container.files.iter().map(|f| num_blocks(f.size)).sum();
    if expected != hashes.len() {
        return Err(Error::BlockCountMismatch {
            expected,
            actual: hashes.len(),
        });
    }

    let mut anchored = Vec::with_capacity(hashes.len());
    let mut remaining = hashes.iter();

    for (file_index, file) in container.files.iter().enumerate() {
        let blocks = num_blocks(file.size);
        for block_index in 0..blocks {
            let short_size = if block_index + 1 == blocks {
                (file.size % BLOCK_SIZE as u64) as usize
            } else {
                0
            };
            // Count checked above.
            let Some(hash) = remaining.next() else {
                break;
            };
            anchored.push(BlockHash {
                weak: hash.weak,
                strong: hash.strong,
                anchor: Some(Anchor {
                    file_index,
                    block_index,
                    short_size,
                }),
            });
        }
    }

    Ok(anchored)
}
