use std::collections::HashMap;

use crate::block_hash::{anchor_block_hashes, Anchor, StrongDigest};
use crate::error::Result;
use crate::signature::Signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub anchor: Anchor,
    pub strong: StrongDigest,
}

/// Weak checksum -> anchored blocks sharing it, in signature order.
///
/// Built once per diff from a signature and read-only afterwards.
#[derive(Debug, Default)]
pub struct BlockLibrary {
    table: HashMap<u32, Vec<Candidate>>,
}

impl BlockLibrary {
    pub fn from_signature(signature: &Signature) -> Result<Self> {
        let anchored = anchor_block_hashes(&signature.block_hashes, &signature.container)?;

        let mut table: HashMap<u32, Vec<Candidate>> = HashMap::with_capacity(anchored.len());
        for hash in anchored {
            if let Some(anchor) = hash.anchor {
                table.entry(hash.weak).or_default().push(Candidate {
                    anchor,
                    strong: hash.strong,
                });
            }
        }

        Ok(Self { table })
    }

    pub fn candidates(&self, weak: u32) -> Option<&[Candidate]> {
        self.table.get(&weak).map(Vec::as_slice)
    }

    pub fn contains(&self, weak: u32) -> bool {
        self.table.contains_key(&weak)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Pick the block whose strong digest equals `strong` among the candidates for `weak`.
    ///
    /// Blocks of `preferred_file` (the target file with the same name as the
    /// one being diffed) win, and among those the block that continues
    /// `continues` (the previous copy's next block) comes first. Without a
    /// preferred hit the lowest file index wins. Only blocks of exactly `len`
    /// bytes are considered.
    pub fn find_match(
        &self,
        weak: u32,
        strong: &StrongDigest,
        len: usize,
        preferred_file: Option<usize>,
        continues: Option<(usize, usize)>,
    ) -> Option<Anchor> {
        let candidates = self.candidates(weak)?;
        let hits = || {
            candidates
                .iter()
                .filter(move |c| c.anchor.block_len() == len && &c.strong == strong)
        };

        if let Some(preferred) = preferred_file {
            let preferred_hits = || hits().filter(move |c| c.anchor.file_index == preferred);

            if let Some((_, block_index)) = continues.filter(|(file, _)| *file == preferred) {
                if let Some(hit) = preferred_hits().find(|c| c.anchor.block_index == block_index) {
                    return Some(hit.anchor);
                }
            }

            if let Some(hit) = preferred_hits().next() {
                return Some(hit.anchor);
            }
        }

        // Insertion order is already ascending by file index.
        hits().next().map(|c| c.anchor)
    }
}
