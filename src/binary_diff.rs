use crate::block_hash::{strong_digest, Anchor, BLOCK_SIZE};
use crate::block_library::BlockLibrary;
use crate::patch::SyncOperation;
use crate::rolling_hash::RollingHash;

/// Unmatched bytes are flushed as a literal once more than this many are pending.
pub const OWED_MAX: usize = 4 * 1024 * 1024;

#[derive(Default)]
struct FileOps {
    ops: Vec<SyncOperation>,
}

impl FileOps {
    fn literal(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.ops.push(SyncOperation::Literal(bytes.to_vec()));
        }
    }

    /// Append a matched block, growing the previous range when it is contiguous.
    fn block(&mut self, anchor: Anchor) {
        if let Some(SyncOperation::BlockRange {
            file_index,
            block_index,
            block_span,
        }) = self.ops.last_mut()
        {
            if *file_index == anchor.file_index && *block_index + *block_span == anchor.block_index {
                *block_span += 1;
                return;
            }
        }
        self.ops.push(SyncOperation::BlockRange {
            file_index: anchor.file_index,
            block_index: anchor.block_index,
            block_span: 1,
        });
    }

    /// The block that would extend the previous range, if the last op is one.
    fn next_block(&self) -> Option<(usize, usize)> {
        match self.ops.last() {
            Some(SyncOperation::BlockRange {
                file_index,
                block_index,
                block_span,
            }) => Some((*file_index, block_index + block_span)),
            _ => None,
        }
    }
}

/// Express one source file as block copies from the library plus literals.
///
/// Returns the ops between `StartFile` and `EndOfFile`. A match is only
/// attempted once the window holds a full block, since signature blocks are
/// block-aligned. The bytes left at the end get one more chance to match a
/// (possibly short) stored block as a whole.
pub fn diff_file(
    data: &[u8],
    library: &BlockLibrary,
    preferred_file: Option<usize>,
) -> Vec<SyncOperation> {
    let mut out = FileOps::default();
    let mut rolling = RollingHash::new();

    // Bytes in [owed_start, window_start) are scanned but not yet emitted.
    let mut owed_start = 0;
    let mut window_start = 0;

    for (pos, &byte) in data.iter().enumerate() {
        let weak = rolling.update(byte);
        let window_end = pos + 1;
        if window_end - window_start > BLOCK_SIZE {
            window_start += 1;
        }

        if window_end - window_start == BLOCK_SIZE && library.contains(weak) {
            let strong = strong_digest(&data[window_start..window_end]);
            if let Some(anchor) =
                library.find_match(weak, &strong, BLOCK_SIZE, preferred_file, out.next_block())
            {
                out.literal(&data[owed_start..window_start]);
                out.block(anchor);
                window_start = window_end;
                owed_start = window_end;
                rolling.reset();
                continue;
            }
        }

        if window_start - owed_start > OWED_MAX {
            out.literal(&data[owed_start..window_start]);
            owed_start = window_start;
        }
    }

    let remainder = &data[owed_start..];
    if !remainder.is_empty() {
        let tail_match = if remainder.len() <= BLOCK_SIZE {
            let weak = RollingHash::hash_of(remainder);
            if library.contains(weak) {
                let strong = strong_digest(remainder);
                library.find_match(weak, &strong, remainder.len(), preferred_file, out.next_block())
            } else {
                None
            }
        } else {
            None
        };

        match tail_match {
            Some(anchor) => out.block(anchor),
            None => out.literal(remainder),
        }
    }

    out.ops
}
