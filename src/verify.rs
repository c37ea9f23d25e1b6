use rayon::prelude::*;
use std::path::Path;

use crate::block_hash;
use crate::container;
use crate::error::{PathContext, Result};
use crate::signature::Signature;
use crate::util;

/// A recorded entry that is missing or does not match, by container index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wound {
    Directory { index: usize },
    Symlink { index: usize },
    File { index: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    pub wounds: Vec<Wound>,
}

impl VerificationResult {
    pub fn is_ok(&self) -> bool {
        self.wounds.is_empty()
    }
}

/// Check `dir` against a signature.
///
/// Directories must exist as directories, symlinks must point at their
/// recorded target, files must hash to the recorded blocks. Entries that
/// the signature does not mention are ignored.
pub fn verify(signature: &Signature, dir: &Path) -> Result<VerificationResult> {
    let root = dir.canonicalize().with_path(dir)?;
    let container = &signature.container;
    let mut wounds = Vec::new();

    for (index, d) in container.directories.iter().enumerate() {
        let path = util::join_relative(&root, &d.name);
        let ok = std::fs::symlink_metadata(&path)
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !ok {
            wounds.push(Wound::Directory { index });
        }
    }

    for (index, link) in container.symlinks.iter().enumerate() {
        let path = util::join_relative(&root, &link.name);
        let is_link = std::fs::symlink_metadata(&path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        let ok = is_link
            && container::read_link_target(&root, &link.name).is_ok_and(|t| t == link.target);
        if !ok {
            wounds.push(Wound::Symlink { index });
        }
    }

    let file_ok: Vec<bool> = container
        .files
        .par_iter()
        .enumerate()
        .map(|(index, file)| {
            let path = util::join_relative(&root, &file.name);
            let regular = std::fs::symlink_metadata(&path)
                .map(|m| m.is_file() && m.len() == file.size)
                .unwrap_or(false);
            if !regular {
                return false;
            }
            let expected = signature.file_block_hashes(index);
            match block_hash::generate_hashes(&path) {
                Ok(actual) => {
                    actual.len() == expected.len()
                        && actual.iter().zip(expected).all(|(a, e)| a.same_content(e))
                }
                Err(e) => {
                    tracing::debug!(file = %path.display(), error = %e, "could not hash file");
                    false
                }
            }
        })
        .collect();
    wounds.extend(
        file_ok
            .into_iter()
            .enumerate()
            .filter(|(_, ok)| !ok)
            .map(|(index, _)| Wound::File { index }),
    );

    tracing::info!(dir = %root.display(), wounds = wounds.len(), "verified directory");
    Ok(VerificationResult { wounds })
}
