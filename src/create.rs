use rayon::prelude::*;
use std::path::Path;

use crate::binary_diff;
use crate::block_library::BlockLibrary;
use crate::compression::CompressionSettings;
use crate::container::Container;
use crate::error::{PathContext, Result};
use crate::patch::{Patch, SyncAlgorithm, SyncOperation};
use crate::signature::{self, Signature};
use crate::util;

/// Build a patch that rebuilds `source_dir` from the tree described by `target`.
///
/// Files are matched in parallel with Rayon and reassembled in container
/// order, so the result is the same as a sequential scan.
pub fn create_patch(target: &Signature, source_dir: &Path) -> Result<Patch> {
    let root = source_dir.canonicalize().with_path(source_dir)?;
    let source = Container::scan(&root)?;
    let library = BlockLibrary::from_signature(target)?;
    let target_indices = target.container.file_indices();

    let per_file: Vec<Vec<SyncOperation>> = source
        .files
        .par_iter()
        .enumerate()
        .map(|(file_index, file)| -> Result<Vec<SyncOperation>> {
            let data = util::load_file(&util::join_relative(&root, &file.name))?;
            let preferred = target_indices.get(file.name.as_str()).copied();

            let body = binary_diff::diff_file(&data, &library, preferred);
            tracing::debug!(file = %file.name, size = data.len(), ops = body.len(), "diffed file");

            let mut ops = Vec::with_capacity(body.len() + 2);
            ops.push(SyncOperation::StartFile {
                algorithm: SyncAlgorithm::Rsync,
                file_index,
            });
            ops.extend(body);
            ops.push(SyncOperation::EndOfFile);
            Ok(ops)
        })
        .collect::<Result<_>>()?;

    let patch = Patch {
        compression: CompressionSettings::TRANSPORT,
        target: target.container.clone(),
        source,
        sync_ops: per_file.into_iter().flatten().collect(),
    };

    let summary = patch.summary();
    tracing::info!(
        files = summary.files,
        copied_blocks = summary.copied_blocks,
        literal_bytes = summary.literal_bytes,
        "created patch"
    );

    Ok(patch)
}

/// Diff `source_dir` against `target`, returning the patch and the source's own signature.
///
/// The two are independent, so they are computed concurrently on blocking tasks.
pub async fn diff(target: Signature, source_dir: &Path) -> Result<(Patch, Signature)> {
    let patch_dir = source_dir.to_path_buf();
    let sign_dir = source_dir.to_path_buf();

    let (patch, signature) = tokio::try_join!(
        tokio::task::spawn_blocking(move || create_patch(&target, &patch_dir)),
        tokio::task::spawn_blocking(move || signature::sign(&sign_dir)),
    )?;

    Ok((patch?, signature?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_hash::BLOCK_SIZE;

    fn write(root: &Path, name: &str, data: &[u8]) {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, data).unwrap();
    }

    fn big(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| ((i * 13 + (i >> 10)) as u8) ^ seed).collect()
    }

    #[test]
    fn test_identical_tree_copies_every_file() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.bin", &big(3 * BLOCK_SIZE + 17, 1));
        write(tmp.path(), "dir/b.bin", &big(BLOCK_SIZE, 2));
        write(tmp.path(), "dir/empty", b"");

        let sig = signature::sign(tmp.path()).unwrap();
        let patch = create_patch(&sig, tmp.path()).unwrap();

        assert_eq!(patch.source, sig.container);
        assert_eq!(patch.summary().literals, 0);

        let rsync = SyncAlgorithm::Rsync;
        assert_eq!(
            patch.sync_ops,
            vec![
                SyncOperation::StartFile { algorithm: rsync, file_index: 0 },
                SyncOperation::BlockRange { file_index: 0, block_index: 0, block_span: 4 },
                SyncOperation::EndOfFile,
                SyncOperation::StartFile { algorithm: rsync, file_index: 1 },
                SyncOperation::BlockRange { file_index: 1, block_index: 0, block_span: 1 },
                SyncOperation::EndOfFile,
                SyncOperation::StartFile { algorithm: rsync, file_index: 2 },
                SyncOperation::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_same_name_wins_over_lower_index() {
        let tmp = tempfile::tempdir().unwrap();
        let shared = big(BLOCK_SIZE, 9);
        write(tmp.path(), "a.bin", &shared);
        write(tmp.path(), "b.bin", &shared);

        let sig = signature::sign(tmp.path()).unwrap();
        let patch = create_patch(&sig, tmp.path()).unwrap();

        assert!(patch.sync_ops.contains(&SyncOperation::BlockRange {
            file_index: 1,
            block_index: 0,
            block_span: 1
        }));
    }

    #[test]
    fn test_same_name_wins_over_continuing_other_file() {
        let old = tempfile::tempdir().unwrap();
        let new = tempfile::tempdir().unwrap();
        let x = big(BLOCK_SIZE, 4);
        let y = big(BLOCK_SIZE, 5);
        write(old.path(), "a", &[x.clone(), y.clone()].concat());
        write(old.path(), "b", &y);
        write(new.path(), "b", &[x, y].concat());

        let sig = signature::sign(old.path()).unwrap();
        let patch = create_patch(&sig, new.path()).unwrap();

        let rsync = SyncAlgorithm::Rsync;
        assert_eq!(
            patch.sync_ops,
            vec![
                SyncOperation::StartFile { algorithm: rsync, file_index: 0 },
                SyncOperation::BlockRange { file_index: 0, block_index: 0, block_span: 1 },
                SyncOperation::BlockRange { file_index: 1, block_index: 0, block_span: 1 },
                SyncOperation::EndOfFile,
            ]
        );
    }

    #[test]
    fn test_against_empty_signature_is_all_literal() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "hello.txt", b"Hello, World!\n");

        let patch = create_patch(&Signature::empty(), tmp.path()).unwrap();
        assert!(patch.target.files.is_empty());
        assert_eq!(
            patch.sync_ops[1],
            SyncOperation::Literal(b"Hello, World!\n".to_vec())
        );
    }

    #[tokio::test]
    async fn test_diff_returns_source_signature() {
        let old = tempfile::tempdir().unwrap();
        let new = tempfile::tempdir().unwrap();
        write(old.path(), "f.bin", &big(BLOCK_SIZE * 2, 3));
        write(new.path(), "f.bin", &big(BLOCK_SIZE * 2 + 10, 3));

        let target = signature::sign(old.path()).unwrap();
        let (patch, new_sig) = diff(target, new.path()).await.unwrap();

        assert_eq!(new_sig, signature::sign(new.path()).unwrap());
        assert_eq!(patch.source, new_sig.container);
        assert_eq!(patch.summary().copied_blocks, 2);
        assert_eq!(patch.summary().literal_bytes, 10);
    }
}
