use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::binary_patch;
use crate::container::{self, Container};
use crate::error::{PathContext, Result};
use crate::patch::Patch;
use crate::util;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub dirs_created: usize,
    pub files_written: usize,
    pub symlinks_created: usize,
    pub files_deleted: usize,
    pub dirs_deleted: usize,
}

/// Staging root for one apply run. A temporary directory is removed on drop;
/// a caller-supplied one is left in place.
enum Staging {
    Temporary(tempfile::TempDir),
    Given(PathBuf),
}

impl Staging {
    fn prepare(staging: Option<&Path>, new_root: &Path) -> Result<Self> {
        if let Some(dir) = staging {
            std::fs::create_dir_all(dir).with_path(dir)?;
            return Ok(Staging::Given(dir.to_path_buf()));
        }

        // Next to the destination so the final move is a rename.
        let parent = match new_root.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            Some(_) => PathBuf::from("."),
            None => std::env::temp_dir(),
        };
        std::fs::create_dir_all(&parent).with_path(&parent)?;
        let dir = tempfile::Builder::new()
            .prefix(".treepatch-staging-")
            .tempdir_in(&parent)
            .with_path(&parent)?;
        Ok(Staging::Temporary(dir))
    }

    fn path(&self) -> &Path {
        match self {
            Staging::Temporary(dir) => dir.path(),
            Staging::Given(path) => path,
        }
    }
}

/// Rebuild the patch's source tree at `new_root` from the tree at `old_root`.
///
/// Content is written under a staging directory first (a fresh temporary
/// directory next to `new_root` unless `staging` is given). When `new_root` is
/// `old_root` the staged files are moved over the old tree and entries of the
/// old container that the source no longer has are removed; otherwise the
/// staged tree replaces `new_root` as a whole. Untracked files in an in-place
/// tree are left alone.
pub fn apply(
    patch: &Patch,
    old_root: &Path,
    new_root: &Path,
    staging: Option<&Path>,
) -> Result<ApplySummary> {
    patch.target.check_names()?;
    patch.source.check_names()?;

    let old = old_root.canonicalize().with_path(old_root)?;
    let in_place = new_root
        .canonicalize()
        .map(|new| new == old)
        .unwrap_or(false);

    let staging = Staging::prepare(staging, if in_place { old.as_path() } else { new_root })?;
    let stage = staging.path();

    prepare_staging(&patch.source, stage)?;
    let files_written =
        binary_patch::apply_operations(&patch.sync_ops, &patch.target, &patch.source, &old, stage)?;

    let mut summary = if in_place {
        merge_in_place(patch, stage, &old)?
    } else {
        replace_tree(&patch.source, stage, new_root)?
    };
    summary.files_written = files_written;

    let dest = if in_place { old.as_path() } else { new_root };
    set_modes(&patch.source, dest)?;

    tracing::info!(
        dest = %dest.display(),
        in_place,
        files = summary.files_written,
        deleted = summary.files_deleted,
        "applied patch"
    );

    Ok(summary)
}

/// Apply a patch over the tree it was made against.
pub fn apply_in_place(patch: &Patch, dir: &Path, staging: Option<&Path>) -> Result<ApplySummary> {
    apply(patch, dir, dir, staging)
}

/// Every source directory and file exists in staging before any content is written.
fn prepare_staging(source: &Container, stage: &Path) -> Result<()> {
    for dir in &source.directories {
        let path = util::join_relative(stage, &dir.name);
        std::fs::create_dir_all(&path).with_path(&path)?;
    }
    for file in &source.files {
        let path = util::join_relative(stage, &file.name);
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_path(&path)?;
    }
    Ok(())
}

fn replace_tree(source: &Container, stage: &Path, new_root: &Path) -> Result<ApplySummary> {
    util::remove_any(new_root)?;
    util::move_path(stage, new_root)?;

    let symlinks_created = create_symlinks(source, new_root)?;
    Ok(ApplySummary {
        dirs_created: source.directories.len(),
        symlinks_created,
        ..Default::default()
    })
}

fn merge_in_place(patch: &Patch, stage: &Path, root: &Path) -> Result<ApplySummary> {
    let source = &patch.source;
    let mut summary = ApplySummary::default();

    let kept: HashSet<&str> = source
        .files
        .iter()
        .map(|f| f.name.as_str())
        .chain(source.symlinks.iter().map(|s| s.name.as_str()))
        .collect();
    let kept_dirs: HashSet<&str> = source.directories.iter().map(|d| d.name.as_str()).collect();

    let stale = patch
        .target
        .files
        .iter()
        .map(|f| f.name.as_str())
        .chain(patch.target.symlinks.iter().map(|s| s.name.as_str()))
        .filter(|name| !kept.contains(name));
    for name in stale {
        let path = util::join_relative(root, name);
        if std::fs::symlink_metadata(&path).is_ok() {
            util::remove_any(&path)?;
            summary.files_deleted += 1;
        }
    }

    let mut old_dirs: Vec<String> = patch
        .target
        .directories
        .iter()
        .filter(|d| !kept_dirs.contains(d.name.as_str()))
        .map(|d| d.name.clone())
        .collect();
    util::sort_dirs_deepest_first(&mut old_dirs);
    for name in &old_dirs {
        let path = util::join_relative(root, name);
        // Directories still holding untracked files stay.
        if std::fs::remove_dir(&path).is_ok() {
            summary.dirs_deleted += 1;
        } else {
            tracing::debug!(dir = %path.display(), "left non-empty directory in place");
        }
    }

    for dir in &source.directories {
        let path = util::join_relative(root, &dir.name);
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => continue,
            Ok(_) => util::remove_any(&path)?,
            Err(_) => {}
        }
        std::fs::create_dir_all(&path).with_path(&path)?;
        summary.dirs_created += 1;
    }

    for file in &source.files {
        let staged = util::join_relative(stage, &file.name);
        let dest = util::join_relative(root, &file.name);
        if dest.is_dir() && !dest.is_symlink() {
            util::remove_any(&dest)?;
        }
        util::move_path(&staged, &dest)?;
    }

    summary.symlinks_created = create_symlinks(source, root)?;
    Ok(summary)
}

fn create_symlinks(source: &Container, root: &Path) -> Result<usize> {
    for link in &source.symlinks {
        let path = util::join_relative(root, &link.name);
        util::remove_any(&path)?;
        util::create_symlink(Path::new(&container::link_text(link)), &path)?;
    }
    Ok(source.symlinks.len())
}

/// Permission bits go on last so a read-only mode never blocks writing.
fn set_modes(source: &Container, root: &Path) -> Result<()> {
    for file in &source.files {
        util::set_mode(&util::join_relative(root, &file.name), file.mode)?;
    }

    let mut dirs: Vec<&container::Directory> = source.directories.iter().collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(util::depth(&d.name)));
    for dir in dirs {
        util::set_mode(&util::join_relative(root, &dir.name), dir.mode)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_hash::BLOCK_SIZE;
    use crate::create;
    use crate::signature;

    fn write(root: &Path, name: &str, data: &[u8]) {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, data).unwrap();
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31) ^ seed ^ (i >> 12) as u8).collect()
    }

    fn old_tree() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "keep.bin", &pattern(3 * BLOCK_SIZE + 5, 1));
        write(tmp.path(), "gone/old.txt", b"delete me");
        write(tmp.path(), "docs/readme.txt", b"v1");
        tmp
    }

    fn new_tree() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let mut keep = pattern(3 * BLOCK_SIZE + 5, 1);
        keep.splice(BLOCK_SIZE..BLOCK_SIZE, b"inserted".iter().copied());
        write(tmp.path(), "keep.bin", &keep);
        write(tmp.path(), "docs/readme.txt", b"v2, longer");
        write(tmp.path(), "fresh/new.bin", &pattern(1000, 7));
        tmp
    }

    fn assert_same_files(a: &Path, b: &Path) {
        let left = Container::scan(a).unwrap();
        let right = Container::scan(b).unwrap();
        assert_eq!(left, right);
        for file in &left.files {
            assert_eq!(
                std::fs::read(util::join_relative(a, &file.name)).unwrap(),
                std::fs::read(util::join_relative(b, &file.name)).unwrap(),
                "{}",
                file.name
            );
        }
    }

    #[test]
    fn test_apply_to_new_directory() {
        let old = old_tree();
        let new = new_tree();
        let patch = create::create_patch(&signature::sign(old.path()).unwrap(), new.path()).unwrap();

        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("rebuilt");
        let summary = apply(&patch, old.path(), &dest, None).unwrap();

        assert_eq!(summary.files_written, 3);
        assert_eq!(summary.files_deleted, 0);
        assert_same_files(&dest, new.path());
        // The staging directory was renamed or cleaned up.
        let leftovers: Vec<_> = std::fs::read_dir(out.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_apply_in_place_deletes_stale_entries() {
        let old = old_tree();
        let new = new_tree();
        let patch = create::create_patch(&signature::sign(old.path()).unwrap(), new.path()).unwrap();

        write(old.path(), "gone/save.dat", b"untracked");
        let summary = apply_in_place(&patch, old.path(), None).unwrap();

        assert_eq!(summary.files_deleted, 1);
        assert!(!old.path().join("gone/old.txt").exists());
        assert!(old.path().join("gone/save.dat").exists());
        assert_eq!(std::fs::read(old.path().join("docs/readme.txt")).unwrap(), b"v2, longer");
        assert_eq!(
            std::fs::read(old.path().join("keep.bin")).unwrap(),
            std::fs::read(new.path().join("keep.bin")).unwrap()
        );

        std::fs::remove_dir_all(old.path().join("gone")).unwrap();
        assert_same_files(old.path(), new.path());
    }

    #[test]
    fn test_apply_in_place_removes_emptied_directories() {
        let old = old_tree();
        let new = new_tree();
        let patch = create::create_patch(&signature::sign(old.path()).unwrap(), new.path()).unwrap();

        let summary = apply_in_place(&patch, old.path(), None).unwrap();
        assert_eq!(summary.dirs_deleted, 1);
        assert!(!old.path().join("gone").exists());
        assert_same_files(old.path(), new.path());
    }

    #[test]
    fn test_explicit_staging_is_used() {
        let old = old_tree();
        let new = new_tree();
        let patch = create::create_patch(&signature::sign(old.path()).unwrap(), new.path()).unwrap();

        let scratch = tempfile::tempdir().unwrap();
        let staging = scratch.path().join("stage");
        apply_in_place(&patch, old.path(), Some(&staging)).unwrap();

        assert!(staging.join("fresh").is_dir());
        assert!(!staging.join("fresh/new.bin").exists());
        assert_same_files(old.path(), new.path());
    }

    #[test]
    fn test_escaping_names_are_rejected_before_touching_disk() {
        use crate::compression::CompressionSettings;
        use crate::container::FileEntry;
        use crate::error::Error;
        use crate::patch::{SyncAlgorithm, SyncOperation};

        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("tree");
        write(&root, "inside.txt", b"inside");
        write(outer.path(), "victim.txt", b"must survive");

        let escaping = Container {
            files: vec![FileEntry {
                name: "../victim.txt".into(),
                mode: 0o644,
                size: 12,
            }],
            ..Default::default()
        };
        let stale_target = Patch {
            compression: CompressionSettings::NONE,
            target: escaping.clone(),
            source: Container::default(),
            sync_ops: Vec::new(),
        };
        let err = apply_in_place(&stale_target, &root, None).unwrap_err();
        assert!(matches!(err, Error::InvalidPatch(_)), "{err}");

        let written_source = Patch {
            compression: CompressionSettings::NONE,
            target: Container::default(),
            source: escaping,
            sync_ops: vec![
                SyncOperation::StartFile {
                    algorithm: SyncAlgorithm::Rsync,
                    file_index: 0,
                },
                SyncOperation::Literal(b"overwritten!".to_vec()),
                SyncOperation::EndOfFile,
            ],
        };
        let err = apply_in_place(&written_source, &root, None).unwrap_err();
        assert!(matches!(err, Error::InvalidPatch(_)), "{err}");

        // The same patch never gets this far from a file: decoding refuses it.
        let bytes = stale_target.encode().unwrap();
        assert!(matches!(Patch::decode(&bytes), Err(Error::Decode(_))));

        assert_eq!(std::fs::read(outer.path().join("victim.txt")).unwrap(), b"must survive");
        assert!(root.join("inside.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_and_modes_are_restored() {
        use std::os::unix::fs::PermissionsExt;

        let old = tempfile::tempdir().unwrap();
        let new = tempfile::tempdir().unwrap();
        write(new.path(), "sample/image.png", &pattern(BLOCK_SIZE, 3));
        write(new.path(), "run.sh", b"#!/bin/sh\n");
        std::fs::set_permissions(
            new.path().join("run.sh"),
            std::fs::Permissions::from_mode(0o755),
        )
        .unwrap();
        std::os::unix::fs::symlink("sample/image.png", new.path().join("image.png")).unwrap();
        std::os::unix::fs::symlink("../run.sh", new.path().join("sample/run")).unwrap();

        let patch = create::create_patch(&signature::sign(old.path()).unwrap(), new.path()).unwrap();
        let dest = old.path().join("out");
        let summary = apply(&patch, old.path(), &dest, None).unwrap();

        assert_eq!(summary.symlinks_created, 2);
        assert_eq!(
            std::fs::read_link(dest.join("image.png")).unwrap(),
            Path::new("sample/image.png")
        );
        assert_eq!(
            std::fs::read_link(dest.join("sample/run")).unwrap(),
            Path::new("../run.sh")
        );
        let mode = std::fs::metadata(dest.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
