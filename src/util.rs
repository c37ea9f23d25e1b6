use memmap2::Mmap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{PathContext, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink { target: PathBuf },
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub relative_path: String,
    pub kind: EntryKind,
    pub full_path: PathBuf,
    /// File size in bytes (0 for directories and symlinks).
    pub size: u64,
    /// Permission bits, without file type.
    pub mode: u32,
}

/// Walk a directory tree and collect every entry with its root-relative path.
///
/// Pre-order: a directory is listed before its contents. Siblings are sorted
/// by name so repeated scans of an unchanged tree agree. Symlinks are
/// reported, never followed. Paths use forward slashes.
pub fn walk_directory(root: &Path) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.with_path(root)?;

        let full_path = entry.path().to_path_buf();
        let relative_str = relative_name(root, &full_path)?;

        let meta = entry.metadata().with_path(&full_path)?;
        let file_type = entry.file_type();

        let kind = if file_type.is_symlink() {
            let target = std::fs::read_link(&full_path).with_path(&full_path)?;
            EntryKind::Symlink { target }
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            tracing::warn!(path = %full_path.display(), "skipping special file");
            continue;
        };

        let size = if kind == EntryKind::File { meta.len() } else { 0 };

        entries.push(DirEntry {
            relative_path: relative_str,
            mode: permission_bits(&meta, &kind),
            kind,
            full_path,
            size,
        });
    }

    Ok(entries)
}

fn relative_name(root: &Path, full_path: &Path) -> Result<String> {
    let relative = full_path.strip_prefix(root).map_err(|_| {
        crate::error::Error::io(
            full_path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path escapes scan root"),
        )
    })?;

    Ok(relative.to_string_lossy().replace('\\', "/"))
}

#[cfg(unix)]
pub fn permission_bits(meta: &std::fs::Metadata, _kind: &EntryKind) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub fn permission_bits(meta: &std::fs::Metadata, kind: &EntryKind) -> u32 {
    match kind {
        EntryKind::Dir => 0o755,
        EntryKind::Symlink { .. } => 0o777,
        EntryKind::File if meta.permissions().readonly() => 0o444,
        EntryKind::File => 0o644,
    }
}

/// Apply permission bits to a path. No-op where POSIX modes do not exist.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777)).with_path(path)
}

#[cfg(not(unix))]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    let mut perms = std::fs::metadata(path).with_path(path)?.permissions();
    perms.set_readonly(mode & 0o222 == 0);
    std::fs::set_permissions(path, perms).with_path(path)
}

#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).with_path(link)
}

#[cfg(windows)]
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::windows::fs::symlink_file(target, link).with_path(link)
}

/// Whole-file contents, memory-mapped when non-empty.
pub enum FileBytes {
    Empty,
    Mapped(Mmap),
}

impl Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileBytes::Empty => &[],
            FileBytes::Mapped(map) => map,
        }
    }
}

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the mapping is live.
pub fn load_file(path: &Path) -> Result<FileBytes> {
    let file = std::fs::File::open(path).with_path(path)?;
    let len = file.metadata().with_path(path)?.len();
    if len == 0 {
        return Ok(FileBytes::Empty);
    }
    // SAFETY: We only read from this mapping; no concurrent modification of these files.
    let map = unsafe { Mmap::map(&file) }.with_path(path)?;
    Ok(FileBytes::Mapped(map))
}

/// Join a forward-slash relative name onto a root.
pub fn join_relative(root: &Path, name: &str) -> PathBuf {
    name.split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// Whether joining `name` onto a root stays inside that root: not empty, no
/// root or drive prefix and no `..` component.
pub fn is_contained_name(name: &str) -> bool {
    use std::path::Component;

    !name.is_empty()
        && !name.starts_with('/')
        && name.split('/').all(|part| part != "..")
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Parent of a forward-slash relative name, `""` at the top level.
pub fn parent_name(name: &str) -> &str {
    name.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// Resolve `rel` against the directory `base` lexically.
/// Returns `None` if the result would climb above the root.
pub fn lexical_join(base: &str, rel: &str) -> Option<String> {
    let mut parts: Vec<&str> = base.split('/').filter(|p| !p.is_empty()).collect();
    for part in rel.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

/// Relative path that reaches root-relative `target` from the directory `from`.
pub fn relative_from(from: &str, target: &str) -> String {
    let from_parts: Vec<&str> = from.split('/').filter(|p| !p.is_empty()).collect();
    let target_parts: Vec<&str> = target.split('/').filter(|p| !p.is_empty()).collect();

    let common = from_parts
        .iter()
        .zip(&target_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out: Vec<&str> = vec![".."; from_parts.len() - common];
    out.extend_from_slice(&target_parts[common..]);

    if out.is_empty() {
        ".".to_string()
    } else {
        out.join("/")
    }
}

/// Depth of a forward-slash relative name (`"a"` is 1, `"a/b"` is 2).
pub fn depth(name: &str) -> usize {
    name.split('/').filter(|p| !p.is_empty()).count()
}

/// Sort directory names so parents come before children.
pub fn sort_dirs_parent_first(dirs: &mut [String]) {
    dirs.sort_by(|a, b| depth(a).cmp(&depth(b)).then_with(|| a.cmp(b)));
}

/// Sort directory names so children come before parents (for deletion).
pub fn sort_dirs_deepest_first(dirs: &mut [String]) {
    sort_dirs_parent_first(dirs);
    dirs.reverse();
}

/// Remove whatever is at `path` (file, symlink or directory tree). Missing is fine.
pub fn remove_any(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(crate::error::Error::io(path, e)),
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(path).with_path(path)
    } else {
        std::fs::remove_file(path).with_path(path)
    }
}

/// Recursively copy a directory tree. Symlinks are not expected in `src`.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).with_path(dst)?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.with_path(src)?;
        let rel = relative_name(src, entry.path())?;
        let to = join_relative(dst, &rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&to).with_path(&to)?;
        } else {
            std::fs::copy(entry.path(), &to).with_path(&to)?;
        }
    }
    Ok(())
}

/// Move `from` to `to`, falling back to copy-then-delete when rename fails
/// (for example across filesystems).
pub fn move_path(from: &Path, to: &Path) -> Result<()> {
    let err = match std::fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    tracing::warn!(
        from = %from.display(),
        to = %to.display(),
        error = %err,
        "rename failed, copying instead"
    );

    if from.is_dir() {
        copy_dir_recursive(from, to)?;
        std::fs::remove_dir_all(from).with_path(from)
    } else {
        std::fs::copy(from, to).with_path(to)?;
        std::fs::remove_file(from).with_path(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_join() {
        assert_eq!(lexical_join("", "a/b").as_deref(), Some("a/b"));
        assert_eq!(lexical_join("a/b", "../c").as_deref(), Some("a/c"));
        assert_eq!(lexical_join("a", "./x/../y").as_deref(), Some("a/y"));
        assert_eq!(lexical_join("", "../outside"), None);
    }

    #[test]
    fn test_relative_from() {
        assert_eq!(relative_from("", "sample/image.png"), "sample/image.png");
        assert_eq!(relative_from("a/b", "a/c/f"), "../c/f");
        assert_eq!(relative_from("a", "f"), "../f");
        assert_eq!(relative_from("a", "a"), ".");
    }

    #[test]
    fn test_relative_roundtrips_through_lexical_join() {
        for (from, target) in [("", "x"), ("a/b/c", "a/z"), ("d", "d/e/f"), ("q/r", "s")] {
            let rel = relative_from(from, target);
            assert_eq!(lexical_join(from, &rel).as_deref(), Some(target));
        }
    }

    #[test]
    fn test_is_contained_name() {
        assert!(is_contained_name("a.txt"));
        assert!(is_contained_name("a/b"));
        assert!(is_contained_name("dir/./file..bin"));
        assert!(!is_contained_name(""));
        assert!(!is_contained_name("../victim.txt"));
        assert!(!is_contained_name("a/../../b"));
        assert!(!is_contained_name("/etc/passwd"));
    }

    #[test]
    fn test_parent_name_and_depth() {
        assert_eq!(parent_name("a/b/c.txt"), "a/b");
        assert_eq!(parent_name("c.txt"), "");
        assert_eq!(depth("a/b/c"), 3);
        assert_eq!(depth(""), 0);
    }

    #[test]
    fn test_sort_dirs() {
        let mut dirs = vec!["a/b".to_string(), "a".to_string(), "a/b/c".to_string(), "z".to_string()];
        sort_dirs_parent_first(&mut dirs);
        assert_eq!(dirs, vec!["a", "z", "a/b", "a/b/c"]);
        sort_dirs_deepest_first(&mut dirs);
        assert_eq!(dirs[0], "a/b/c");
        assert_eq!(dirs.last().map(String::as_str), Some("a"));
    }

    #[test]
    fn test_walk_directory_preorder_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("b/inner")).unwrap();
        std::fs::write(tmp.path().join("b/inner/x.bin"), b"xyz").unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hello").unwrap();

        let entries = walk_directory(tmp.path()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b", "b/inner", "b/inner/x.bin"]);
        assert_eq!(entries[0].size, 5);
        assert_eq!(entries[1].kind, EntryKind::Dir);
        assert_eq!(entries[1].size, 0);
    }

    #[test]
    fn test_move_path_and_remove_any() {
        let tmp = tempfile::tempdir().unwrap();
        let from = tmp.path().join("from");
        std::fs::create_dir_all(from.join("sub")).unwrap();
        std::fs::write(from.join("sub/f"), b"moved").unwrap();

        let to = tmp.path().join("to");
        move_path(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(to.join("sub/f")).unwrap(), b"moved");

        remove_any(&to).unwrap();
        assert!(!to.exists());
        remove_any(&to).unwrap();
    }

    #[test]
    fn test_load_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        assert!(load_file(&path).unwrap().is_empty());
        std::fs::write(&path, b"data").unwrap();
        assert_eq!(&*load_file(&path).unwrap(), b"data");
    }
}
