//! Manifest of one directory snapshot: directories, files and symlinks.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, PathContext, Result};
use crate::patch_format::{ContainerMessage, DirMessage, FileMessage, SymlinkMessage};
use crate::util::{self, EntryKind};

const MODE_MASK: u32 = 0xFFFF;
const DIR_TAG: u32 = 0x10000;
const SYMLINK_TAG: u32 = 0x800_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub name: String,
    pub mode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub mode: u32,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symlink {
    pub name: String,
    /// Root-relative when the link resolves inside the tree, raw link text otherwise.
    pub target: String,
    pub mode: u32,
}

/// Ordered directory-tree manifest. Names are root-relative with forward
/// slashes, in scan order; a name appears at most once across all three lists
/// because patch operations refer to entries by position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Container {
    pub directories: Vec<Directory>,
    pub files: Vec<FileEntry>,
    pub symlinks: Vec<Symlink>,
}

impl Container {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scan a directory tree.
    pub fn scan(root: &Path) -> Result<Self> {
        let root = root.canonicalize().with_path(root)?;
        let mut container = Container::default();

        for entry in util::walk_directory(&root)? {
            match entry.kind {
                EntryKind::Dir => container.directories.push(Directory {
                    name: entry.relative_path,
                    mode: entry.mode,
                }),
                EntryKind::File => container.files.push(FileEntry {
                    name: entry.relative_path,
                    mode: entry.mode,
                    size: entry.size,
                }),
                EntryKind::Symlink { target } => {
                    let target = normalize_link_target(&root, &entry.relative_path, &target);
                    container.symlinks.push(Symlink {
                        name: entry.relative_path,
                        target,
                        mode: entry.mode,
                    });
                }
            }
        }

        tracing::debug!(
            root = %root.display(),
            dirs = container.directories.len(),
            files = container.files.len(),
            symlinks = container.symlinks.len(),
            "scanned container"
        );

        Ok(container)
    }

    /// Sum of all file sizes.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Index of each file by name.
    pub fn file_indices(&self) -> HashMap<&str, usize> {
        self.files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.as_str(), i))
            .collect()
    }

    pub fn to_message(&self) -> ContainerMessage {
        ContainerMessage {
            files: self
                .files
                .iter()
                .map(|f| FileMessage {
                    path: f.name.clone(),
                    mode: f.mode,
                    size: f.size as i64,
                    offset: 0,
                })
                .collect(),
            dirs: self
                .directories
                .iter()
                .map(|d| DirMessage {
                    path: d.name.clone(),
                    mode: d.mode | DIR_TAG,
                })
                .collect(),
            symlinks: self
                .symlinks
                .iter()
                .map(|s| SymlinkMessage {
                    path: s.name.clone(),
                    mode: s.mode | SYMLINK_TAG,
                    dest: s.target.clone(),
                })
                .collect(),
            size: self.total_size() as i64,
        }
    }

    /// Convert a decoded wire message, rejecting names that would leave the
    /// tree root and negative sizes.
    pub fn from_message(message: ContainerMessage) -> Result<Self> {
        let files = message
            .files
            .into_iter()
            .map(|f| {
                let size = u64::try_from(f.size).map_err(|_| {
                    Error::Decode(format!("file {} has negative size {}", f.path, f.size))
                })?;
                Ok(FileEntry {
                    name: f.path,
                    mode: f.mode,
                    size,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let container = Self {
            directories: message
                .dirs
                .into_iter()
                .map(|d| Directory {
                    name: d.path,
                    mode: d.mode & MODE_MASK,
                })
                .collect(),
            files,
            symlinks: message
                .symlinks
                .into_iter()
                .map(|s| Symlink {
                    name: s.path,
                    target: s.dest,
                    mode: s.mode & MODE_MASK,
                })
                .collect(),
        };

        if let Some(name) = container.escaping_name() {
            return Err(Error::Decode(format!("entry name {name:?} escapes the tree root")));
        }
        Ok(container)
    }

    /// Fail with `InvalidPatch` if any entry name would resolve outside a root.
    pub fn check_names(&self) -> Result<()> {
        match self.escaping_name() {
            Some(name) => Err(Error::InvalidPatch(format!(
                "entry name {name:?} escapes the tree root"
            ))),
            None => Ok(()),
        }
    }

    fn escaping_name(&self) -> Option<&str> {
        self.directories
            .iter()
            .map(|d| d.name.as_str())
            .chain(self.files.iter().map(|f| f.name.as_str()))
            .chain(self.symlinks.iter().map(|s| s.name.as_str()))
            .find(|name| !util::is_contained_name(name))
    }
}

/// Record a link target relative to the tree root when it points inside the tree.
pub fn normalize_link_target(root: &Path, link_name: &str, raw: &Path) -> String {
    let raw_str = raw.to_string_lossy().replace('\\', "/");

    if raw.is_absolute() {
        return match raw.strip_prefix(root) {
            Ok(inside) => inside.to_string_lossy().replace('\\', "/"),
            Err(_) => raw_str,
        };
    }

    util::lexical_join(util::parent_name(link_name), &raw_str).unwrap_or(raw_str)
}

/// Read the link at `root/link_name` and normalise its target like a scan would.
pub fn read_link_target(root: &Path, link_name: &str) -> Result<String> {
    let path = util::join_relative(root, link_name);
    let raw = std::fs::read_link(&path).with_path(&path)?;
    Ok(normalize_link_target(root, link_name, &raw))
}

/// Link text to write for a recorded symlink: relative for in-tree targets.
pub fn link_text(link: &Symlink) -> String {
    if Path::new(&link.target).is_absolute() {
        link.target.clone()
    } else {
        util::relative_from(util::parent_name(&link.name), &link.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch_format;
    use proptest::prelude::*;

    fn sample() -> Container {
        Container {
            directories: vec![Directory {
                name: "sample".into(),
                mode: 0o755,
            }],
            files: vec![
                FileEntry {
                    name: "hello.txt".into(),
                    mode: 0o644,
                    size: 14,
                },
                FileEntry {
                    name: "sample/image.png".into(),
                    mode: 0o600,
                    size: 65536,
                },
            ],
            symlinks: vec![Symlink {
                name: "image.png".into(),
                target: "sample/image.png".into(),
                mode: 0o777,
            }],
        }
    }

    #[test]
    fn test_message_roundtrip_strips_type_tags() {
        let container = sample();
        let message = container.to_message();
        assert_eq!(message.dirs[0].mode, 0o755 | DIR_TAG);
        assert_eq!(message.symlinks[0].mode, 0o777 | SYMLINK_TAG);
        assert_eq!(message.size, 14 + 65536);
        assert_eq!(Container::from_message(message).unwrap(), container);
    }

    #[test]
    fn test_from_message_rejects_escaping_names() {
        for bad in ["../victim.txt", "a/../../victim.txt", "/etc/passwd", ""] {
            let mut container = sample();
            container.files[0].name = bad.to_string();
            let err = Container::from_message(container.to_message()).unwrap_err();
            assert!(matches!(err, Error::Decode(_)), "{bad:?}: {err}");
            assert!(matches!(container.check_names(), Err(Error::InvalidPatch(_))));
        }

        let mut container = sample();
        container.symlinks[0].name = "../outside-link".into();
        assert!(Container::from_message(container.to_message()).is_err());
        assert!(sample().check_names().is_ok());
    }

    #[test]
    fn test_from_message_rejects_negative_size() {
        let mut message = sample().to_message();
        message.files[1].size = -1;
        assert!(matches!(Container::from_message(message), Err(Error::Decode(_))));
    }

    #[test]
    fn test_file_indices() {
        let container = sample();
        let idx = container.file_indices();
        assert_eq!(idx["sample/image.png"], 1);
        assert!(!idx.contains_key("image.png"));
    }

    #[test]
    fn test_normalize_link_target() {
        let root = Path::new("/data/tree");
        assert_eq!(
            normalize_link_target(root, "image.png", Path::new("sample/image.png")),
            "sample/image.png"
        );
        assert_eq!(
            normalize_link_target(root, "a/link", Path::new("../b/c")),
            "b/c"
        );
        assert_eq!(
            normalize_link_target(root, "link", Path::new("/data/tree/x/y")),
            "x/y"
        );
        assert_eq!(
            normalize_link_target(root, "link", Path::new("/etc/hosts")),
            "/etc/hosts"
        );
        assert_eq!(
            normalize_link_target(root, "link", Path::new("../outside")),
            "../outside"
        );
    }

    #[test]
    fn test_link_text_is_relative_to_link_dir() {
        let link = Symlink {
            name: "a/b/link".into(),
            target: "a/c".into(),
            mode: 0o777,
        };
        assert_eq!(link_text(&link), "../c");
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_reports_all_kinds() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir(root.join("sample")).unwrap();
        std::fs::write(root.join("hello.txt"), b"Hello, World!\n").unwrap();
        std::fs::write(root.join("sample/image.png"), vec![0u8; 65536]).unwrap();
        std::os::unix::fs::symlink("sample/image.png", root.join("image.png")).unwrap();

        let container = Container::scan(root).unwrap();
        assert_eq!(container.directories.len(), 1);
        assert_eq!(container.files.len(), 2);
        assert_eq!(container.symlinks.len(), 1);
        assert_eq!(container.symlinks[0].target, "sample/image.png");
        assert_eq!(container.files[0].name, "hello.txt");
        assert_eq!(container.files[0].size, 14);
    }

    fn arb_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_.]{0,7}(/[a-z][a-z0-9_.]{0,7}){0,3}"
    }

    fn arb_container() -> impl Strategy<Value = Container> {
        let dirs = prop::collection::vec((arb_name(), 0u32..0o7777), 0..6);
        let files = prop::collection::vec((arb_name(), 0u32..0o7777, 0u64..(1 << 40)), 0..6);
        let links = prop::collection::vec((arb_name(), arb_name(), 0u32..0o7777), 0..4);
        (dirs, files, links).prop_map(|(dirs, files, links)| Container {
            directories: dirs
                .into_iter()
                .map(|(name, mode)| Directory { name, mode })
                .collect(),
            files: files
                .into_iter()
                .map(|(name, mode, size)| FileEntry { name, mode, size })
                .collect(),
            symlinks: links
                .into_iter()
                .map(|(name, target, mode)| Symlink { name, target, mode })
                .collect(),
        })
    }

    proptest! {
        #[test]
        fn prop_container_survives_wire_encoding(container in arb_container()) {
            let bytes = patch_format::encode_message(&container.to_message()).unwrap();
            let message: ContainerMessage = patch_format::decode_message(&bytes, "container").unwrap();
            prop_assert_eq!(message.size as u64, container.total_size());
            prop_assert_eq!(Container::from_message(message).unwrap(), container);
        }
    }
}
