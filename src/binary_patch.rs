use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::block_hash::BLOCK_SIZE;
use crate::container::Container;
use crate::error::{Error, PathContext, Result};
use crate::patch::{SyncAlgorithm, SyncOperation};
use crate::util::{self, FileBytes};

/// The single output handle of an apply run.
enum OutputState {
    Idle,
    Open {
        file_index: usize,
        path: PathBuf,
        writer: BufWriter<File>,
        written: u64,
    },
}

/// Replays sync operations into staged files.
///
/// Block ranges are read from the old tree, literals come from the patch.
/// Exactly one output file is open between a `StartFile` and its `EndOfFile`.
pub struct PatchWriter<'a> {
    target: &'a Container,
    source: &'a Container,
    old_root: &'a Path,
    staging_root: &'a Path,
    state: OutputState,
    /// Last old-tree file read by a block range; consecutive ranges usually share it.
    cached: Option<(usize, FileBytes)>,
    files_written: usize,
}

impl<'a> PatchWriter<'a> {
    pub fn new(
        target: &'a Container,
        source: &'a Container,
        old_root: &'a Path,
        staging_root: &'a Path,
    ) -> Self {
        Self {
            target,
            source,
            old_root,
            staging_root,
            state: OutputState::Idle,
            cached: None,
            files_written: 0,
        }
    }

    pub fn apply(&mut self, op: &SyncOperation) -> Result<()> {
        match op {
            SyncOperation::StartFile {
                algorithm,
                file_index,
            } => self.start_file(*algorithm, *file_index),
            SyncOperation::Literal(data) => self.write("literal", data),
            SyncOperation::BlockRange {
                file_index,
                block_index,
                block_span,
            } => self.copy_blocks(*file_index, *block_index, *block_span),
            SyncOperation::EndOfFile => self.end_file(),
        }
    }

    /// Check the stream ended cleanly and return how many files were written.
    pub fn finish(self) -> Result<usize> {
        match self.state {
            OutputState::Idle => Ok(self.files_written),
            OutputState::Open { path, .. } => Err(Error::OutOfSequence(format!(
                "operations ended while {} was still open",
                path.display()
            ))),
        }
    }

    fn start_file(&mut self, algorithm: SyncAlgorithm, file_index: usize) -> Result<()> {
        if algorithm == SyncAlgorithm::Bsdiff {
            return Err(Error::Unimplemented("bsdiff"));
        }
        if let OutputState::Open { path, .. } = &self.state {
            return Err(Error::OutOfSequence(format!(
                "start of file {file_index} before end of {}",
                path.display()
            )));
        }
        let file = self.source.files.get(file_index).ok_or_else(|| {
            Error::InvalidPatch(format!(
                "source file index {file_index} out of range ({} files)",
                self.source.files.len()
            ))
        })?;

        if !util::is_contained_name(&file.name) {
            return Err(Error::InvalidPatch(format!(
                "source file name {:?} escapes the tree root",
                file.name
            )));
        }

        let path = util::join_relative(self.staging_root, &file.name);
        let handle = File::create(&path).with_path(&path)?;
        self.state = OutputState::Open {
            file_index,
            path,
            writer: BufWriter::new(handle),
            written: 0,
        };
        Ok(())
    }

    fn write(&mut self, what: &str, data: &[u8]) -> Result<()> {
        match &mut self.state {
            OutputState::Idle => Err(Error::OutOfSequence(format!(
                "{what} with no file open"
            ))),
            OutputState::Open {
                path,
                writer,
                written,
                ..
            } => {
                writer.write_all(data).with_path(path)?;
                *written += data.len() as u64;
                Ok(())
            }
        }
    }

    fn copy_blocks(&mut self, file_index: usize, block_index: usize, block_span: usize) -> Result<()> {
        if matches!(self.state, OutputState::Idle) {
            return Err(Error::OutOfSequence("block range with no file open".to_string()));
        }
        let target = self.target;
        let file = target.files.get(file_index).ok_or_else(|| {
            Error::InvalidPatch(format!(
                "target file index {file_index} out of range ({} files)",
                target.files.len()
            ))
        })?;

        if !util::is_contained_name(&file.name) {
            return Err(Error::InvalidPatch(format!(
                "target file name {:?} escapes the tree root",
                file.name
            )));
        }

        let span = block_index
            .checked_add(block_span)
            .and_then(|end_block| {
                let start = (block_index as u64).checked_mul(BLOCK_SIZE as u64)?;
                let end = (end_block as u64).checked_mul(BLOCK_SIZE as u64)?;
                Some((start, end.min(file.size)))
            });
        let (start, end) = match span {
            Some((start, end)) if block_span > 0 && start < end => (start, end),
            _ => {
                return Err(Error::InvalidPatch(format!(
                    "block range {block_index}+{block_span} does not fit {} ({} bytes)",
                    file.name, file.size
                )))
            }
        };

        let data = match self.cached.take() {
            Some((cached_index, data)) if cached_index == file_index => data,
            _ => util::load_file(&util::join_relative(self.old_root, &file.name))?,
        };
        if end > data.len() as u64 {
            return Err(Error::InvalidPatch(format!(
                "{} is {} bytes on disk, block range needs {end}",
                file.name,
                data.len()
            )));
        }

        let result = self.write("block range", &data[start as usize..end as usize]);
        self.cached = Some((file_index, data));
        result
    }

    fn end_file(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, OutputState::Idle);
        let OutputState::Open {
            file_index,
            path,
            mut writer,
            written,
        } = state
        else {
            return Err(Error::OutOfSequence("end of file with no file open".to_string()));
        };

        writer.flush().with_path(&path)?;
        drop(writer);

        let expected = self.source.files[file_index].size;
        if written != expected {
            return Err(Error::InvalidPatch(format!(
                "{} rebuilt to {written} bytes, expected {expected}",
                path.display()
            )));
        }

        tracing::debug!(file = %path.display(), bytes = written, "wrote file");
        self.files_written += 1;
        Ok(())
    }
}

/// Replay a whole operation stream, returning the number of files written.
pub fn apply_operations(
    ops: &[SyncOperation],
    target: &Container,
    source: &Container,
    old_root: &Path,
    staging_root: &Path,
) -> Result<usize> {
    let mut writer = PatchWriter::new(target, source, old_root, staging_root);
    for op in ops {
        writer.apply(op)?;
    }
    writer.finish()
}
