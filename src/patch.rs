use std::path::Path;

use crate::compression::CompressionSettings;
use crate::container::Container;
use crate::error::{Error, PathContext, Result};
use crate::patch_format::{
    self, ContainerMessage, Magic, SyncHeaderMessage, SyncOpMessage, SYNC_HEADER_BSDIFF,
    SYNC_HEADER_RSYNC, SYNC_OP_BLOCK_RANGE, SYNC_OP_DATA, SYNC_OP_END_OF_FILE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAlgorithm {
    Rsync,
    /// Declared by the format; applying it fails as unimplemented.
    Bsdiff,
}

/// One step of rebuilding a source file.
///
/// Each file's run is `StartFile`, then `BlockRange`/`Literal` in output
/// order, then `EndOfFile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOperation {
    StartFile {
        algorithm: SyncAlgorithm,
        file_index: usize,
    },
    /// Copy `block_span` blocks starting at `block_index` from target file `file_index`.
    BlockRange {
        file_index: usize,
        block_index: usize,
        block_span: usize,
    },
    Literal(Vec<u8>),
    EndOfFile,
}

impl SyncOperation {
    fn to_message(&self) -> Result<Vec<u8>> {
        match self {
            SyncOperation::StartFile {
                algorithm,
                file_index,
            } => patch_format::encode_message(&SyncHeaderMessage {
                kind: match algorithm {
                    SyncAlgorithm::Rsync => SYNC_HEADER_RSYNC,
                    SyncAlgorithm::Bsdiff => SYNC_HEADER_BSDIFF,
                },
                file_index: *file_index as i64,
            }),
            SyncOperation::BlockRange {
                file_index,
                block_index,
                block_span,
            } => patch_format::encode_message(&SyncOpMessage {
                kind: SYNC_OP_BLOCK_RANGE,
                file_index: *file_index as i64,
                block_index: *block_index as i64,
                block_span: *block_span as i64,
                data: Vec::new(),
            }),
            SyncOperation::Literal(data) => patch_format::encode_message(&SyncOpMessage {
                kind: SYNC_OP_DATA,
                file_index: 0,
                block_index: 0,
                block_span: 0,
                data: data.clone(),
            }),
            SyncOperation::EndOfFile => patch_format::encode_message(&SyncOpMessage {
                kind: SYNC_OP_END_OF_FILE,
                file_index: 0,
                block_index: 0,
                block_span: 0,
                data: Vec::new(),
            }),
        }
    }
}

fn to_index(value: i64, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::Decode(format!("negative {what}: {value}")))
}

fn decode_start_file(bytes: &[u8]) -> Result<SyncOperation> {
    let header: SyncHeaderMessage = patch_format::decode_message(bytes, "sync header")?;
    let algorithm = match header.kind {
        SYNC_HEADER_RSYNC => SyncAlgorithm::Rsync,
        SYNC_HEADER_BSDIFF => SyncAlgorithm::Bsdiff,
        other => {
            return Err(Error::Decode(format!(
                "unrecognized sync algorithm {other}"
            )))
        }
    };
    Ok(SyncOperation::StartFile {
        algorithm,
        file_index: to_index(header.file_index, "file index")?,
    })
}

fn decode_op(bytes: &[u8]) -> Result<SyncOperation> {
    let op: SyncOpMessage = patch_format::decode_message(bytes, "sync op")?;
    match op.kind {
        SYNC_OP_BLOCK_RANGE => Ok(SyncOperation::BlockRange {
            file_index: to_index(op.file_index, "file index")?,
            block_index: to_index(op.block_index, "block index")?,
            block_span: to_index(op.block_span, "block span")?,
        }),
        SYNC_OP_DATA => Ok(SyncOperation::Literal(op.data)),
        SYNC_OP_END_OF_FILE => Ok(SyncOperation::EndOfFile),
        other => Err(Error::Decode(format!(
            "unrecognized sync operation {other}"
        ))),
    }
}

/// Counts describing a patch's operation stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchSummary {
    pub files: usize,
    pub block_ranges: usize,
    pub copied_blocks: usize,
    pub literals: usize,
    pub literal_bytes: usize,
}

/// Everything needed to rebuild `source` (new) from `target` (old).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub compression: CompressionSettings,
    pub target: Container,
    pub source: Container,
    pub sync_ops: Vec<SyncOperation>,
}

impl Patch {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut messages = Vec::with_capacity(2 + self.sync_ops.len());
        messages.push(patch_format::encode_message(&self.target.to_message())?);
        messages.push(patch_format::encode_message(&self.source.to_message())?);
        for op in &self.sync_ops {
            messages.push(op.to_message()?);
        }
        patch_format::encode_file(Magic::Patch, self.compression, &messages)
    }

    /// Decode a patch file.
    ///
    /// After the two containers, messages alternate between a start-file
    /// header and a run of ops closed by end-of-file.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (compression, messages) = patch_format::decode_file(data, Magic::Patch)?;
        let mut messages = messages.into_iter();

        let target_bytes = messages.next().ok_or(Error::EmptyBody("patch"))?;
        let source_bytes = messages
            .next()
            .ok_or_else(|| Error::Decode("patch is missing its source container".to_string()))?;
        let target: ContainerMessage = patch_format::decode_message(&target_bytes, "container")?;
        let source: ContainerMessage = patch_format::decode_message(&source_bytes, "container")?;

        let mut sync_ops = Vec::with_capacity(messages.len());
        let mut expect_header = true;
        for bytes in messages {
            if expect_header {
                sync_ops.push(decode_start_file(&bytes)?);
                expect_header = false;
            } else {
                let op = decode_op(&bytes)?;
                expect_header = op == SyncOperation::EndOfFile;
                sync_ops.push(op);
            }
        }

        Ok(Self {
            compression,
            target: Container::from_message(target)?,
            source: Container::from_message(source)?,
            sync_ops,
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

    pub fn summary(&self) -> PatchSummary {
        let mut summary = PatchSummary::default();
        for op in &self.sync_ops {
            match op {
                SyncOperation::StartFile { .. } => summary.files += 1,
                SyncOperation::BlockRange { block_span, .. } => {
                    summary.block_ranges += 1;
                    summary.copied_blocks += block_span;
                }
                SyncOperation::Literal(data) => {
                    summary.literals += 1;
                    summary.literal_bytes += data.len();
                }
                SyncOperation::EndOfFile => {}
            }
        }
        summary
    }
}
