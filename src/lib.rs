//! Content-addressed directory diffing.
//!
//! [`sign`] a tree into a [`Signature`] of per-block hashes, [`diff`] another
//! tree against it into a [`Patch`] of copy and literal operations, then
//! [`apply`] the patch to the old tree and [`verify`] the result.

pub mod apply;
pub mod binary_diff;
pub mod binary_patch;
pub mod block_hash;
pub mod block_library;
pub mod compression;
pub mod container;
pub mod create;
pub mod error;
pub mod patch;
pub mod patch_format;
pub mod rolling_hash;
pub mod signature;
pub mod util;
pub mod varint;
pub mod verify;

pub use apply::{apply, apply_in_place, ApplySummary};
pub use compression::{CompressionAlgorithm, CompressionSettings};
pub use container::Container;
pub use create::{create_patch, diff};
pub use error::{Error, Result};
pub use patch::{Patch, PatchSummary, SyncAlgorithm, SyncOperation};
pub use signature::{load_or_make_signature, sign, Signature};
pub use verify::{verify, VerificationResult, Wound};
