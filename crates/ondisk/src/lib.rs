// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! On-disk format of NILFS2 volumes
//!
//! This crate provides the fixed little-endian structures found on a NILFS2
//! volume together with the derived geometry and the seeded CRC32 used to
//! checksum them:
//! - Superblock (two fixed-offset copies)
//! - Segment summary (log header) and its trailing finfo/binfo records
//! - Checkpoint file entries
//!
//! Every multi-byte field is an explicit [`zerocopy`] little-endian type;
//! nothing here depends on host byte order or native struct layout.

use thiserror::Error;

pub mod checkpoint;
pub mod crc32;
pub mod geometry;
pub mod summary;
pub mod superblock;

pub use checkpoint::{Checkpoint, CheckpointFlags, CpfileHeader};
pub use crc32::crc32_le;
pub use geometry::{Geometry, GeometryError};
pub use summary::{BinfoDat, BinfoV, Finfo, SegmentSummary, SummaryFlags};
pub use superblock::{SbState, SuperBlock};

/// Inode number of the DAT (disk address translation) file
pub const DAT_INO: u64 = 1;
/// Inode number of the root directory
pub const ROOT_INO: u64 = 2;
/// Inode number of the checkpoint file
pub const CPFILE_INO: u64 = 3;
/// Inode number of the segment usage file
pub const SUFILE_INO: u64 = 4;
/// Inode number of the inode file
pub const IFILE_INO: u64 = 5;

/// Whether block-info records of this inode carry real block numbers
///
/// The DAT file is the translation table itself, so its summary records
/// address blocks directly; every other file goes through virtual block
/// numbers.
pub fn ino_uses_real_blocknr(ino: u64) -> bool {
    ino == DAT_INO
}

/// Errors that can occur when decoding strings from volume metadata
#[derive(Debug, Error)]
pub enum UnicodeError {
    /// Error decoding UTF-8 string data
    #[error(transparent)]
    InvalidUtf8(#[from] std::str::Utf8Error),
}
