// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Segment summary (log header) handling
//!
//! Every log (partial segment) starts with a summary block: a fixed header
//! followed by a variable-length area of per-file `finfo` records, each
//! trailed by its block-info entries. The header declares its own size so
//! that newer fields (`cno`) can be detected on older volumes.

use bitflags::bitflags;
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::*;

/// Segment summary magic number for validation
pub const SEGSUM_MAGIC: u32 = 0x1eaf;
/// Smallest declared header size ever written
pub const SEGSUM_MIN_BYTES: u16 = 56;
/// Declared header sizes of at least this carry the `cno` field
pub const SEGSUM_CNO_BYTES: u16 = 64;

bitflags! {
    /// Flags of a log
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SummaryFlags: u16 {
        /// First log of a logical segment
        const LOGBGN = 0x0001;
        /// Last log of a logical segment
        const LOGEND = 0x0002;
        /// Log payload contains a super root
        const SR = 0x0004;
        /// Log contains synchronized data only
        const SYNDT = 0x0008;
        /// Log was written by the garbage collector
        const GC = 0x0010;
    }
}

/// Fixed header of a log, stored at the log's first block
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
pub struct SegmentSummary {
    /// CRC32 over the whole log payload, excluding this field
    pub datasum: U32,
    /// CRC32 over the summary area, excluding `datasum`
    pub sumsum: U32,
    /// Magic number identifying a summary
    pub magic: U32,
    /// Declared size of this header in bytes
    pub bytes: U16,
    /// Log flags, see [`SummaryFlags`]
    pub flags: U16,
    /// Sequence number of the enclosing logical segment
    pub seq: U64,
    /// Creation time, epoch seconds
    pub create: U64,
    /// Start block of the next segment in the ring
    pub next: U64,
    /// Number of blocks in this log
    pub nblocks: U32,
    /// Number of finfo records in the summary area
    pub nfinfo: U32,
    /// Total size of the summary area in bytes, header included
    pub sumbytes: U32,
    /// Padding
    pub pad: U32,
    /// Checkpoint number, only present when `bytes` >= [`SEGSUM_CNO_BYTES`]
    pub cno: U64,
}

const _: () = assert!(core::mem::size_of::<SegmentSummary>() == SEGSUM_CNO_BYTES as usize);

impl SegmentSummary {
    /// Check if the magic number identifies a log summary
    pub fn check_magic(&self) -> bool {
        self.magic.get() == SEGSUM_MAGIC
    }

    /// Returns the log flags
    pub fn flags(&self) -> SummaryFlags {
        SummaryFlags::from_bits_truncate(self.flags.get())
    }

    /// Checkpoint number of the log, when the header is new enough to
    /// record one
    pub fn cno(&self) -> Option<u64> {
        (self.bytes.get() >= SEGSUM_CNO_BYTES).then(|| self.cno.get())
    }
}

/// Per-file record in the summary area
///
/// Followed by `ndatablk` data block-info entries, then
/// `nblocks - ndatablk` node block-info entries.
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
pub struct Finfo {
    /// Inode number of the file
    pub ino: U64,
    /// Checkpoint number the blocks belong to
    pub cno: U64,
    /// Total number of blocks the record covers
    pub nblocks: U32,
    /// Number of data blocks among them
    pub ndatablk: U32,
}

const _: () = assert!(core::mem::size_of::<Finfo>() == 24);

/// Block-info entry for a virtually addressed data block
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
pub struct BinfoV {
    /// Virtual block number
    pub vblocknr: U64,
    /// Block offset within the file
    pub blkoff: U64,
}

const _: () = assert!(core::mem::size_of::<BinfoV>() == 16);

/// Block-info entry for a DAT node block
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
pub struct BinfoDat {
    /// Block offset within the file
    pub blkoff: U64,
    /// B-tree level of the node
    pub level: u8,
    /// Padding
    pub pad: [u8; 7],
}

const _: () = assert!(core::mem::size_of::<BinfoDat>() == 16);
