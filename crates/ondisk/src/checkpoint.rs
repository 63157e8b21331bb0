// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Checkpoint file entries
//!
//! The checkpoint file packs fixed-size entries into its blocks; the entry
//! size is declared by the superblock. Block 0 starts with a header that
//! occupies the first few entry slots. Only the leading fields matter for
//! recovery, so the structures here cover a prefix of the on-disk records.

use bitflags::bitflags;
use zerocopy::little_endian::{U32, U64};
use zerocopy::*;

bitflags! {
    /// Flags of a checkpoint entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CheckpointFlags: u32 {
        /// Checkpoint is pinned as a snapshot
        const SNAPSHOT = 1 << 0;
        /// Entry slot does not hold a live checkpoint
        const INVALID = 1 << 1;
        /// Checkpoint carries a sketch file
        const SKETCH = 1 << 2;
        /// Checkpoint was created by a minor sync
        const MINOR = 1 << 3;
    }
}

/// Leading fields of a checkpoint file entry
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
pub struct Checkpoint {
    /// Entry flags, see [`CheckpointFlags`]
    pub flags: U32,
    /// Number of checkpoints batched in this entry's block group
    pub checkpoints_count: U32,
    /// Snapshot list linkage
    pub snapshot_list: [U64; 2],
    /// Checkpoint number
    pub cno: U64,
}

const _: () = assert!(core::mem::size_of::<Checkpoint>() == 32);

impl Checkpoint {
    /// Returns the entry flags
    pub fn flags(&self) -> CheckpointFlags {
        CheckpointFlags::from_bits_truncate(self.flags.get())
    }

    /// Whether the slot holds no live checkpoint
    pub fn is_invalid(&self) -> bool {
        self.flags().contains(CheckpointFlags::INVALID)
    }
}

/// Header at the start of the checkpoint file
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
pub struct CpfileHeader {
    /// Number of live checkpoints
    pub ncheckpoints: U64,
    /// Number of snapshots
    pub nsnapshots: U64,
    /// Snapshot list head
    pub snapshot_list: [U64; 2],
}

const _: () = assert!(core::mem::size_of::<CpfileHeader>() == 32);
