// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! NILFS2 superblock handling
//!
//! Two copies of the superblock live at fixed byte offsets: the primary at
//! byte 1024, the secondary near the end of the device. Each is a 1024-byte
//! slot; the `bytes` field declares how much of the slot the CRC covers.
//! The superblock carries the volume geometry and the pointer to the last
//! written log (`last_pseg`/`last_seq`/`last_cno`) that mounting resumes
//! from.

use bitflags::bitflags;
use uuid::Uuid;
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::*;

use crate::UnicodeError;

/// Superblock magic number for validation
pub const MAGIC: u16 = 0x3434;
/// Byte offset of the primary superblock
pub const SB1_OFFSET_BYTES: u64 = 1024;
/// Size of one superblock slot in bytes, and the upper bound on `bytes`
pub const MAX_SB_BYTES: usize = 1024;
/// Length of the volume name field
pub const VOLUME_NAME_LEN: usize = 80;

/// Byte offset of the secondary superblock for a device of `devsize` bytes
pub fn sb2_offset_bytes(devsize: u64) -> u64 {
    ((devsize >> 12) - 1) << 12
}

bitflags! {
    /// Mount state bits of the `state` field
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SbState: u16 {
        /// Volume was unmounted cleanly; clear while changes may be pending
        const VALID_FS = 0x0001;
        /// Errors were detected on the volume
        const ERROR_FS = 0x0002;
        /// A resize operation was interrupted
        const RESIZE_FS = 0x0004;
    }
}

/// Represents the NILFS2 superblock structure that exists on disk
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
pub struct SuperBlock {
    /// Major revision of the on-disk format
    pub rev_level: U32,
    /// Minor revision of the on-disk format
    pub minor_rev_level: U16,
    /// Magic number identifying a NILFS2 volume
    pub magic: U16,
    /// Number of bytes covered by the checksum, at most [`MAX_SB_BYTES`]
    pub bytes: U16,
    /// Superblock flags
    pub flags: U16,
    /// Seed for all CRC32 checksums on this volume
    pub crc_seed: U32,
    /// CRC32 over `bytes` bytes of this structure with this field zeroed
    pub sum: U32,
    /// Block size is `1 << (log_block_size + 10)` bytes
    pub log_block_size: U32,
    /// Number of segments on the volume
    pub nsegments: U64,
    /// Device size in bytes recorded at mkfs time
    pub dev_size: U64,
    /// First block available for segment 0
    pub first_data_block: U64,
    /// Number of blocks per segment
    pub blocks_per_segment: U32,
    /// Percentage of segments kept in reserve
    pub r_segments_percentage: U32,
    /// Checkpoint number of the last checkpoint
    pub last_cno: U64,
    /// Start block of the last written log
    pub last_pseg: U64,
    /// Sequence number of the segment holding the last written log
    pub last_seq: U64,
    /// Free block count
    pub free_blocks_count: U64,
    /// Creation time, epoch seconds
    pub ctime: U64,
    /// Last mount time, epoch seconds
    pub mtime: U64,
    /// Last superblock write time, epoch seconds
    pub wtime: U64,
    /// Mounts since the last check
    pub mnt_count: U16,
    /// Mounts allowed between checks
    pub max_mnt_count: U16,
    /// Mount state, see [`SbState`]
    pub state: U16,
    /// Error behaviour policy
    pub errors: U16,
    /// Time of the last check, epoch seconds
    pub lastcheck: U64,
    /// Maximum time between checks, seconds
    pub checkinterval: U32,
    /// Creator OS identifier
    pub creator_os: U32,
    /// Default uid for reserved blocks
    pub def_resuid: U16,
    /// Default gid for reserved blocks
    pub def_resgid: U16,
    /// First non-reserved inode number
    pub first_ino: U32,
    /// Size of an on-disk inode
    pub inode_size: U16,
    /// Size of a DAT entry
    pub dat_entry_size: U16,
    /// Size of a checkpoint file entry
    pub checkpoint_size: U16,
    /// Size of a segment usage entry
    pub segment_usage_size: U16,
    /// Volume UUID
    pub uuid: [u8; 16],
    /// Volume name, NUL-padded UTF-8
    pub volume_name: [u8; VOLUME_NAME_LEN],
    /// Commit interval in seconds
    pub c_interval: U32,
    /// Maximum blocks per checkpoint
    pub c_block_max: U32,
    /// Compatible feature set
    pub feature_compat: U64,
    /// Read-only compatible feature set
    pub feature_compat_ro: U64,
    /// Incompatible feature set
    pub feature_incompat: U64,
    /// Reserved space padding the slot out to 1024 bytes
    pub reserved: [u8; 744],
}

const _: () = assert!(core::mem::size_of::<SuperBlock>() == MAX_SB_BYTES);

impl SuperBlock {
    /// Check if the magic number identifies a NILFS2 volume
    pub fn check_magic(&self) -> bool {
        self.magic.get() == MAGIC
    }

    /// Returns the mount state bits
    pub fn state(&self) -> SbState {
        SbState::from_bits_truncate(self.state.get())
    }

    /// Replaces the mount state bits
    pub fn set_state(&mut self, state: SbState) {
        self.state.set(state.bits());
    }

    /// Returns the filesystem UUID as a hyphenated string
    pub fn uuid(&self) -> Result<String, UnicodeError> {
        Ok(Uuid::from_bytes(self.uuid).hyphenated().to_string())
    }

    /// Returns the volume label
    ///
    /// Handles NUL termination in the fixed-size name field
    pub fn label(&self) -> Result<String, UnicodeError> {
        let end = self
            .volume_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(VOLUME_NAME_LEN);
        Ok(str::from_utf8(&self.volume_name[..end])?.to_owned())
    }

    /// Replaces the volume label, truncating to the on-disk field size
    pub fn set_label(&mut self, label: &str) {
        self.volume_name = [0u8; VOLUME_NAME_LEN];
        let bytes = label.as_bytes();
        let len = bytes.len().min(VOLUME_NAME_LEN - 1);
        self.volume_name[..len].copy_from_slice(&bytes[..len]);
    }
}
