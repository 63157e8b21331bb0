// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Volume geometry derived from the superblock
//!
//! Everything the scanner needs to turn segment numbers into block numbers
//! and block numbers into byte offsets, computed once from the chosen
//! superblock copy.

use thiserror::Error;

use crate::checkpoint::CpfileHeader;
use crate::superblock::SuperBlock;

/// Shift applied on top of `log_block_size` to obtain the block size
pub const BLOCK_SIZE_SHIFT: u32 = 10;

/// Errors raised for superblocks whose geometry cannot be used
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("unsupported block size shift {0}")]
    BadBlockSizeShift(u32),

    #[error("blocks per segment is zero")]
    NoBlocksPerSegment,

    #[error("checkpoint entry size {0} is too small")]
    BadCheckpointSize(u16),
}

/// Derived layout facts of one volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Block size in bytes
    pub block_size: u32,
    /// Blocks per segment
    pub blocks_per_segment: u32,
    /// Number of segments on the volume
    pub nsegments: u64,
    /// First block available for segment 0
    pub first_data_block: u64,
    /// Seed for all CRC32 checksums
    pub crc_seed: u32,
    /// Size of a checkpoint file entry in bytes
    pub checkpoint_size: u16,
    /// Declared superblock length in bytes
    pub sb_bytes: u16,
    /// Checkpoint entries per block
    pub ncheckpoints_per_block: u32,
    /// Entry slots in block 0 of the checkpoint file taken by its header
    pub first_checkpoint_offset: u32,
}

impl Geometry {
    /// Derive the geometry from a superblock copy
    pub fn from_super_block(sb: &SuperBlock) -> Result<Self, GeometryError> {
        let shift = sb.log_block_size.get();
        // 64 KiB blocks are the largest the format allows
        if shift > 6 {
            return Err(GeometryError::BadBlockSizeShift(shift));
        }
        let block_size = 1u32 << (shift + BLOCK_SIZE_SHIFT);

        let blocks_per_segment = sb.blocks_per_segment.get();
        if blocks_per_segment == 0 {
            return Err(GeometryError::NoBlocksPerSegment);
        }

        let checkpoint_size = sb.checkpoint_size.get();
        if (checkpoint_size as usize) < core::mem::size_of::<CpfileHeader>() {
            return Err(GeometryError::BadCheckpointSize(checkpoint_size));
        }

        let header = core::mem::size_of::<CpfileHeader>() as u32;
        Ok(Self {
            block_size,
            blocks_per_segment,
            nsegments: sb.nsegments.get(),
            first_data_block: sb.first_data_block.get(),
            crc_seed: sb.crc_seed.get(),
            checkpoint_size,
            sb_bytes: sb.bytes.get(),
            ncheckpoints_per_block: block_size / checkpoint_size as u32,
            first_checkpoint_offset: header.div_ceil(checkpoint_size as u32),
        })
    }

    /// Start block of a segment
    ///
    /// Segment 0 yields the first data block; block 0 and the primary
    /// superblock live in front of it.
    pub fn segment_start(&self, segnum: u64) -> u64 {
        if segnum > 0 {
            self.blocks_per_segment as u64 * segnum
        } else {
            self.first_data_block
        }
    }

    /// Segment number owning a block
    pub fn segment_of(&self, blocknr: u64) -> u64 {
        blocknr / self.blocks_per_segment as u64
    }

    /// Total bytes of the segment area
    pub fn volume_bytes(&self) -> u64 {
        self.nsegments * self.blocks_per_segment as u64 * self.block_size as u64
    }
}
