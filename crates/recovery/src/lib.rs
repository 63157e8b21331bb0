// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Segment scanning and superblock rollback
//!
//! This crate walks the segment log chain of a NILFS2 volume and repairs a
//! stale superblock pointer:
//! - the superblock pair manager reads and rewrites the two fixed-offset
//!   copies,
//! - the segment cache scans physical segments into reference-counted
//!   in-memory descriptors,
//! - the rollback engine confirms the pointed-to log or searches the
//!   segment ring backwards for the most recent super root,
//! - the summary walkers decode the per-file records of a log for the
//!   segment dump tool and for checkpoint-number recovery.

use snafu::Snafu;

pub mod cache;
pub mod pseg;
pub mod rollback;
pub mod sb;
pub mod volume;

pub use cache::{LogInfo, SegmentCache, SegmentInfo};
pub use pseg::{BlockRecord, FileRecord, FileWalker, Pseg, PsegIter, SegmentImage};
pub use rollback::{LogRef, MAX_SCAN_SEGMENT, do_rollback, test_latest_log};
pub use sb::{SbMask, SbPair, commit_super_block, read_sb_pair, write_super_block_pair};
pub use volume::{Volume, log_is_valid};

/// Errors that can occur while scanning or repairing a volume
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Size query on the device failed
    #[snafu(display("cannot query device size: {source}"))]
    DeviceSize { source: blockdev::Error },

    /// Read of a volume block failed
    #[snafu(display("cannot read block {blocknr}: {source}"))]
    ReadBlock { blocknr: u64, source: blockdev::Error },

    /// Read of a superblock slot failed
    #[snafu(display("cannot read super block at offset {offset}: {source}"))]
    ReadSuperBlock { offset: u64, source: blockdev::Error },

    /// Write of a superblock slot failed
    #[snafu(display("cannot write super block at offset {offset}: {source}"))]
    WriteSuperBlock { offset: u64, source: blockdev::Error },

    /// One superblock copy was updated, the other failed
    #[snafu(display("super block update only reached one copy (failed at offset {offset}): {source}"))]
    PartialSuperBlockWrite { offset: u64, source: blockdev::Error },

    /// Neither superblock copy is acceptable
    #[snafu(display("no valid super block found"))]
    InvalidFilesystem,

    /// The backward scan exhausted its window without a super root
    #[snafu(display("cannot find super root"))]
    SuperRootNotFound,

    /// No live checkpoint was recoverable for the selected log
    #[snafu(display("cannot identify the latest checkpoint"))]
    CheckpointNotFound,

    /// Segment number beyond the end of the volume
    #[snafu(display("segment number {segnum} out of range (volume has {nsegments} segments)"))]
    SegnumOutOfRange { segnum: u64, nsegments: u64 },

    /// Flushing the device failed
    #[snafu(display("cannot sync device: {source}"))]
    Sync { source: blockdev::Error },
}
