// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Block-addressed access to one volume
//!
//! Couples an open device with the geometry derived from its superblock,
//! and hosts the log validator used everywhere a candidate log has to be
//! trusted.

use blockdev::BlockDevice;
use ondisk::{Geometry, SegmentSummary, crc32_le};
use snafu::ResultExt;

use crate::{Error, ReadBlockSnafu};

/// Size of the stored data checksum field skipped when checksumming a log
const DATASUM_BYTES: usize = 4;

/// An open volume: device handle plus derived geometry
#[derive(Debug)]
pub struct Volume {
    dev: BlockDevice,
    /// Layout facts derived from the chosen superblock
    pub geo: Geometry,
}

impl Volume {
    pub fn new(dev: BlockDevice, geo: Geometry) -> Self {
        Self { dev, geo }
    }

    /// The underlying device handle
    pub fn device(&self) -> &BlockDevice {
        &self.dev
    }

    /// Block size in bytes
    pub fn block_size(&self) -> usize {
        self.geo.block_size as usize
    }

    /// Read one block into `buf`, which must be block-sized
    pub fn read_block(&self, blocknr: u64, buf: &mut [u8]) -> Result<(), Error> {
        debug_assert_eq!(buf.len(), self.block_size());
        self.dev
            .read_exact_at(buf, blocknr * self.geo.block_size as u64)
            .context(ReadBlockSnafu { blocknr })
    }

    /// Read `count` consecutive blocks into a fresh buffer
    pub fn read_blocks(&self, blocknr: u64, count: u32) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; count as usize * self.block_size()];
        self.dev
            .read_exact_at(&mut buf, blocknr * self.geo.block_size as u64)
            .context(ReadBlockSnafu { blocknr })?;
        Ok(buf)
    }

    /// Read the fixed summary header at the start of a candidate log
    pub fn read_summary(&self, blocknr: u64) -> Result<SegmentSummary, Error> {
        let mut buf = [0u8; size_of::<SegmentSummary>()];
        self.dev
            .read_exact_at(&mut buf, blocknr * self.geo.block_size as u64)
            .context(ReadBlockSnafu { blocknr })?;
        Ok(zerocopy::transmute!(buf))
    }

    /// Hint that a whole segment is about to be scanned
    pub fn prefetch_segment(&self, segnum: u64) {
        let start = self.geo.segment_start(segnum) * self.geo.block_size as u64;
        let len = self.geo.blocks_per_segment as u64 * self.geo.block_size as u64;
        self.dev.prefetch(start, len);
    }
}

/// Validate a candidate log against its stored data checksum
///
/// The running CRC is seeded with the volume seed over the first block with
/// the stored checksum field excluded, then fed every remaining block of
/// the log whole.
pub fn log_is_valid(
    vol: &Volume,
    log_start: u64,
    summary: &SegmentSummary,
) -> Result<bool, Error> {
    if !summary.check_magic() {
        return Ok(false);
    }
    let nblocks = summary.nblocks.get();
    if nblocks == 0 || nblocks > vol.geo.blocks_per_segment {
        return Ok(false);
    }

    let mut buf = vec![0u8; vol.block_size()];
    vol.read_block(log_start, &mut buf)?;
    let mut crc = crc32_le(vol.geo.crc_seed, &buf[DATASUM_BYTES..]);
    for blocknr in log_start + 1..log_start + nblocks as u64 {
        vol.read_block(blocknr, &mut buf)?;
        crc = crc32_le(crc, &buf);
    }
    Ok(crc == summary.datasum.get())
}
