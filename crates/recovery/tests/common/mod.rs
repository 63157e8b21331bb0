// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Synthetic NILFS2 images for exercising the scanner end to end
//!
//! Builds a small volume in memory with properly checksummed logs and
//! superblock copies, flushes it to a temp file and opens it through the
//! real device path.

// each test binary uses a different slice of the helpers
#![allow(dead_code)]

use std::io::Write;

use blockdev::BlockDevice;
use ondisk::superblock::{MAGIC, SB1_OFFSET_BYTES, sb2_offset_bytes};
use ondisk::{
    Checkpoint, CheckpointFlags, Finfo, BinfoDat, BinfoV, Geometry, SbState, SegmentSummary,
    SummaryFlags, SuperBlock, crc32_le, summary::SEGSUM_MAGIC,
};
use recovery::Volume;
use tempfile::NamedTempFile;
use zerocopy::little_endian::U64;
use zerocopy::{FromZeros, IntoBytes};

pub const BLOCK_SIZE: usize = 4096;
pub const BLOCKS_PER_SEGMENT: u32 = 8;
pub const FIRST_DATA_BLOCK: u64 = 1;
pub const CRC_SEED: u32 = 0x9f4b_31c2;
pub const CHECKPOINT_SIZE: u16 = 64;

/// Creation times are derived from the sequence number so tests can assert
/// on them
pub const CREATE_EPOCH: u64 = 1_700_000_000;

pub struct ImageBuilder {
    pub nsegments: u64,
    bytes: Vec<u8>,
}

impl ImageBuilder {
    pub fn new(nsegments: u64) -> Self {
        // one spare segment of slack keeps the secondary superblock slot
        // beyond the segment area
        let total_blocks = (nsegments + 1) * BLOCKS_PER_SEGMENT as u64;
        Self {
            nsegments,
            bytes: vec![0u8; total_blocks as usize * BLOCK_SIZE],
        }
    }

    pub fn devsize(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn segment_start(&self, segnum: u64) -> u64 {
        if segnum == 0 {
            FIRST_DATA_BLOCK
        } else {
            segnum * BLOCKS_PER_SEGMENT as u64
        }
    }

    pub fn block_mut(&mut self, blocknr: u64) -> &mut [u8] {
        let base = blocknr as usize * BLOCK_SIZE;
        &mut self.bytes[base..base + BLOCK_SIZE]
    }

    /// A superblock matching the builder's layout, valid-FS and checksummed
    /// fields left to the caller
    pub fn base_super_block(&self) -> SuperBlock {
        let mut sb = SuperBlock::new_zeroed();
        sb.rev_level.set(2);
        sb.magic.set(MAGIC);
        sb.bytes.set(280);
        sb.crc_seed.set(CRC_SEED);
        sb.log_block_size.set(2);
        sb.nsegments.set(self.nsegments);
        sb.dev_size.set(self.devsize());
        sb.first_data_block.set(FIRST_DATA_BLOCK);
        sb.blocks_per_segment.set(BLOCKS_PER_SEGMENT);
        sb.checkpoint_size.set(CHECKPOINT_SIZE);
        sb.state.set(SbState::VALID_FS.bits());
        sb
    }

    fn checksummed(sb: &SuperBlock) -> Vec<u8> {
        let mut copy = sb.clone();
        copy.sum.set(0);
        let crc = crc32_le(
            copy.crc_seed.get(),
            &copy.as_bytes()[..copy.bytes.get() as usize],
        );
        copy.sum.set(crc);
        copy.as_bytes().to_vec()
    }

    /// Install `sb` into both superblock slots
    pub fn install_super_block(&mut self, sb: &SuperBlock) {
        self.install_super_block_slot(sb, 0);
        self.install_super_block_slot(sb, 1);
    }

    /// Install `sb` into one slot only
    pub fn install_super_block_slot(&mut self, sb: &SuperBlock, slot: usize) {
        let offset = match slot {
            0 => SB1_OFFSET_BYTES,
            _ => sb2_offset_bytes(self.devsize()),
        } as usize;
        let bytes = Self::checksummed(sb);
        self.bytes[offset..offset + bytes.len()].copy_from_slice(&bytes);
    }

    /// Write a log at `blocknr` and checksum it over its final content
    ///
    /// Payload blocks must be filled through [`Self::block_mut`] *before*
    /// this call; the data checksum covers them. `cno: None` declares the
    /// 56-byte header without a checkpoint number.
    pub fn write_log(
        &mut self,
        blocknr: u64,
        seq: u64,
        flags: SummaryFlags,
        nblocks: u32,
        cno: Option<u64>,
        nfinfo: u32,
        finfo_area: &[u8],
    ) {
        let hdr_bytes: u16 = if cno.is_some() { 64 } else { 56 };
        let mut ss = SegmentSummary::new_zeroed();
        ss.magic.set(SEGSUM_MAGIC);
        ss.bytes.set(hdr_bytes);
        ss.flags.set(flags.bits());
        ss.seq.set(seq);
        ss.create.set(CREATE_EPOCH + seq);
        ss.nblocks.set(nblocks);
        ss.nfinfo.set(nfinfo);
        ss.sumbytes.set(hdr_bytes as u32 + finfo_area.len() as u32);
        if let Some(cno) = cno {
            ss.cno.set(cno);
        }

        let base = blocknr as usize * BLOCK_SIZE;
        self.bytes[base..base + 64].copy_from_slice(ss.as_bytes());
        let finfo_start = base + hdr_bytes as usize;
        self.bytes[finfo_start..finfo_start + finfo_area.len()].copy_from_slice(finfo_area);

        let end = (blocknr + nblocks as u64) as usize * BLOCK_SIZE;
        let crc = crc32_le(CRC_SEED, &self.bytes[base + 4..end]);
        self.bytes[base..base + 4].copy_from_slice(&crc.to_le_bytes());
    }

    /// Write a raw summary header without checksumming the log
    ///
    /// For crafting corrupt logs the dump walkers have to classify.
    pub fn write_raw_summary(&mut self, blocknr: u64, ss: &SegmentSummary) {
        let base = blocknr as usize * BLOCK_SIZE;
        self.bytes[base..base + 64].copy_from_slice(ss.as_bytes());
    }

    /// Flush the image to a temp file
    pub fn write_image(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create image file");
        file.write_all(&self.bytes).expect("write image");
        file.flush().expect("flush image");
        file
    }
}

/// Open the flushed image through the real device path
pub fn open_volume(file: &NamedTempFile, sb: &SuperBlock) -> Volume {
    let dev = BlockDevice::open_readwrite(file.path()).expect("open image");
    let geo = Geometry::from_super_block(sb).expect("derive geometry");
    Volume::new(dev, geo)
}

/// A summary header that passes the dump walkers' structural checks
pub fn plain_summary(seq: u64, nblocks: u32, sumbytes: u32) -> SegmentSummary {
    let mut ss = SegmentSummary::new_zeroed();
    ss.magic.set(SEGSUM_MAGIC);
    ss.bytes.set(64);
    ss.seq.set(seq);
    ss.nblocks.set(nblocks);
    ss.sumbytes.set(sumbytes);
    ss
}

pub fn push_finfo(area: &mut Vec<u8>, ino: u64, cno: u64, nblocks: u32, ndatablk: u32) {
    let mut finfo = Finfo::new_zeroed();
    finfo.ino.set(ino);
    finfo.cno.set(cno);
    finfo.nblocks.set(nblocks);
    finfo.ndatablk.set(ndatablk);
    area.extend_from_slice(finfo.as_bytes());
}

pub fn push_binfo_v(area: &mut Vec<u8>, vblocknr: u64, blkoff: u64) {
    let mut binfo = BinfoV::new_zeroed();
    binfo.vblocknr.set(vblocknr);
    binfo.blkoff.set(blkoff);
    area.extend_from_slice(binfo.as_bytes());
}

pub fn push_binfo_dat(area: &mut Vec<u8>, blkoff: u64, level: u8) {
    let mut binfo = BinfoDat::new_zeroed();
    binfo.blkoff.set(blkoff);
    binfo.level = level;
    area.extend_from_slice(binfo.as_bytes());
}

pub fn push_blocknr(area: &mut Vec<u8>, value: u64) {
    area.extend_from_slice(U64::new(value).as_bytes());
}

/// Fill a block with checkpoint entries; `(cno, invalid)` per slot
pub fn fill_checkpoint_block(block: &mut [u8], entries: &[(u64, bool)]) {
    for (i, &(cno, invalid)) in entries.iter().enumerate() {
        let mut cp = Checkpoint::new_zeroed();
        if invalid {
            cp.flags.set(CheckpointFlags::INVALID.bits());
        }
        cp.cno.set(cno);
        let offset = i * CHECKPOINT_SIZE as usize;
        block[offset..offset + cp.as_bytes().len()].copy_from_slice(cp.as_bytes());
    }
}
