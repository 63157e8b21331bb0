// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Superblock pair management
//!
//! Both superblock copies are read tolerantly: only the magic and the
//! declared length gate acceptance, so a volume with a stale checksum can
//! still be diagnosed. Checksums are always recomputed before a write. The
//! secondary copy is additionally required to sit at or past the end of the
//! segment area it describes; a copy failing that belongs to some smaller,
//! earlier filesystem and is discarded.

use bitflags::bitflags;
use blockdev::BlockDevice;
use ondisk::geometry::BLOCK_SIZE_SHIFT;
use ondisk::superblock::{MAX_SB_BYTES, SB1_OFFSET_BYTES, sb2_offset_bytes};
use ondisk::{Geometry, SbState, SuperBlock, crc32_le};
use snafu::ResultExt;
use zerocopy::IntoBytes;

use crate::rollback::LogRef;
use crate::{DeviceSizeSnafu, Error};

bitflags! {
    /// Field selection for masked superblock updates
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SbMask: u32 {
        /// Volume name
        const LABEL = 1 << 0;
        /// Commit interval
        const COMMIT_INTERVAL = 1 << 1;
        /// Maximum blocks per checkpoint
        const BLOCK_MAX = 1 << 2;
        /// Volume UUID
        const UUID = 1 << 3;
        /// All three feature words
        const FEATURES = 1 << 4;
    }
}

/// The two superblock slots of one device
#[derive(Debug)]
pub struct SbPair {
    /// Accepted copies; a slot failing validation reads as `None`
    pub sbs: [Option<Box<SuperBlock>>; 2],
    /// Byte offsets of the primary and secondary slots
    pub offsets: [u64; 2],
}

impl SbPair {
    /// The copy mounting would resume from
    ///
    /// The primary wins unless both copies are valid and the secondary has
    /// seen a later checkpoint.
    pub fn latest(&self) -> Option<&SuperBlock> {
        match (&self.sbs[0], &self.sbs[1]) {
            (Some(primary), Some(secondary)) => {
                if secondary.last_cno.get() > primary.last_cno.get() {
                    Some(secondary)
                } else {
                    Some(primary)
                }
            }
            (Some(primary), None) => Some(primary),
            (None, Some(secondary)) => Some(secondary),
            (None, None) => None,
        }
    }
}

/// CRC32 over the declared length of the superblock with the checksum
/// field zeroed
///
/// The declared length is authoritative, never the 1024-byte slot size.
pub fn sb_check_sum(sb: &SuperBlock) -> u32 {
    let mut copy = sb.clone();
    copy.sum.set(0);
    let len = (copy.bytes.get() as usize).min(MAX_SB_BYTES);
    crc32_le(copy.crc_seed.get(), &copy.as_bytes()[..len])
}

/// Structural validity of one superblock copy
pub fn sb_is_valid(sb: &SuperBlock, check_crc: bool) -> bool {
    if !sb.check_magic() {
        return false;
    }
    if sb.bytes.get() as usize > MAX_SB_BYTES {
        return false;
    }
    if !check_crc {
        return true;
    }
    sb_check_sum(sb) == sb.sum.get()
}

/// Whether the secondary slot lies inside the segment area its own fields
/// describe
fn sb2_offset_is_too_small(sb: &SuperBlock, offset: u64) -> bool {
    let blocks = sb
        .nsegments
        .get()
        .saturating_mul(sb.blocks_per_segment.get() as u64);
    match blocks.checked_shl(sb.log_block_size.get() + BLOCK_SIZE_SHIFT) {
        Some(volume_bytes) => offset < volume_bytes,
        None => true,
    }
}

/// Read both superblock slots
///
/// CRC failures do not reject a copy here; magic, declared length and (for
/// the secondary) the offset check do.
pub fn read_sb_pair(dev: &BlockDevice) -> Result<SbPair, Error> {
    let devsize = dev.size_bytes().context(DeviceSizeSnafu)?;
    let offsets = [SB1_OFFSET_BYTES, sb2_offset_bytes(devsize)];
    let mut sbs: [Option<Box<SuperBlock>>; 2] = [None, None];

    for (i, &offset) in offsets.iter().enumerate() {
        let mut buf = [0u8; MAX_SB_BYTES];
        dev.read_exact_at(&mut buf, offset)
            .map_err(|source| Error::ReadSuperBlock { offset, source })?;
        let sb: SuperBlock = zerocopy::transmute!(buf);

        if !sb_is_valid(&sb, false) {
            continue;
        }
        if i == 1 && sb2_offset_is_too_small(&sb, offset) {
            log::warn!("secondary super block at offset {offset} lies inside its own segment area, discarding");
            continue;
        }
        sbs[i] = Some(Box::new(sb));
    }

    Ok(SbPair { sbs, offsets })
}

/// Overlay the masked fields of `sb` onto every still-valid copy and write
/// the full slots back
///
/// A copy that failed validation on read is left untouched.
pub fn write_sb(dev: &BlockDevice, sb: &SuperBlock, mask: SbMask) -> Result<(), Error> {
    let mut pair = read_sb_pair(dev)?;
    if pair.sbs.iter().all(Option::is_none) {
        return Err(Error::InvalidFilesystem);
    }

    for i in 0..2 {
        let offset = pair.offsets[i];
        let Some(dst) = pair.sbs[i].as_deref_mut() else {
            continue;
        };

        if mask.contains(SbMask::LABEL) {
            dst.volume_name = sb.volume_name;
        }
        if mask.contains(SbMask::COMMIT_INTERVAL) {
            dst.c_interval = sb.c_interval;
        }
        if mask.contains(SbMask::BLOCK_MAX) {
            dst.c_block_max = sb.c_block_max;
        }
        if mask.contains(SbMask::UUID) {
            dst.uuid = sb.uuid;
        }
        if mask.contains(SbMask::FEATURES) {
            dst.feature_compat = sb.feature_compat;
            dst.feature_compat_ro = sb.feature_compat_ro;
            dst.feature_incompat = sb.feature_incompat;
        }

        dst.sum.set(sb_check_sum(dst));
        dev.write_exact_at(dst.as_bytes(), offset)
            .map_err(|source| Error::WriteSuperBlock { offset, source })?;
    }

    dev.sync().map_err(|source| Error::Sync { source })
}

/// Point the superblock at a rolled-back log and mark the volume unclean
///
/// Clears the valid-FS state bit so mount-time recovery runs, and refreshes
/// the checksum over the declared length.
pub fn commit_super_block(sb: &mut SuperBlock, log_ref: &LogRef, now_epoch: u64) {
    sb.last_pseg.set(log_ref.blocknr);
    sb.last_seq.set(log_ref.seqnum);
    sb.last_cno.set(log_ref.cno);
    sb.wtime.set(now_epoch);
    sb.state.set(sb.state.get() & !SbState::VALID_FS.bits());
    sb.sum.set(sb_check_sum(sb));
}

/// Write a committed superblock into both slots
///
/// The secondary slot is skipped when the device is too small to hold one
/// beyond the segment area. Each copy is written and synced independently;
/// losing one copy while the other lands yields a partial-success error.
pub fn write_super_block_pair(
    dev: &BlockDevice,
    sb: &SuperBlock,
    geo: &Geometry,
) -> Result<(), Error> {
    let devsize = dev.size_bytes().context(DeviceSizeSnafu)?;
    let sb2_offset = sb2_offset_bytes(devsize);

    let mut offsets = vec![SB1_OFFSET_BYTES];
    if sb2_offset >= geo.volume_bytes() {
        offsets.push(sb2_offset);
    }

    let mut written = 0usize;
    let mut failure: Option<(u64, blockdev::Error)> = None;
    for &offset in &offsets {
        let outcome = dev
            .write_exact_at(sb.as_bytes(), offset)
            .and_then(|_| dev.sync());
        match outcome {
            Ok(()) => written += 1,
            Err(source) => {
                log::error!("failed to write super block at offset {offset}: {source}");
                failure.get_or_insert((offset, source));
            }
        }
    }

    match failure {
        None => Ok(()),
        Some((offset, source)) if written == 0 => Err(Error::WriteSuperBlock { offset, source }),
        Some((offset, source)) => Err(Error::PartialSuperBlockWrite { offset, source }),
    }
}
