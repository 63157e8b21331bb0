// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Rollback engine
//!
//! Confirms the log the superblock points to, or walks the segment ring
//! backwards to find the most recent log carrying a super root. The walk
//! has to cope with two topological facts of a log-structured ring:
//! sequence chains break where segments were reused out of order, and the
//! logically newest segment can sit at a *lower* segment number than its
//! predecessor once writing has wrapped around the ring.

use std::rc::Rc;

use ondisk::{CPFILE_INO, Checkpoint, SummaryFlags, SuperBlock};
use zerocopy::FromBytes;

use crate::cache::{SegmentCache, SegmentInfo};
use crate::pseg::{BlockRecord, FileWalker};
use crate::volume::Volume;
use crate::{CheckpointNotFoundSnafu, Error, SuperRootNotFoundSnafu};

/// Bound on the number of segments the backward search will visit
pub const MAX_SCAN_SEGMENT: usize = 50;

/// The superblock's view of the last written log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogRef {
    /// Start block of the log
    pub blocknr: u64,
    /// Sequence number of the log's segment
    pub seqnum: u64,
    /// Checkpoint number the log belongs to
    pub cno: u64,
    /// Creation time of the log, epoch seconds; 0 when unknown
    pub ctime: u64,
}

impl LogRef {
    /// The pointer recorded in a superblock
    pub fn from_super_block(sb: &SuperBlock) -> Self {
        Self {
            blocknr: sb.last_pseg.get(),
            seqnum: sb.last_seq.get(),
            cno: sb.last_cno.get(),
            ctime: 0,
        }
    }
}

/// Confirm the log the superblock points to
///
/// Accepts only when a log starts exactly at the recorded block, its
/// segment carries the recorded sequence number, and the log has a super
/// root. On success the creation time is filled in from the summary.
pub fn test_latest_log(
    vol: &Volume,
    cache: &mut SegmentCache,
    log_ref: &mut LogRef,
) -> Result<bool, Error> {
    let segnum = vol.geo.segment_of(log_ref.blocknr);
    let Some(seg) = cache.load_segment(vol, segnum)? else {
        return Ok(false);
    };
    let Some(log) = seg.lookup_log(log_ref.blocknr) else {
        return Ok(false);
    };
    if seg.segseq == log_ref.seqnum && log.has_super_root() {
        log_ref.ctime = log.summary.create.get();
        return Ok(true);
    }
    Ok(false)
}

/// Backward ring search for the most recent super-root log
///
/// `cont` is held while the scan is still inside the logical segment the
/// superblock already describes; a super root found there is old news and
/// must not be offered as a rollback target. `invert` latches once a
/// physically previous segment carries a *greater* sequence number, which
/// happens exactly at the ring's join point; the candidate collected on
/// the far side of the join is logically older and is discarded.
pub fn find_latest_super_root(
    vol: &Volume,
    cache: &mut SegmentCache,
    start_segnum: u64,
    blocknr: u64,
) -> Result<Option<(Rc<SegmentInfo>, usize)>, Error> {
    let nsegments = vol.geo.nsegments;
    let mut segnum = start_segnum;
    let mut cur = cache.load_segment(vol, segnum)?;
    let mut candidate: Option<(Rc<SegmentInfo>, usize)> = None;
    let mut cont = false;
    let mut invert = false;

    if let Some(seg) = &cur {
        candidate = seg.last_super_root_index().map(|i| (seg.clone(), i));
        if blocknr < seg.seg_start + seg.log_length() {
            cont = true;
        }
    }

    for _ in 0..MAX_SCAN_SEGMENT {
        segnum = if segnum == 0 { nsegments - 1 } else { segnum - 1 };
        log::debug!("scanning segment {segnum}");

        let Some(new) = cache.load_segment(vol, segnum)? else {
            if cont {
                candidate = None;
            }
            cont = false;
            cur = None;
            continue;
        };

        let Some(prev) = cur else {
            // resynchronize after a hole in the chain
            candidate = new.last_super_root_index().map(|i| (new.clone(), i));
            cur = Some(new);
            continue;
        };

        if new.segseq.wrapping_add(1) != prev.segseq {
            cont = false;
        }
        if new.segseq > prev.segseq {
            invert = true;
            candidate = None;
        }
        if invert && candidate.is_none() {
            if let Some(i) = new.last_super_root_index() {
                // first super root past the join point is the latest
                return Ok(Some((new, i)));
            }
        }
        if !cont && candidate.is_none() {
            candidate = new.last_super_root_index().map(|i| (new.clone(), i));
        }

        cur = Some(new);
    }

    if !cont {
        if let Some(found) = candidate {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// Scan one checkpoint-file block for its greatest live checkpoint number
///
/// Block 0 of the checkpoint file starts with the file header, which
/// occupies the leading entry slots.
fn find_latest_checkpoint(vol: &Volume, cpblocknr: u64, blkoff: u64) -> Result<u64, Error> {
    let geo = &vol.geo;
    let mut buf = vec![0u8; vol.block_size()];
    vol.read_block(cpblocknr, &mut buf)?;

    let (first, ncp) = if blkoff == 0 {
        (
            geo.first_checkpoint_offset,
            geo.ncheckpoints_per_block - geo.first_checkpoint_offset,
        )
    } else {
        (0, geo.ncheckpoints_per_block)
    };

    let mut latest = 0u64;
    for i in 0..ncp {
        let offset = (first + i) as usize * geo.checkpoint_size as usize;
        let Ok((cp, _)) = Checkpoint::read_from_prefix(&buf[offset..]) else {
            break;
        };
        if !cp.is_invalid() && cp.cno.get() > latest {
            latest = cp.cno.get();
        }
    }
    Ok(latest)
}

/// Greatest checkpoint number referenced by one log's summary
///
/// Checkpoint-file data blocks carried by the log point into the
/// checkpoint file; the entries of the last such block bound the
/// checkpoint number from below.
fn get_latest_cno(vol: &Volume, log_start: u64) -> Result<u64, Error> {
    let summary = vol.read_summary(log_start)?;
    let block_size = vol.block_size();
    let area_blocks = (summary.sumbytes.get() as u64)
        .div_ceil(block_size as u64)
        .clamp(1, summary.nblocks.get().max(1) as u64);
    let area = vol.read_blocks(log_start, area_blocks as u32)?;

    let mut walker = FileWalker::new(&summary, &area, log_start, block_size);
    let mut latest = 0u64;
    while let Some(file) = walker.next_file() {
        if file.ino != CPFILE_INO || file.ndatablk == 0 {
            continue;
        }
        let Some(BlockRecord::VirtualData {
            blkoff, blocknr, ..
        }) = file.blocks.get(file.ndatablk as usize - 1)
        else {
            continue;
        };
        let cno = find_latest_checkpoint(vol, *blocknr, *blkoff)?;
        latest = latest.max(cno);
    }
    if let Some(err) = walker.error() {
        log::debug!("summary walk of log at {log_start} stopped: {err}");
    }
    Ok(latest)
}

/// Walk the logical segment containing `start` backwards and recover the
/// greatest live checkpoint number referenced by any of its logs
///
/// Crosses at most [`MAX_SCAN_SEGMENT`] physical boundaries; each crossing
/// requires exact sequence continuity with the preceding segment.
fn find_latest_cno_in_logical_segment(
    vol: &Volume,
    cache: &mut SegmentCache,
    mut seg: Rc<SegmentInfo>,
    mut idx: usize,
) -> Result<u64, Error> {
    let mut latest = 0u64;
    let mut crossings = 0usize;

    loop {
        let log = &seg.logs()[idx];
        latest = latest.max(get_latest_cno(vol, log.log_start)?);
        if log.flags().contains(SummaryFlags::LOGBGN) {
            break;
        }

        if idx > 0 {
            idx -= 1;
        } else {
            crossings += 1;
            if crossings > MAX_SCAN_SEGMENT {
                break;
            }
            let prev_segnum = if seg.segnum == 0 {
                vol.geo.nsegments - 1
            } else {
                seg.segnum - 1
            };
            let seq = seg.segseq;
            let Some(prev) = cache.load_segment(vol, prev_segnum)? else {
                break;
            };
            if prev.segseq != seq.wrapping_sub(1) {
                break;
            }
            idx = prev.nlogs() - 1;
            seg = prev;
        }

        if seg.logs()[idx].flags().contains(SummaryFlags::LOGEND) {
            break;
        }
    }

    Ok(latest)
}

/// Roll the log reference back to the most recent super root
///
/// On return the reference names the selected log; the checkpoint number
/// comes from the summary when the header is new enough to carry one, and
/// is otherwise recovered by re-walking the enclosing logical segment.
pub fn do_rollback(
    vol: &Volume,
    cache: &mut SegmentCache,
    log_ref: &mut LogRef,
) -> Result<(), Error> {
    let segnum = vol.geo.segment_of(log_ref.blocknr);
    let Some((seg, idx)) = find_latest_super_root(vol, cache, segnum, log_ref.blocknr)? else {
        return SuperRootNotFoundSnafu.fail();
    };

    let log = &seg.logs()[idx];
    log_ref.blocknr = log.log_start;
    log_ref.seqnum = seg.segseq;
    log_ref.ctime = log.summary.create.get();

    log_ref.cno = match log.summary.cno() {
        Some(cno) => cno,
        None => {
            log::info!("summary lacks a checkpoint number, searching the checkpoint file");
            let cno = find_latest_cno_in_logical_segment(vol, cache, seg.clone(), idx)?;
            if cno == 0 {
                return CheckpointNotFoundSnafu.fail();
            }
            cno
        }
    };
    Ok(())
}
