// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Segment/log cache
//!
//! The backward ring search revisits segments, so every scanned segment is
//! kept as an in-memory descriptor owning the ordered list of its logs.
//! The cache holds one [`Rc`] per segment and hands out clones as pins;
//! [`SegmentCache::shrink`] drops exactly the entries nobody else holds.

use std::collections::HashMap;
use std::rc::Rc;

use ondisk::{SegmentSummary, SummaryFlags};

use crate::volume::{Volume, log_is_valid};
use crate::Error;

/// Cached segments allowed before unpinned entries are dropped
const SHRINK_WATERMARK: usize = 128;

/// One log (partial segment) of a scanned segment
#[derive(Debug, Clone)]
pub struct LogInfo {
    /// Start block of the log
    pub log_start: u64,
    /// The log's summary header
    pub summary: SegmentSummary,
}

impl LogInfo {
    /// Number of blocks in the log
    pub fn nblocks(&self) -> u32 {
        self.summary.nblocks.get()
    }

    /// Log flags
    pub fn flags(&self) -> SummaryFlags {
        self.summary.flags()
    }

    /// Whether the log payload carries a super root
    pub fn has_super_root(&self) -> bool {
        self.flags().contains(SummaryFlags::SR)
    }
}

/// A scanned physical segment and the logs of its leading logical segment
#[derive(Debug)]
pub struct SegmentInfo {
    /// Segment number
    pub segnum: u64,
    /// Start block of the segment
    pub seg_start: u64,
    /// Start block of the next segment in the ring
    pub next: u64,
    /// Sequence number shared by all cached logs of this segment
    pub segseq: u64,
    logs: Vec<LogInfo>,
}

impl SegmentInfo {
    /// Logs in ascending start-block order
    pub fn logs(&self) -> &[LogInfo] {
        &self.logs
    }

    /// Number of cached logs
    pub fn nlogs(&self) -> usize {
        self.logs.len()
    }

    /// First log of the segment
    pub fn first_log(&self) -> Option<&LogInfo> {
        self.logs.first()
    }

    /// Last log of the segment
    pub fn last_log(&self) -> Option<&LogInfo> {
        self.logs.last()
    }

    /// The log starting exactly at `blocknr`
    pub fn lookup_log(&self, blocknr: u64) -> Option<&LogInfo> {
        self.logs.iter().find(|log| log.log_start == blocknr)
    }

    /// The log following the one at `idx`
    pub fn next_log(&self, idx: usize) -> Option<&LogInfo> {
        self.logs.get(idx + 1)
    }

    /// The log preceding the one at `idx`
    pub fn prev_log(&self, idx: usize) -> Option<&LogInfo> {
        idx.checked_sub(1).and_then(|i| self.logs.get(i))
    }

    /// Index of the last log carrying a super root
    pub fn last_super_root_index(&self) -> Option<usize> {
        self.logs.iter().rposition(LogInfo::has_super_root)
    }

    /// The last log carrying a super root
    pub fn last_super_root(&self) -> Option<&LogInfo> {
        self.last_super_root_index().map(|i| &self.logs[i])
    }

    /// Blocks covered by the cached logs, from the segment start to the end
    /// of the last log
    pub fn log_length(&self) -> u64 {
        self.logs
            .last()
            .map(|log| log.log_start - self.seg_start + log.nblocks() as u64)
            .unwrap_or(0)
    }
}

/// Registry of scanned segments keyed by segment number
#[derive(Debug, Default)]
pub struct SegmentCache {
    segments: HashMap<u64, Rc<SegmentInfo>>,
}

impl SegmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// A cached segment, without scanning
    pub fn lookup(&self, segnum: u64) -> Option<Rc<SegmentInfo>> {
        self.segments.get(&segnum).cloned()
    }

    /// The cached segment, or scan it from the device
    ///
    /// Scanning validates the first log and then links every contiguous log
    /// that validates and carries the same sequence number; a log with a
    /// different sequence belongs to a later logical segment and ends the
    /// scan. A segment whose first log is missing or invalid yields `None`
    /// and is not cached.
    pub fn load_segment(
        &mut self,
        vol: &Volume,
        segnum: u64,
    ) -> Result<Option<Rc<SegmentInfo>>, Error> {
        if let Some(seg) = self.segments.get(&segnum) {
            return Ok(Some(seg.clone()));
        }

        let seg_start = vol.geo.segment_start(segnum);
        vol.prefetch_segment(segnum);

        let mut blocknr = seg_start;
        let mut summary = vol.read_summary(blocknr)?;
        if !log_is_valid(vol, blocknr, &summary)? {
            log::warn!("empty or bad segment: segnum = {segnum}, blocknr = {seg_start}");
            return Ok(None);
        }

        let segseq = summary.seq.get();
        let next = summary.next.get();
        let end = seg_start + vol.geo.blocks_per_segment as u64;
        let mut logs = Vec::new();

        loop {
            let nblocks = summary.nblocks.get() as u64;
            logs.push(LogInfo {
                log_start: blocknr,
                summary,
            });

            blocknr += nblocks;
            if blocknr >= end {
                break;
            }

            summary = vol.read_summary(blocknr)?;
            if summary.seq.get() != segseq || !log_is_valid(vol, blocknr, &summary)? {
                break;
            }
        }

        if self.segments.len() >= SHRINK_WATERMARK {
            self.shrink();
        }

        let seg = Rc::new(SegmentInfo {
            segnum,
            seg_start,
            next,
            segseq,
            logs,
        });
        self.segments.insert(segnum, seg.clone());
        Ok(Some(seg))
    }

    /// Drop every segment no traversal handle pins
    ///
    /// Returns the number of entries dropped.
    pub fn shrink(&mut self) -> usize {
        let before = self.segments.len();
        self.segments.retain(|_, seg| Rc::strong_count(seg) > 1);
        before - self.segments.len()
    }

    /// Drop everything, pinned or not
    pub fn clear(&mut self) {
        self.segments.clear();
    }
}
