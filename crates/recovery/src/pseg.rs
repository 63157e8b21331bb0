// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Partial-segment and summary-area walkers
//!
//! Decodes the variable-length area trailing a log's summary header:
//! per-file `finfo` records, each followed by its data block-info entries
//! and then its node block-info entries. Entries never straddle a block
//! boundary; when one would, it starts at the next block.
//!
//! Malformed input is not an abort: both walkers stop and expose a
//! classified error with the counters a human needs to judge the damage.

use std::fmt;

use ondisk::{
    BinfoDat, BinfoV, Finfo, SegmentSummary, ino_uses_real_blocknr,
    summary::SEGSUM_MIN_BYTES,
};
use zerocopy::FromBytes;
use zerocopy::little_endian::U64;

use crate::volume::Volume;
use crate::{Error, SegnumOutOfRangeSnafu};

/// Classified reasons a partial-segment walk stops
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PsegError {
    /// Declared header size breaks the 8-byte alignment of trailing entries
    Alignment { hdrsize: u16 },
    /// Log claims more blocks than the segment has left
    BigPseg { nblocks: u32, excess: u32 },
    /// Declared header size exceeds the whole summary
    BigHdr { hdrsize: u16, sumbytes: u32 },
    /// Summary larger than the log itself
    BigSum { sumbytes: u32, pseg_bytes: u64 },
}

impl PsegError {
    pub fn code(&self) -> u32 {
        match self {
            Self::Alignment { .. } => 1,
            Self::BigPseg { .. } => 2,
            Self::BigHdr { .. } => 3,
            Self::BigSum { .. } => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Alignment { .. } => "bad alignment",
            Self::BigPseg { .. } => "too big pseg",
            Self::BigHdr { .. } => "too big header",
            Self::BigSum { .. } => "too big summary",
        }
    }
}

impl fmt::Display for PsegError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {} ({})", self.code(), self.name())?;
        match self {
            Self::Alignment { hdrsize } => write!(f, " - header size = {hdrsize}"),
            Self::BigPseg { nblocks, excess } => {
                write!(f, " - pseg blkcnt = {nblocks}, excess blkcnt = {excess}")
            }
            Self::BigHdr { hdrsize, sumbytes } => {
                write!(f, " - header size = {hdrsize}, summary size = {sumbytes}")
            }
            Self::BigSum {
                sumbytes,
                pseg_bytes,
            } => write!(f, " - summary size = {sumbytes}, pseg size = {pseg_bytes}"),
        }
    }
}

/// Classified reasons a finfo walk stops
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileError {
    /// File block range runs past the end of the log
    ManyBlks {
        blkoff: u64,
        nblocks: u32,
        pseg_nblocks: u32,
    },
    /// More data blocks than blocks altogether
    BlkCnt { nblocks: u32, ndatablk: u32 },
    /// Record would extend past the declared summary size
    Overrun {
        offset: u64,
        sumlen: u64,
        sumbytes: u32,
    },
}

impl FileError {
    pub fn code(&self) -> u32 {
        match self {
            Self::ManyBlks { .. } => 1,
            Self::BlkCnt { .. } => 2,
            Self::Overrun { .. } => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ManyBlks { .. } => "too many blocks",
            Self::BlkCnt { .. } => "invalid block count",
            Self::Overrun { .. } => "summary overrun",
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {} ({})", self.code(), self.name())?;
        match self {
            Self::ManyBlks {
                blkoff,
                nblocks,
                pseg_nblocks,
            } => write!(
                f,
                " - file blkoff = {blkoff}, file blkcnt = {nblocks}, pseg blkcnt = {pseg_nblocks}"
            ),
            Self::BlkCnt { nblocks, ndatablk } => {
                write!(f, " - file blkcnt = {nblocks}, data blkcnt = {ndatablk}")
            }
            Self::Overrun {
                offset,
                sumlen,
                sumbytes,
            } => write!(
                f,
                " - finfo offset = {offset}, finfo total size = {sumlen}, summary size = {sumbytes}"
            ),
        }
    }
}

/// Cursor over a summary area that honors the no-straddle rule
struct SummaryCursor<'a> {
    area: &'a [u8],
    block_size: usize,
    pos: usize,
}

impl<'a> SummaryCursor<'a> {
    fn new(area: &'a [u8], block_size: usize, start: usize) -> Self {
        Self {
            area,
            block_size,
            pos: start,
        }
    }

    /// Where the next entry of `size` bytes starts, skipping the tail of
    /// the current block when the entry would not fit
    fn entry_pos(&self, size: usize) -> usize {
        let in_block = self.pos % self.block_size;
        if in_block + size > self.block_size {
            self.pos + (self.block_size - in_block)
        } else {
            self.pos
        }
    }

    fn read<T: FromBytes>(&mut self) -> Option<T> {
        let size = size_of::<T>();
        let pos = self.entry_pos(size);
        let bytes = self.area.get(pos..pos + size)?;
        let value = T::read_from_bytes(bytes).ok()?;
        self.pos = pos + size;
        Some(value)
    }
}

/// One decoded block-info record together with its on-disk block number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRecord {
    /// Data block of a virtually addressed file
    VirtualData {
        vblocknr: u64,
        blkoff: u64,
        blocknr: u64,
    },
    /// Node block of a virtually addressed file
    VirtualNode { vblocknr: u64, blocknr: u64 },
    /// Data block of the DAT file
    RealData { blkoff: u64, blocknr: u64 },
    /// Node block of the DAT file
    RealNode { blkoff: u64, level: u8, blocknr: u64 },
}

impl BlockRecord {
    /// On-disk location of the block
    pub fn blocknr(&self) -> u64 {
        match *self {
            Self::VirtualData { blocknr, .. }
            | Self::VirtualNode { blocknr, .. }
            | Self::RealData { blocknr, .. }
            | Self::RealNode { blocknr, .. } => blocknr,
        }
    }

    /// Whether this is a data block record
    pub fn is_data(&self) -> bool {
        matches!(self, Self::VirtualData { .. } | Self::RealData { .. })
    }
}

/// One decoded finfo record and its block entries
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Inode number of the file
    pub ino: u64,
    /// Checkpoint number the blocks belong to
    pub cno: u64,
    /// Total number of blocks
    pub nblocks: u32,
    /// Number of data blocks among them
    pub ndatablk: u32,
    /// On-disk location of the file's first block in this log
    pub blocknr: u64,
    /// Decoded block entries, data blocks first
    pub blocks: Vec<BlockRecord>,
}

/// Walks the finfo records of one log's summary area
pub struct FileWalker<'a> {
    cursor: SummaryCursor<'a>,
    nfinfo: u32,
    sumbytes: u32,
    pseg_nblocks: u32,
    log_start: u64,
    fblocknr: u64,
    consumed: u32,
    error: Option<FileError>,
}

impl<'a> FileWalker<'a> {
    /// Walk the summary area of the log starting at `log_start`
    ///
    /// `area` must cover the summary from the log's first block; entries
    /// are consumed beginning at the declared header size.
    pub fn new(
        summary: &SegmentSummary,
        area: &'a [u8],
        log_start: u64,
        block_size: usize,
    ) -> Self {
        let sumbytes = summary.sumbytes.get();
        Self {
            cursor: SummaryCursor::new(area, block_size, summary.bytes.get() as usize),
            nfinfo: summary.nfinfo.get(),
            sumbytes,
            pseg_nblocks: summary.nblocks.get(),
            log_start,
            fblocknr: log_start + (sumbytes as u64).div_ceil(block_size as u64),
            consumed: 0,
            error: None,
        }
    }

    /// The classified error that stopped the walk, if any
    pub fn error(&self) -> Option<&FileError> {
        self.error.as_ref()
    }

    fn overrun(&mut self, offset: usize, sumlen: usize) -> Option<FileRecord> {
        self.error = Some(FileError::Overrun {
            offset: offset as u64,
            sumlen: sumlen as u64,
            sumbytes: self.sumbytes,
        });
        None
    }

    /// Decode the next finfo record, or `None` once all records are
    /// consumed or an error was classified
    pub fn next_file(&mut self) -> Option<FileRecord> {
        if self.error.is_some() || self.consumed >= self.nfinfo {
            return None;
        }
        self.consumed += 1;

        const FINFO_SIZE: usize = size_of::<Finfo>();
        let start = self.cursor.entry_pos(FINFO_SIZE);
        if start + FINFO_SIZE > self.sumbytes as usize {
            return self.overrun(start, FINFO_SIZE);
        }
        let Some(finfo) = self.cursor.read::<Finfo>() else {
            return self.overrun(start, FINFO_SIZE);
        };

        let ino = finfo.ino.get();
        let nblocks = finfo.nblocks.get();
        let ndatablk = finfo.ndatablk.get();

        if ndatablk > nblocks {
            self.error = Some(FileError::BlkCnt { nblocks, ndatablk });
            return None;
        }

        let blkoff = self.fblocknr - self.log_start;
        if blkoff + nblocks as u64 > self.pseg_nblocks as u64 {
            self.error = Some(FileError::ManyBlks {
                blkoff,
                nblocks,
                pseg_nblocks: self.pseg_nblocks,
            });
            return None;
        }

        let nnodeblk = nblocks - ndatablk;
        let real = ino_uses_real_blocknr(ino);
        let (data_size, node_size) = if real {
            (size_of::<U64>(), size_of::<BinfoDat>())
        } else {
            (size_of::<BinfoV>(), size_of::<U64>())
        };
        let sumlen =
            FINFO_SIZE + ndatablk as usize * data_size + nnodeblk as usize * node_size;
        if start + sumlen > self.sumbytes as usize {
            return self.overrun(start, sumlen);
        }

        let first_blocknr = self.fblocknr;
        let mut blocks = Vec::with_capacity(nblocks as usize);
        if real {
            for _ in 0..ndatablk {
                let Some(off) = self.cursor.read::<U64>() else {
                    return self.overrun(start, sumlen);
                };
                blocks.push(BlockRecord::RealData {
                    blkoff: off.get(),
                    blocknr: self.fblocknr,
                });
                self.fblocknr += 1;
            }
            for _ in 0..nnodeblk {
                let Some(binfo) = self.cursor.read::<BinfoDat>() else {
                    return self.overrun(start, sumlen);
                };
                blocks.push(BlockRecord::RealNode {
                    blkoff: binfo.blkoff.get(),
                    level: binfo.level,
                    blocknr: self.fblocknr,
                });
                self.fblocknr += 1;
            }
        } else {
            for _ in 0..ndatablk {
                let Some(binfo) = self.cursor.read::<BinfoV>() else {
                    return self.overrun(start, sumlen);
                };
                blocks.push(BlockRecord::VirtualData {
                    vblocknr: binfo.vblocknr.get(),
                    blkoff: binfo.blkoff.get(),
                    blocknr: self.fblocknr,
                });
                self.fblocknr += 1;
            }
            for _ in 0..nnodeblk {
                let Some(vblocknr) = self.cursor.read::<U64>() else {
                    return self.overrun(start, sumlen);
                };
                blocks.push(BlockRecord::VirtualNode {
                    vblocknr: vblocknr.get(),
                    blocknr: self.fblocknr,
                });
                self.fblocknr += 1;
            }
        }

        Some(FileRecord {
            ino,
            cno: finfo.cno.get(),
            nblocks,
            ndatablk,
            blocknr: first_blocknr,
            blocks,
        })
    }
}

/// One whole physical segment read into memory for inspection
#[derive(Debug)]
pub struct SegmentImage {
    /// Segment number
    pub segnum: u64,
    /// Start block of the segment
    pub blocknr: u64,
    /// Blocks the segment spans
    pub nblocks: u32,
    block_size: usize,
    bytes: Vec<u8>,
}

impl SegmentImage {
    /// Read segment `segnum` off the volume
    pub fn read(vol: &Volume, segnum: u64) -> Result<Self, Error> {
        let geo = &vol.geo;
        if segnum >= geo.nsegments {
            return SegnumOutOfRangeSnafu {
                segnum,
                nsegments: geo.nsegments,
            }
            .fail();
        }

        let blocknr = geo.segment_start(segnum);
        // Segment 0 loses its leading blocks to block 0 and the superblock
        let nblocks = if segnum == 0 {
            (geo.blocks_per_segment as u64).saturating_sub(geo.first_data_block) as u32
        } else {
            geo.blocks_per_segment
        };

        vol.prefetch_segment(segnum);
        let bytes = vol.read_blocks(blocknr, nblocks)?;
        Ok(Self {
            segnum,
            blocknr,
            nblocks,
            block_size: vol.block_size(),
            bytes,
        })
    }

    /// Iterate the partial segments of the image
    pub fn psegs(&self) -> PsegIter<'_> {
        PsegIter {
            image: self,
            offset: 0,
            error: None,
            done: false,
        }
    }
}

/// One partial segment yielded by [`PsegIter`]
#[derive(Debug)]
pub struct Pseg<'a> {
    /// Start block of the log
    pub blocknr: u64,
    /// The log's summary header
    pub summary: SegmentSummary,
    area: &'a [u8],
    block_size: usize,
}

impl<'a> Pseg<'a> {
    /// Walk the finfo records of this log
    pub fn files(&self) -> FileWalker<'a> {
        FileWalker::new(&self.summary, self.area, self.blocknr, self.block_size)
    }
}

/// Iterates the logs of a segment image until the chain ends or an error
/// is classified
pub struct PsegIter<'a> {
    image: &'a SegmentImage,
    offset: u32,
    error: Option<PsegError>,
    done: bool,
}

impl PsegIter<'_> {
    /// The classified error that stopped iteration, if any
    pub fn error(&self) -> Option<&PsegError> {
        self.error.as_ref()
    }
}

fn classify(summary: &SegmentSummary, offset: u32, total: u32, block_size: usize) -> Option<PsegError> {
    let hdrsize = summary.bytes.get();
    let nblocks = summary.nblocks.get();
    let sumbytes = summary.sumbytes.get();

    if hdrsize < SEGSUM_MIN_BYTES || hdrsize % 8 != 0 {
        return Some(PsegError::Alignment { hdrsize });
    }
    if nblocks == 0 || nblocks > total - offset {
        return Some(PsegError::BigPseg {
            nblocks,
            excess: (offset + nblocks).saturating_sub(total),
        });
    }
    if hdrsize as u32 > sumbytes {
        return Some(PsegError::BigHdr { hdrsize, sumbytes });
    }
    let pseg_bytes = nblocks as u64 * block_size as u64;
    if sumbytes as u64 > pseg_bytes {
        return Some(PsegError::BigSum {
            sumbytes,
            pseg_bytes,
        });
    }
    None
}

impl<'a> Iterator for PsegIter<'a> {
    type Item = Pseg<'a>;

    fn next(&mut self) -> Option<Pseg<'a>> {
        if self.done {
            return None;
        }
        if self.offset >= self.image.nblocks {
            self.done = true;
            return None;
        }

        let block_size = self.image.block_size;
        let base = self.offset as usize * block_size;
        let header = &self.image.bytes[base..base + size_of::<SegmentSummary>()];
        let summary = SegmentSummary::read_from_bytes(header).ok()?;

        if !summary.check_magic() {
            self.done = true;
            return None;
        }
        if let Some(error) = classify(&summary, self.offset, self.image.nblocks, block_size) {
            self.error = Some(error);
            self.done = true;
            return None;
        }

        let nblocks = summary.nblocks.get();
        let area_blocks = (summary.sumbytes.get() as usize)
            .div_ceil(block_size)
            .clamp(1, nblocks as usize);
        let area = &self.image.bytes[base..base + area_blocks * block_size];

        let pseg = Pseg {
            blocknr: self.image.blocknr + self.offset as u64,
            summary,
            area,
            block_size,
        };
        self.offset += nblocks;
        Some(pseg)
    }
}
