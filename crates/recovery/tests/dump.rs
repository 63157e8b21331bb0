// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Segment dump walkers over synthetic images

mod common;

use common::*;
use ondisk::{DAT_INO, SummaryFlags};
use recovery::pseg::{FileError, PsegError};
use recovery::{BlockRecord, SegmentImage};

#[test_log::test]
fn walks_every_log_of_a_segment() {
    let mut img = ImageBuilder::new(4);
    let s1 = img.segment_start(1);
    img.write_log(s1, 5, SummaryFlags::LOGBGN, 3, Some(1), 0, &[]);
    img.write_log(s1 + 3, 5, SummaryFlags::LOGEND, 2, Some(1), 0, &[]);
    // the dump walker is raw: stale logs of an older generation show too
    img.write_log(s1 + 5, 3, SummaryFlags::LOGBGN, 2, Some(1), 0, &[]);

    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);

    let image = SegmentImage::read(&vol, 1).expect("read segment");
    assert_eq!(image.blocknr, s1);
    assert_eq!(image.nblocks, BLOCKS_PER_SEGMENT);

    let mut iter = image.psegs();
    let starts: Vec<u64> = iter.by_ref().map(|pseg| pseg.blocknr).collect();
    assert_eq!(starts, vec![s1, s1 + 3, s1 + 5]);
    assert!(iter.error().is_none());
}

#[test_log::test]
fn segment_zero_accounts_for_reserved_blocks() {
    let mut img = ImageBuilder::new(4);
    let s0 = img.segment_start(0);
    img.write_log(s0, 1, SummaryFlags::LOGBGN | SummaryFlags::LOGEND, 2, Some(1), 0, &[]);

    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);

    let image = SegmentImage::read(&vol, 0).expect("read segment");
    assert_eq!(image.blocknr, FIRST_DATA_BLOCK);
    assert_eq!(image.nblocks, BLOCKS_PER_SEGMENT - FIRST_DATA_BLOCK as u32);
    assert_eq!(image.psegs().count(), 1);
}

#[test_log::test]
fn out_of_range_segment_is_rejected() {
    let img = ImageBuilder::new(4);
    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);

    assert!(SegmentImage::read(&vol, 4).is_err());
}

#[test_log::test]
fn decodes_virtual_and_real_schemas() {
    let mut img = ImageBuilder::new(4);
    let s1 = img.segment_start(1);

    let mut area = Vec::new();
    // ordinary file: 1 data + 1 node block, virtual addressing
    push_finfo(&mut area, 12, 9, 2, 1);
    push_binfo_v(&mut area, 300, 0);
    push_blocknr(&mut area, 301);
    // DAT file: 1 data + 1 node block, real addressing
    push_finfo(&mut area, DAT_INO, 9, 2, 1);
    push_blocknr(&mut area, 5);
    push_binfo_dat(&mut area, 6, 1);
    img.write_log(
        s1,
        5,
        SummaryFlags::LOGBGN | SummaryFlags::LOGEND,
        5,
        Some(9),
        2,
        &area,
    );

    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);

    let image = SegmentImage::read(&vol, 1).expect("read segment");
    let pseg = image.psegs().next().expect("one log");
    assert_eq!(pseg.summary.nfinfo.get(), 2);

    let mut files = pseg.files();

    let plain = files.next_file().expect("virtual file");
    assert_eq!(plain.ino, 12);
    assert_eq!(
        plain.blocks,
        vec![
            BlockRecord::VirtualData {
                vblocknr: 300,
                blkoff: 0,
                blocknr: s1 + 1
            },
            BlockRecord::VirtualNode {
                vblocknr: 301,
                blocknr: s1 + 2
            },
        ]
    );

    let dat = files.next_file().expect("DAT file");
    assert_eq!(dat.ino, DAT_INO);
    assert_eq!(
        dat.blocks,
        vec![
            BlockRecord::RealData {
                blkoff: 5,
                blocknr: s1 + 3
            },
            BlockRecord::RealNode {
                blkoff: 6,
                level: 1,
                blocknr: s1 + 4
            },
        ]
    );

    assert!(files.next_file().is_none());
    assert!(files.error().is_none());
}

#[test_log::test]
fn bad_finfo_block_count_stops_the_walk() {
    let mut img = ImageBuilder::new(4);
    let s1 = img.segment_start(1);

    let mut area = Vec::new();
    push_finfo(&mut area, 12, 9, 1, 1);
    push_binfo_v(&mut area, 300, 0);
    // nine data blocks claimed out of five blocks total
    push_finfo(&mut area, 13, 9, 5, 9);
    img.write_log(
        s1,
        5,
        SummaryFlags::LOGBGN | SummaryFlags::LOGEND,
        8,
        Some(9),
        2,
        &area,
    );

    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);

    let image = SegmentImage::read(&vol, 1).expect("read segment");
    let pseg = image.psegs().next().expect("one log");
    let mut files = pseg.files();

    assert!(files.next_file().is_some());
    assert!(files.next_file().is_none());
    assert_eq!(
        files.error(),
        Some(&FileError::BlkCnt {
            nblocks: 5,
            ndatablk: 9
        })
    );
}

#[test_log::test]
fn oversized_summary_is_classified() {
    let mut img = ImageBuilder::new(4);
    let s2 = img.segment_start(2);
    let mut ss = plain_summary(5, 4, 5 * BLOCK_SIZE as u32);
    ss.flags.set(SummaryFlags::LOGBGN.bits());
    img.write_raw_summary(s2, &ss);

    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);

    let image = SegmentImage::read(&vol, 2).expect("read segment");
    let mut iter = image.psegs();
    assert!(iter.next().is_none());
    assert_eq!(
        iter.error(),
        Some(&PsegError::BigSum {
            sumbytes: 5 * BLOCK_SIZE as u32,
            pseg_bytes: 4 * BLOCK_SIZE as u64
        })
    );
}

#[test_log::test]
fn oversized_header_is_classified() {
    let mut img = ImageBuilder::new(4);
    let s2 = img.segment_start(2);
    let ss = plain_summary(5, 4, 32);
    img.write_raw_summary(s2, &ss);

    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);

    let image = SegmentImage::read(&vol, 2).expect("read segment");
    let mut iter = image.psegs();
    assert!(iter.next().is_none());
    assert_eq!(
        iter.error(),
        Some(&PsegError::BigHdr {
            hdrsize: 64,
            sumbytes: 32
        })
    );
}

#[test_log::test]
fn misaligned_header_is_classified() {
    let mut img = ImageBuilder::new(4);
    let s2 = img.segment_start(2);
    let mut ss = plain_summary(5, 4, 128);
    ss.bytes.set(60);
    img.write_raw_summary(s2, &ss);

    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);

    let image = SegmentImage::read(&vol, 2).expect("read segment");
    let mut iter = image.psegs();
    assert!(iter.next().is_none());
    assert_eq!(iter.error(), Some(&PsegError::Alignment { hdrsize: 60 }));
}

#[test_log::test]
fn log_overrunning_the_segment_is_classified() {
    let mut img = ImageBuilder::new(4);
    let s2 = img.segment_start(2);
    let ss = plain_summary(5, 200, 128);
    img.write_raw_summary(s2, &ss);

    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);

    let image = SegmentImage::read(&vol, 2).expect("read segment");
    let mut iter = image.psegs();
    assert!(iter.next().is_none());
    assert_eq!(
        iter.error(),
        Some(&PsegError::BigPseg {
            nblocks: 200,
            excess: 192
        })
    );
}
