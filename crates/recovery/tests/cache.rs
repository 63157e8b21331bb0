// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Segment scanning and cache lifecycle

mod common;

use common::*;
use ondisk::SummaryFlags;
use recovery::{SegmentCache, log_is_valid};

#[test_log::test]
fn links_contiguous_logs_of_one_sequence() {
    let mut img = ImageBuilder::new(4);
    let s1 = img.segment_start(1);
    img.write_log(s1, 5, SummaryFlags::LOGBGN, 3, Some(1), 0, &[]);
    img.write_log(s1 + 3, 5, SummaryFlags::LOGEND, 2, Some(1), 0, &[]);
    // a later logical segment begins here and must not be linked
    img.write_log(s1 + 5, 6, SummaryFlags::LOGBGN, 2, Some(2), 0, &[]);

    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);
    let mut cache = SegmentCache::new();

    let seg = cache
        .load_segment(&vol, 1)
        .expect("scan")
        .expect("segment present");
    assert_eq!(seg.segseq, 5);
    assert_eq!(seg.nlogs(), 2);
    assert!(seg.logs().iter().all(|log| log.summary.seq.get() == 5));
    assert_eq!(seg.log_length(), 5);
    assert_eq!(seg.lookup_log(s1 + 3).expect("tail log").nblocks(), 2);
    assert!(seg.lookup_log(s1 + 1).is_none());
    assert_eq!(seg.first_log().expect("head").log_start, s1);
    assert_eq!(seg.last_log().expect("tail").log_start, s1 + 3);
    assert_eq!(seg.next_log(0).expect("after head").log_start, s1 + 3);
    assert_eq!(seg.prev_log(1).expect("before tail").log_start, s1);
    assert!(seg.prev_log(0).is_none());
    assert!(seg.next_log(1).is_none());
}

#[test_log::test]
fn exact_fit_tail_log_terminates_enumeration() {
    let mut img = ImageBuilder::new(4);
    let s1 = img.segment_start(1);
    img.write_log(s1, 5, SummaryFlags::LOGBGN, 3, Some(1), 0, &[]);
    // ends exactly at the segment boundary
    img.write_log(
        s1 + 3,
        5,
        SummaryFlags::LOGEND | SummaryFlags::SR,
        BLOCKS_PER_SEGMENT - 3,
        Some(1),
        0,
        &[],
    );

    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);
    let mut cache = SegmentCache::new();

    let seg = cache
        .load_segment(&vol, 1)
        .expect("scan")
        .expect("segment present");
    assert_eq!(seg.nlogs(), 2);
    assert_eq!(seg.log_length(), BLOCKS_PER_SEGMENT as u64);
    assert_eq!(seg.last_super_root_index(), Some(1));
}

#[test_log::test]
fn empty_segment_is_not_cached() {
    let img = ImageBuilder::new(4);
    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);
    let mut cache = SegmentCache::new();

    assert!(cache.load_segment(&vol, 2).expect("scan").is_none());
    assert!(cache.lookup(2).is_none());
    assert!(cache.is_empty());
}

#[test_log::test]
fn corrupted_payload_invalidates_the_log() {
    let mut img = ImageBuilder::new(4);
    let s1 = img.segment_start(1);
    img.write_log(s1, 5, SummaryFlags::LOGBGN | SummaryFlags::LOGEND, 2, Some(1), 0, &[]);
    // flip one payload byte after checksumming
    img.block_mut(s1 + 1)[17] ^= 0xff;

    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);
    let mut cache = SegmentCache::new();

    let summary = {
        let seg = cache.load_segment(&vol, 1).expect("scan");
        assert!(seg.is_none(), "corrupt first log must reject the segment");
        vol.read_summary(s1).expect("summary readable")
    };
    assert!(!log_is_valid(&vol, s1, &summary).expect("validate"));
}

#[test_log::test]
fn shrink_drops_only_unpinned_segments() {
    let mut img = ImageBuilder::new(4);
    for segnum in 1..=2u64 {
        let start = img.segment_start(segnum);
        img.write_log(
            start,
            segnum,
            SummaryFlags::LOGBGN | SummaryFlags::LOGEND,
            2,
            Some(1),
            0,
            &[],
        );
    }

    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);
    let mut cache = SegmentCache::new();

    let pinned = cache
        .load_segment(&vol, 1)
        .expect("scan")
        .expect("segment present");
    drop(
        cache
            .load_segment(&vol, 2)
            .expect("scan")
            .expect("segment present"),
    );
    assert_eq!(cache.len(), 2);

    assert_eq!(cache.shrink(), 1);
    assert!(cache.lookup(1).is_some());
    assert!(cache.lookup(2).is_none());
    drop(pinned);

    assert_eq!(cache.shrink(), 1);
    assert!(cache.is_empty());
}

#[test_log::test]
fn cached_segment_is_returned_without_rescanning() {
    let mut img = ImageBuilder::new(4);
    let s1 = img.segment_start(1);
    img.write_log(s1, 5, SummaryFlags::LOGBGN | SummaryFlags::LOGEND, 2, Some(1), 0, &[]);

    let sb = img.base_super_block();
    let file = img.write_image();
    let vol = open_volume(&file, &sb);
    let mut cache = SegmentCache::new();

    let first = cache.load_segment(&vol, 1).expect("scan").expect("present");
    let second = cache.load_segment(&vol, 1).expect("scan").expect("present");
    assert!(std::rc::Rc::ptr_eq(&first, &second));
}
