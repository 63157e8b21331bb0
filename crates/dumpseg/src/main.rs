// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Dump the logs of NILFS2 segments
//!
//! Walks the partial segments of each requested segment and prints their
//! summaries, per-file records and block entries. Malformed structures are
//! reported with a classified error and the walk of that log stops.

use std::path::PathBuf;
use std::process::exit;

use anyhow::{Context, Result, anyhow};
use blockdev::BlockDevice;
use clap::Parser;
use ondisk::Geometry;
use recovery::sb::read_sb_pair;
use recovery::{BlockRecord, Pseg, SegmentImage, Volume};

/// Print NILFS2 segment information
#[derive(Debug, Parser)]
#[command(name = "nilfs-dumpseg", version)]
struct Cli {
    /// Device or image holding the volume
    device: PathBuf,

    /// Segment numbers to dump
    #[arg(required = true)]
    segnums: Vec<String>,
}

fn format_time(epoch: u64) -> String {
    chrono::DateTime::from_timestamp(epoch as i64, 0)
        .map(|t| t.with_timezone(&chrono::Local).format("%F %T").to_string())
        .unwrap_or_else(|| epoch.to_string())
}

fn print_block(record: &BlockRecord) {
    match *record {
        BlockRecord::VirtualData {
            vblocknr,
            blkoff,
            blocknr,
        } => println!("        vblocknr = {vblocknr}, blkoff = {blkoff}, blocknr = {blocknr}"),
        BlockRecord::VirtualNode { vblocknr, blocknr } => {
            println!("        vblocknr = {vblocknr}, blocknr = {blocknr}")
        }
        BlockRecord::RealData { blkoff, blocknr } => {
            println!("        blkoff = {blkoff}, blocknr = {blocknr}")
        }
        BlockRecord::RealNode {
            blkoff,
            level,
            blocknr,
        } => println!("        blkoff = {blkoff}, level = {level}, blocknr = {blocknr}"),
    }
}

fn print_pseg(pseg: &Pseg) {
    println!(
        "  partial segment: blocknr = {}, nblocks = {}",
        pseg.blocknr,
        pseg.summary.nblocks.get()
    );
    println!(
        "    creation time = {}",
        format_time(pseg.summary.create.get())
    );
    println!("    nfinfo = {}", pseg.summary.nfinfo.get());

    let mut files = pseg.files();
    while let Some(file) = files.next_file() {
        println!("    finfo");
        println!(
            "      ino = {}, cno = {}, nblocks = {}, ndatblk = {}",
            file.ino, file.cno, file.nblocks, file.ndatablk
        );
        for record in &file.blocks {
            print_block(record);
        }
    }
    if let Some(err) = files.error() {
        println!("    {err}");
    }
}

fn print_segment(image: &SegmentImage, geo: &Geometry) {
    println!("segment: segnum = {}", image.segnum);

    let mut psegs = image.psegs();
    let mut first = true;
    for pseg in psegs.by_ref() {
        if first {
            println!(
                "  sequence number = {}, next segnum = {}",
                pseg.summary.seq.get(),
                pseg.summary.next.get() / geo.blocks_per_segment as u64
            );
            first = false;
        }
        print_pseg(&pseg);
    }
    if let Some(err) = psegs.error() {
        println!("  {err}");
    }
}

fn open_volume(device: &PathBuf) -> Result<Volume> {
    let dev = BlockDevice::open_readonly(device)?;
    let pair = read_sb_pair(&dev)?;
    let sb = pair
        .latest()
        .ok_or_else(|| anyhow!("cannot read super block (device = {})", device.display()))?;
    let geo = Geometry::from_super_block(sb).context("unusable super block")?;
    Ok(Volume::new(dev, geo))
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let failed = !matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            exit(if failed { 1 } else { 0 });
        }
    };
    env_logger::init();

    let vol = match open_volume(&cli.device) {
        Ok(vol) => vol,
        Err(err) => {
            eprintln!("nilfs-dumpseg: {err:#}");
            exit(1);
        }
    };

    let mut status = 0;
    for arg in &cli.segnums {
        // reject non-numeric arguments individually, keep going
        let Ok(segnum) = arg.parse::<u64>() else {
            eprintln!("nilfs-dumpseg: {arg}: invalid segment number");
            status = 1;
            continue;
        };

        match SegmentImage::read(&vol, segnum) {
            Ok(image) => print_segment(&image, &vol.geo),
            Err(err) => {
                eprintln!("nilfs-dumpseg: failed to read segment: {err}");
                status = 1;
                break;
            }
        }
    }
    exit(status);
}
