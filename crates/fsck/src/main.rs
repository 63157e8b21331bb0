// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Offline superblock rollback for NILFS2 volumes
//!
//! Confirms that the superblock points at a valid super-root log and, when
//! it does not, searches the segment ring for the most recent one and
//! rewrites both superblock copies so that mounting resumes from it.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use blockdev::{BlockDevice, MOUNT_TABLE, is_mounted};
use clap::Parser;
use ondisk::{Geometry, SbState, SuperBlock};
use recovery::sb::{commit_super_block, read_sb_pair, write_super_block_pair};
use recovery::{Error as ScanError, LogRef, SegmentCache, Volume, do_rollback, test_latest_log};

/// No inconsistencies found
const EXIT_OK: i32 = 0;
/// Inconsistencies were repaired without data loss beyond the rollback
const EXIT_NONDESTRUCT: i32 = 1;
/// Operational failure: I/O, no super root, mounted device
const EXIT_ERROR: i32 = 8;
/// Bad command line
const EXIT_USAGE: i32 = 16;
/// User declined the repair
const EXIT_CANCEL: i32 = 32;

/// Check a NILFS2 volume and repoint its superblock at the latest
/// recoverable checkpoint
#[derive(Debug, Parser)]
#[command(name = "nilfs-fsck0", version)]
struct Cli {
    /// Overwrite the superblock without prompting
    #[arg(short = 'f')]
    force: bool,

    /// Verbose scan progress
    #[arg(short = 'v')]
    verbose: bool,

    /// Device or image holding the volume
    device: PathBuf,
}

fn format_time(epoch: u64) -> String {
    chrono::DateTime::from_timestamp(epoch as i64, 0)
        .map(|t| t.with_timezone(&chrono::Local).format("%F %T").to_string())
        .unwrap_or_else(|| epoch.to_string())
}

/// Report a log reference the way the kernel log prints them
fn print_log_message(log_ref: &LogRef, geo: &Geometry, msg: &str) {
    let pad: String = msg.chars().take_while(|c| *c == ' ').collect();
    eprintln!("{msg}: blocknr = {}", log_ref.blocknr);
    eprintln!(
        "{pad}    segnum = {}, seq = {}, cno = {}",
        geo.segment_of(log_ref.blocknr),
        log_ref.seqnum,
        log_ref.cno
    );
    if log_ref.ctime != 0 {
        eprintln!("{pad}    creation time = {}", format_time(log_ref.ctime));
    }
}

fn print_sb_info(sb: &SuperBlock, geo: &Geometry) {
    eprintln!("Super-block:");
    eprintln!(
        "    revision = {}.{}",
        sb.rev_level.get(),
        sb.minor_rev_level.get()
    );
    eprintln!("    blocksize = {}", geo.block_size);
    eprintln!("    write time = {}", format_time(sb.wtime.get()));
}

fn confirm_overwrite() -> Result<bool> {
    eprint!("Do you wish to overwrite super block (y/N)? ");
    io::stderr().flush().ok();
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("cannot read answer")?;
    Ok(matches!(answer.trim(), "y" | "Y"))
}

fn run(cli: &Cli) -> Result<i32> {
    let device = cli.device.as_path();
    if is_mounted(device, Path::new(MOUNT_TABLE))
        .with_context(|| format!("cannot consult {MOUNT_TABLE}"))?
    {
        bail!("{} is currently mounted.", device.display());
    }

    let dev = BlockDevice::open_readonly(device)?;
    let pair = read_sb_pair(&dev)?;
    let sb = pair
        .latest()
        .ok_or_else(|| anyhow!("cannot read super block (device = {})", device.display()))?;
    let mut sb = sb.clone();

    let geo = Geometry::from_super_block(&sb)?;
    print_sb_info(&sb, &geo);

    let mut log_ref = LogRef::from_super_block(&sb);
    print_log_message(&log_ref, &geo, "    indicated log");
    eprintln!();

    let clean = sb.state().contains(SbState::VALID_FS);
    eprintln!("{}", if clean { "Clean FS." } else { "Unclean FS." });

    let vol = Volume::new(dev, geo);
    let mut cache = SegmentCache::new();

    if test_latest_log(&vol, &mut cache, &mut log_ref)? {
        print_log_message(
            &log_ref,
            &geo,
            "A valid log is pointed to by superblock (No change needed)",
        );
        if !clean {
            eprintln!("Recovery will complete on mount.");
        }
        return Ok(EXIT_OK);
    }

    eprintln!("The latest log is lost. Trying rollback recovery..");
    do_rollback(&vol, &mut cache, &mut log_ref)?;
    print_log_message(&log_ref, &geo, "Selected log");
    drop(vol);

    // reopen for writing; the mount table may have changed while scanning
    if is_mounted(device, Path::new(MOUNT_TABLE))
        .with_context(|| format!("cannot consult {MOUNT_TABLE}"))?
    {
        bail!("{} is currently mounted.", device.display());
    }
    let dev = BlockDevice::open_readwrite(device)?;

    if !cli.force && !confirm_overwrite()? {
        return Ok(EXIT_CANCEL);
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before epoch")?
        .as_secs();
    commit_super_block(&mut sb, &log_ref, now);
    match write_super_block_pair(&dev, &sb, &geo) {
        Ok(()) => {}
        Err(err @ ScanError::PartialSuperBlockWrite { .. }) => {
            log::warn!("{err}");
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("couldn't update super block (device = {})", device.display()));
        }
    }

    eprintln!("Recovery will complete on mount.");
    Ok(EXIT_NONDESTRUCT)
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err)
            if matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            exit(EXIT_OK);
        }
        Err(err) => {
            let _ = err.print();
            exit(EXIT_USAGE);
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();

    match run(&cli) {
        Ok(code) => exit(code),
        Err(err) => {
            eprintln!("nilfs-fsck0: {err:#}");
            exit(EXIT_ERROR);
        }
    }
}
