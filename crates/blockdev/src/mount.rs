// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Mount table consultation
//!
//! Rewriting the superblock of a mounted volume corrupts it, so write paths
//! refuse devices that appear as a mount source.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Default mount table consulted before opening a device for writing
pub const MOUNT_TABLE: &str = "/etc/mtab";

/// Returns true when `device` appears as a mount source in `table`
pub fn is_mounted(device: &Path, table: &Path) -> io::Result<bool> {
    let file = File::open(table)?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        let Some(source) = line.split_whitespace().next() else {
            continue;
        };
        if Path::new(source) == device {
            return Ok(true);
        }
    }
    Ok(false)
}
