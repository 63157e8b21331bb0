// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Positioned I/O over the device backing a volume
//!
//! A volume lives either on a block device or in a regular image file. Both
//! are driven through the same handle: positioned reads and writes of exact
//! lengths, size discovery (ioctl for block devices, stat for files) and
//! best-effort readahead hints.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

mod mount;

pub use mount::{MOUNT_TABLE, is_mounted};

nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// Errors that can occur when accessing the device
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to open the device node or image file
    #[error("cannot open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    /// Read came back short or failed outright
    #[error("cannot read {len} bytes at offset {offset}: {source}")]
    Read {
        offset: u64,
        len: usize,
        source: io::Error,
    },

    /// Write came back short or failed outright
    #[error("cannot write {len} bytes at offset {offset}: {source}")]
    Write {
        offset: u64,
        len: usize,
        source: io::Error,
    },

    /// Size query failed
    #[error("cannot query device size: {source}")]
    Size { source: io::Error },

    /// Neither a block device nor a regular file
    #[error("{path} is neither a block device nor a regular file")]
    UnsupportedDeviceKind { path: PathBuf },

    /// Flushing buffered writes to stable storage failed
    #[error("cannot sync device: {source}")]
    Sync { source: io::Error },
}

/// An open handle on the device backing a volume
#[derive(Debug)]
pub struct BlockDevice {
    file: File,
    path: PathBuf,
}

impl BlockDevice {
    /// Open for reading only
    pub fn open_readonly(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self { file, path })
    }

    /// Open for reading and writing
    pub fn open_readwrite(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self { file, path })
    }

    /// Path the handle was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Device size in bytes
    ///
    /// Block devices answer through the `BLKGETSIZE64` ioctl, regular files
    /// through their stat size. Anything else is rejected.
    pub fn size_bytes(&self) -> Result<u64, Error> {
        let metadata = self
            .file
            .metadata()
            .map_err(|source| Error::Size { source })?;
        let file_type = metadata.file_type();

        use std::os::unix::fs::FileTypeExt;
        if file_type.is_block_device() {
            let mut size = 0u64;
            unsafe { blkgetsize64(self.file.as_raw_fd(), &mut size) }.map_err(|errno| {
                Error::Size {
                    source: io::Error::from(errno),
                }
            })?;
            Ok(size)
        } else if file_type.is_file() {
            Ok(metadata.len())
        } else {
            Err(Error::UnsupportedDeviceKind {
                path: self.path.clone(),
            })
        }
    }

    /// Read exactly `buf.len()` bytes at a byte offset
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<(), Error> {
        self.file
            .read_exact_at(buf, offset)
            .map_err(|source| Error::Read {
                offset,
                len: buf.len(),
                source,
            })
    }

    /// Write exactly `buf.len()` bytes at a byte offset
    pub fn write_exact_at(&self, buf: &[u8], offset: u64) -> Result<(), Error> {
        self.file
            .write_all_at(buf, offset)
            .map_err(|source| Error::Write {
                offset,
                len: buf.len(),
                source,
            })
    }

    /// Flush written data to stable storage
    pub fn sync(&self) -> Result<(), Error> {
        self.file.sync_all().map_err(|source| Error::Sync { source })
    }

    /// Hint that a byte range will be read soon
    ///
    /// Best-effort readahead; failures are only traced.
    pub fn prefetch(&self, offset: u64, len: u64) {
        use nix::fcntl::{PosixFadviseAdvice, posix_fadvise};

        if let Err(errno) = posix_fadvise(
            &self.file,
            offset as i64,
            len as i64,
            PosixFadviseAdvice::POSIX_FADV_WILLNEED,
        ) {
            log::trace!("readahead hint at offset {offset} ignored: {errno}");
        }
    }
}
