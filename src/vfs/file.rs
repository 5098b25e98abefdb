// SPDX-License-Identifier: MPL-2.0 OR LGPL-3.0-or-later
/*
 * lxcore: Linux personality core (signals + VFS) for user-space emulators
 * Copyright (C) 2019-2025 SUSE LLC
 * Copyright (C) 2019-2025 Aleksa Sarai <cyphar@cyphar.com>
 *
 * == MPL-2.0 ==
 *
 *  This Source Code Form is subject to the terms of the Mozilla Public
 *  License, v. 2.0. If a copy of the MPL was not distributed with this
 *  file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Alternatively, this Source Code Form may also (at your option) be used
 * under the terms of the GNU Lesser General Public License Version 3, as
 * described below:
 *
 * == LGPL-3.0-or-later ==
 *
 *  This program is free software: you can redistribute it and/or modify it
 *  under the terms of the GNU Lesser General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or (at
 *  your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful, but
 *  WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY  or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General
 * Public License  for more details.
 *
 *  You should have received a copy of the GNU Lesser General Public License
 *  along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Filesystem and file capability traits.
//!
//! A filesystem is a record of optional path operations; a provided default
//! body stands in for an absent entry and reports
//! [`NotSupported`](crate::error::ErrorKind::NotSupported), which the
//! resolver treats as "nothing at this component" and the syscall layer
//! maps to an operation-appropriate errno. Dispatch stays open: any
//! `Arc<dyn FileSystem>` can be mounted without touching the core.

use crate::{
    error::{Error, ErrorImpl},
    host::GuestMemory,
    vfs::{dirent::DirentSink, poll::PollEvents, stat::{FileStat, FsStat, Timespec}},
};

use std::sync::{atomic::{AtomicU32, Ordering}, Arc};

bitflags! {
    /// Guest open(2) flags (asm-generic values).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const O_WRONLY    = 0o1;
        const O_RDWR      = 0o2;
        const O_CREAT     = 0o100;
        const O_EXCL      = 0o200;
        const O_NOCTTY    = 0o400;
        const O_TRUNC     = 0o1000;
        const O_APPEND    = 0o2000;
        const O_NONBLOCK  = 0o4000;
        const O_DSYNC     = 0o10000;
        const O_DIRECTORY = 0o200000;
        const O_NOFOLLOW  = 0o400000;
        const O_LARGEFILE = 0o100000;
        const O_CLOEXEC   = 0o2000000;
    }
}

impl OpenFlags {
    pub const O_ACCMODE: u32 = 0o3;

    pub fn from_guest(flags: i32) -> Self {
        Self::from_bits_retain(flags as u32)
    }

    pub fn access_mode(self) -> u32 {
        self.bits() & Self::O_ACCMODE
    }

    pub fn readable(self) -> bool {
        self.access_mode() != Self::O_WRONLY.bits()
    }

    pub fn writable(self) -> bool {
        matches!(self.access_mode(), 0o1 | 0o2)
    }

    /// The flags fcntl(F_SETFL) may change.
    pub fn settable(self) -> Self {
        self & (Self::O_APPEND | Self::O_NONBLOCK)
    }
}

bitflags! {
    /// Per-descriptor flags. FD_CLOEXEC is the only one Linux defines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FdFlags: u32 {
        const CLOEXEC = 1;
    }
}

impl From<OpenFlags> for FdFlags {
    fn from(flags: OpenFlags) -> Self {
        if flags.contains(OpenFlags::O_CLOEXEC) {
            FdFlags::CLOEXEC
        } else {
            FdFlags::empty()
        }
    }
}

/// Guest-visible file types, carried by stat modes and dirent type bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileType {
    /// DT_* value for dirent records.
    pub fn dirent_type(self) -> u8 {
        match self {
            FileType::Fifo => 1,
            FileType::CharDevice => 2,
            FileType::Directory => 4,
            FileType::BlockDevice => 6,
            FileType::Regular => 8,
            FileType::Symlink => 10,
            FileType::Socket => 12,
        }
    }

    /// S_IF* bits for stat modes.
    pub fn mode_bits(self) -> u32 {
        match self {
            FileType::Fifo => 0o010000,
            FileType::CharDevice => 0o020000,
            FileType::Directory => 0o040000,
            FileType::BlockDevice => 0o060000,
            FileType::Regular => 0o100000,
            FileType::Symlink => 0o120000,
            FileType::Socket => 0o140000,
        }
    }
}

/// lseek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Cur,
    End,
}

impl SeekWhence {
    pub fn from_guest(whence: u32) -> Result<Self, Error> {
        match whence {
            0 => Ok(SeekWhence::Set),
            1 => Ok(SeekWhence::Cur),
            2 => Ok(SeekWhence::End),
            _ => Err(ErrorImpl::InvalidArgument {
                name: "whence".into(),
                description: "unknown lseek origin".into(),
            }
            .into()),
        }
    }
}

/// What a filesystem's `open` produced.
pub enum OpenOutcome {
    Opened(Arc<dyn File>),
    /// The leaf is a symlink (and the open did not want one); the resolver
    /// splices the target and retries.
    Symlink(Vec<u8>),
}

impl std::fmt::Debug for OpenOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenOutcome::Opened(_) => f.write_str("Opened(..)"),
            OpenOutcome::Symlink(target) => f
                .debug_tuple("Symlink")
                .field(&String::from_utf8_lossy(target))
                .finish(),
        }
    }
}

pub(crate) fn unsupported<T>(operation: &'static str) -> Result<T, Error> {
    Err(ErrorImpl::NotSupported {
        operation: operation.into(),
    }
    .into())
}

/// A mounted filesystem: a record of optional path operations, addressed by
/// mount-relative paths (no leading `/`; empty means the mount root).
pub trait FileSystem: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, _path: &[u8], _flags: OpenFlags, _mode: u32) -> Result<OpenOutcome, Error> {
        unsupported("open")
    }

    fn link(&self, _oldpath: &[u8], _newpath: &[u8]) -> Result<(), Error> {
        unsupported("link")
    }

    fn unlink(&self, _path: &[u8]) -> Result<(), Error> {
        unsupported("unlink")
    }

    fn symlink(&self, _target: &[u8], _path: &[u8]) -> Result<(), Error> {
        unsupported("symlink")
    }

    fn readlink(&self, _path: &[u8]) -> Result<Vec<u8>, Error> {
        unsupported("readlink")
    }

    fn mkdir(&self, _path: &[u8], _mode: u32) -> Result<(), Error> {
        unsupported("mkdir")
    }

    fn rmdir(&self, _path: &[u8]) -> Result<(), Error> {
        unsupported("rmdir")
    }

    fn rename(&self, _oldpath: &[u8], _newpath: &[u8]) -> Result<(), Error> {
        unsupported("rename")
    }
}

/// Open-flags cell shared by file implementations (fcntl F_GETFL/F_SETFL
/// mutate flags on a live file object).
#[derive(Debug)]
pub struct FlagsCell(AtomicU32);

impl FlagsCell {
    pub fn new(flags: OpenFlags) -> Self {
        Self(AtomicU32::new(flags.bits()))
    }

    pub fn get(&self) -> OpenFlags {
        OpenFlags::from_bits_retain(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, flags: OpenFlags) {
        self.0.store(flags.bits(), Ordering::Relaxed);
    }
}

/// An opened file object.
///
/// Files are shared as `Arc<dyn File>`; the strong count is the reference
/// count of the data model (descriptor slots and borrows each hold one).
/// Dropping the last reference closes the resource, exactly once, through
/// the implementation's `Drop`.
pub trait File: Send + Sync {
    /// Guest-visible open flags (fcntl F_GETFL).
    fn flags(&self) -> OpenFlags;

    /// Replace the settable status flags (fcntl F_SETFL).
    fn set_flags(&self, flags: OpenFlags);

    fn read(&self, _buf: &mut [u8]) -> Result<usize, Error> {
        unsupported("read")
    }

    fn write(&self, _buf: &[u8]) -> Result<usize, Error> {
        unsupported("write")
    }

    fn pread(&self, _buf: &mut [u8], _offset: u64) -> Result<usize, Error> {
        unsupported("pread")
    }

    fn pwrite(&self, _buf: &[u8], _offset: u64) -> Result<usize, Error> {
        unsupported("pwrite")
    }

    fn llseek(&self, _offset: i64, _whence: SeekWhence) -> Result<u64, Error> {
        unsupported("llseek")
    }

    fn stat(&self) -> Result<FileStat, Error> {
        unsupported("stat")
    }

    fn statfs(&self) -> Result<FsStat, Error> {
        unsupported("statfs")
    }

    /// Emit directory entries into `sink`, resuming from the file's internal
    /// directory position, until the sink refuses an entry or the directory
    /// is exhausted.
    fn getdents(&self, _sink: &mut DirentSink<'_>) -> Result<(), Error> {
        unsupported("getdents")
    }

    fn ioctl(&self, _cmd: u32, _arg: u64, _mem: &dyn GuestMemory) -> Result<i64, Error> {
        unsupported("ioctl")
    }

    fn utimens(&self, _atime: Option<Timespec>, _mtime: Option<Timespec>) -> Result<(), Error> {
        unsupported("utimens")
    }

    /// Current readiness, reported with Linux poll bits.
    fn poll_status(&self) -> PollEvents {
        PollEvents::empty()
    }
}
