// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * lxcore: Linux personality core (signals + VFS) for user-space emulators
 * Copyright (C) 2019-2025 Aleksa Sarai <cyphar@cyphar.com>
 * Copyright (C) 2019-2025 SUSE LLC
 *
 * This program is free software: you can redistribute it and/or modify it
 * under the terms of the GNU Lesser General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or (at your
 * option) any later version.
 *
 * This program is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
 * or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License
 * for more details.
 *
 * You should have received a copy of the GNU Lesser General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![forbid(unsafe_code)]

//! The synthetic device filesystem.
//!
//! A handful of character devices the personality cannot run without:
//! `null`, `zero`, `full`, and the console (`console`/`tty`, backed by host
//! standard IO). No symlinks, so the filesystem carries no `readlink`
//! capability and the resolver never probes it.

use crate::{
    error::{Error, ErrorImpl},
    host::GuestMemory,
    uaccess::UserWritePtr,
    vfs::{
        dirent::DirentSink,
        file::{File, FileSystem, FileType, FlagsCell, OpenFlags, OpenOutcome},
        poll::PollEvents,
        stat::{FileStat, FsStat, Timespec},
    },
};

use std::{
    io::Write,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use bytemuck::{Pod, Zeroable};

const DEVTMPFS_MAGIC: i64 = 0x1cd1;

/// (name, inode, (major, minor)) of every node we synthesise.
const NODES: &[(&[u8], u64, (u64, u64))] = &[
    (b"null", 2, (1, 3)),
    (b"zero", 3, (1, 5)),
    (b"full", 4, (1, 7)),
    (b"console", 5, (5, 1)),
    (b"tty", 6, (5, 0)),
];

fn chardev_stat(ino: u64, rdev: (u64, u64)) -> FileStat {
    FileStat {
        dev: DEVTMPFS_MAGIC as u64,
        ino,
        mode: FileType::CharDevice.mode_bits() | 0o666,
        nlink: 1,
        rdev: (rdev.0 << 8) | rdev.1,
        blksize: 4096,
        ..FileStat::default()
    }
}

fn dev_statfs() -> FsStat {
    FsStat {
        fs_type: DEVTMPFS_MAGIC,
        bsize: 4096,
        namelen: 255,
        ..FsStat::default()
    }
}

#[derive(Debug)]
pub struct DevFs;

impl DevFs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl FileSystem for DevFs {
    fn name(&self) -> &str {
        "devfs"
    }

    fn open(&self, path: &[u8], flags: OpenFlags, _mode: u32) -> Result<OpenOutcome, Error> {
        if path.is_empty() || path == b"." {
            return Ok(OpenOutcome::Opened(Arc::new(DevDir {
                flags: FlagsCell::new(flags),
                pos: AtomicUsize::new(0),
            })));
        }
        if flags.contains(OpenFlags::O_DIRECTORY) {
            return Err(ErrorImpl::Errno {
                operation: "open device node as directory".into(),
                errno: libc::ENOTDIR,
            }
            .into());
        }
        let node = NODES.iter().find(|(name, _, _)| *name == path);
        match node {
            Some(&(name, ino, rdev)) => {
                let kind = match name {
                    b"null" => DevKind::Null,
                    b"zero" => DevKind::Zero,
                    b"full" => DevKind::Full,
                    _ => DevKind::Console,
                };
                Ok(OpenOutcome::Opened(Arc::new(DevFile {
                    kind,
                    ino,
                    rdev,
                    flags: FlagsCell::new(flags),
                })))
            }
            None => Err(ErrorImpl::NoEntry {
                path: String::from_utf8_lossy(path).into_owned().into(),
            }
            .into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DevKind {
    Null,
    Zero,
    Full,
    Console,
}

struct DevFile {
    kind: DevKind,
    ino: u64,
    rdev: (u64, u64),
    flags: FlagsCell,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct Winsize {
    ws_row: u16,
    ws_col: u16,
    ws_xpixel: u16,
    ws_ypixel: u16,
}

const TIOCGWINSZ: u32 = 0x5413;

impl File for DevFile {
    fn flags(&self) -> OpenFlags {
        self.flags.get()
    }

    fn set_flags(&self, flags: OpenFlags) {
        self.flags.set(flags);
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.kind {
            DevKind::Null => Ok(0),
            DevKind::Zero | DevKind::Full => {
                buf.fill(0);
                Ok(buf.len())
            }
            // The console is write-oriented here; reads report EOF rather
            // than pretending to have a line discipline.
            DevKind::Console => Ok(0),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        match self.kind {
            DevKind::Null | DevKind::Zero => Ok(buf.len()),
            DevKind::Full => Err(ErrorImpl::Errno {
                operation: "write to /dev/full".into(),
                errno: libc::ENOSPC,
            }
            .into()),
            DevKind::Console => {
                let mut stdout = std::io::stdout().lock();
                stdout
                    .write_all(buf)
                    .and_then(|_| stdout.flush())
                    .map_err(|err| ErrorImpl::OsError {
                        operation: "write to host console".into(),
                        source: err,
                    })?;
                Ok(buf.len())
            }
        }
    }

    fn pread(&self, buf: &mut [u8], _offset: u64) -> Result<usize, Error> {
        self.read(buf)
    }

    fn pwrite(&self, buf: &[u8], _offset: u64) -> Result<usize, Error> {
        self.write(buf)
    }

    fn llseek(&self, _offset: i64, _whence: crate::vfs::file::SeekWhence) -> Result<u64, Error> {
        // Character devices are seekable no-ops.
        Ok(0)
    }

    fn stat(&self) -> Result<FileStat, Error> {
        Ok(chardev_stat(self.ino, self.rdev))
    }

    fn statfs(&self) -> Result<FsStat, Error> {
        Ok(dev_statfs())
    }

    fn ioctl(&self, cmd: u32, arg: u64, mem: &dyn GuestMemory) -> Result<i64, Error> {
        match (self.kind, cmd) {
            (DevKind::Console, TIOCGWINSZ) => {
                let winsize = Winsize {
                    ws_row: 24,
                    ws_col: 80,
                    ws_xpixel: 0,
                    ws_ypixel: 0,
                };
                UserWritePtr::<Winsize>::from(arg).write(mem, &winsize)?;
                Ok(0)
            }
            _ => Err(ErrorImpl::Errno {
                operation: "device ioctl".into(),
                errno: libc::ENOTTY,
            }
            .into()),
        }
    }

    fn utimens(&self, _atime: Option<Timespec>, _mtime: Option<Timespec>) -> Result<(), Error> {
        Ok(())
    }

    fn poll_status(&self) -> PollEvents {
        match self.kind {
            DevKind::Null | DevKind::Zero | DevKind::Full => {
                PollEvents::POLLIN | PollEvents::POLLOUT
            }
            DevKind::Console => PollEvents::POLLOUT,
        }
    }
}

struct DevDir {
    flags: FlagsCell,
    pos: AtomicUsize,
}

impl File for DevDir {
    fn flags(&self) -> OpenFlags {
        self.flags.get()
    }

    fn set_flags(&self, flags: OpenFlags) {
        self.flags.set(flags);
    }

    fn stat(&self) -> Result<FileStat, Error> {
        Ok(FileStat {
            dev: DEVTMPFS_MAGIC as u64,
            ino: 1,
            mode: FileType::Directory.mode_bits() | 0o755,
            nlink: 2,
            blksize: 4096,
            ..FileStat::default()
        })
    }

    fn statfs(&self) -> Result<FsStat, Error> {
        Ok(dev_statfs())
    }

    fn getdents(&self, sink: &mut DirentSink<'_>) -> Result<(), Error> {
        loop {
            let pos = self.pos.load(Ordering::Relaxed);
            let (ino, dtype, name): (u64, FileType, &[u8]) = match pos {
                0 => (1, FileType::Directory, b"."),
                1 => (1, FileType::Directory, b".."),
                _ => match NODES.get(pos - 2) {
                    Some(&(name, ino, _)) => (ino, FileType::CharDevice, name),
                    None => return Ok(()),
                },
            };
            if !sink.push(ino, (pos + 1) as u64, dtype, name) {
                return Ok(());
            }
            self.pos.store(pos + 1, Ordering::Relaxed);
        }
    }

    fn poll_status(&self) -> PollEvents {
        PollEvents::POLLIN
    }
}
