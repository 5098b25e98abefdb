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

//! The virtual filesystem: a descriptor table multiplexed over mounted
//! filesystems, with guest path normalisation and symlink-aware resolution
//! in front of every path-taking operation.

pub mod devfs;
pub mod dirent;
pub mod fd_table;
pub mod file;
#[cfg(unix)]
pub mod hostfs;
pub mod mount;
pub mod path;
pub mod pipe;
pub mod poll;
pub(crate) mod resolver;
pub mod stat;

use crate::{
    error::{Error, ErrorImpl},
    sync::{Event, IoHub},
    vfs::{
        fd_table::FdTable,
        file::{FdFlags, File, FileType, OpenFlags, OpenOutcome},
        mount::MountTable,
        path::normalize,
        resolver::OpOutcome,
        stat::{FileStat, FsStat, Timespec},
    },
};

use std::sync::{Arc, Mutex};

/// Default file-mode creation mask.
pub const DEFAULT_UMASK: u32 = 0o022;

struct VfsState {
    fds: FdTable,
    cwd: Vec<u8>,
    umask: u32,
}

/// The VFS half of the core: the mount registry (immutable after init), the
/// descriptor table, and the process's CWD and umask.
pub struct Vfs {
    mounts: MountTable,
    state: Mutex<VfsState>,
    hub: Arc<IoHub>,
    interrupt: Arc<Event>,
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs").field("mounts", &self.mounts).finish_non_exhaustive()
    }
}

impl Vfs {
    pub(crate) fn new(mounts: MountTable, hub: Arc<IoHub>, interrupt: Arc<Event>) -> Self {
        Self {
            mounts,
            state: Mutex::new(VfsState {
                fds: FdTable::new(),
                cwd: b"/".to_vec(),
                umask: DEFAULT_UMASK,
            }),
            hub,
            interrupt,
        }
    }

    pub(crate) fn hub(&self) -> &Arc<IoHub> {
        &self.hub
    }

    pub(crate) fn interrupt(&self) -> &Arc<Event> {
        &self.interrupt
    }

    fn cwd(&self) -> Vec<u8> {
        self.state.lock().expect("vfs lock poisoned").cwd.clone()
    }

    fn umask_value(&self) -> u32 {
        self.state.lock().expect("vfs lock poisoned").umask
    }

    /// Open `path` and install the file in the descriptor table.
    pub fn open(&self, path: &[u8], flags: OpenFlags, mode: u32) -> Result<usize, Error> {
        let file = self.open_file(path, flags, mode)?;
        let mut state = self.state.lock().expect("vfs lock poisoned");
        state.fds.store(file, FdFlags::from(flags))
    }

    /// Open `path` without touching the descriptor table.
    pub fn open_file(
        &self,
        path: &[u8],
        flags: OpenFlags,
        mode: u32,
    ) -> Result<Arc<dyn File>, Error> {
        let cwd = self.cwd();
        let mode = mode & !self.umask_value() & 0o7777;
        resolver::resolve(&self.mounts, &cwd, path, |fs, subpath| {
            match fs.open(subpath, flags, mode)? {
                OpenOutcome::Opened(file) => Ok(OpOutcome::Done(file)),
                OpenOutcome::Symlink(_) if flags.contains(OpenFlags::O_NOFOLLOW) => {
                    Err(ErrorImpl::Loop {
                        path: String::from_utf8_lossy(subpath).into_owned().into(),
                    }
                    .into())
                }
                OpenOutcome::Symlink(target) => Ok(OpOutcome::FollowSymlink(target)),
            }
        })
    }

    /// Borrow the file behind a descriptor.
    pub fn get(&self, fd: usize) -> Result<Arc<dyn File>, Error> {
        self.state.lock().expect("vfs lock poisoned").fds.get(fd)
    }

    pub fn close(&self, fd: usize) -> Result<(), Error> {
        self.state.lock().expect("vfs lock poisoned").fds.close(fd)
    }

    pub fn dup(&self, fd: usize, min_fd: usize, flags: FdFlags) -> Result<usize, Error> {
        self.state
            .lock()
            .expect("vfs lock poisoned")
            .fds
            .dup(fd, min_fd, flags)
    }

    pub fn dup_to(&self, fd: usize, new_fd: usize, flags: FdFlags) -> Result<usize, Error> {
        self.state
            .lock()
            .expect("vfs lock poisoned")
            .fds
            .dup_to(fd, new_fd, flags)
    }

    pub fn fd_flags(&self, fd: usize) -> Result<FdFlags, Error> {
        self.state.lock().expect("vfs lock poisoned").fds.fd_flags(fd)
    }

    pub fn set_fd_flags(&self, fd: usize, flags: FdFlags) -> Result<(), Error> {
        self.state
            .lock()
            .expect("vfs lock poisoned")
            .fds
            .set_fd_flags(fd, flags)
    }

    /// Create an anonymous pipe and install both ends.
    pub fn pipe(&self, flags: OpenFlags) -> Result<(usize, usize), Error> {
        let (reader, writer) = pipe::pipe_pair(
            Arc::clone(&self.hub),
            Arc::clone(&self.interrupt),
            flags,
        );
        let fd_flags = FdFlags::from(flags);
        let mut state = self.state.lock().expect("vfs lock poisoned");
        let rfd = state.fds.store(reader, fd_flags)?;
        let wfd = match state.fds.store(writer, fd_flags) {
            Ok(wfd) => wfd,
            Err(err) => {
                let _ = state.fds.close(rfd);
                return Err(err);
            }
        };
        Ok((rfd, wfd))
    }

    pub fn link(&self, oldpath: &[u8], newpath: &[u8]) -> Result<(), Error> {
        let cwd = self.cwd();
        resolver::resolve_pair(&self.mounts, &cwd, oldpath, newpath, |fs, old, new| {
            fs.link(old, new)
        })
    }

    pub fn unlink(&self, path: &[u8]) -> Result<(), Error> {
        let cwd = self.cwd();
        resolver::resolve(&self.mounts, &cwd, path, |fs, subpath| {
            fs.unlink(subpath).map(OpOutcome::Done)
        })
    }

    pub fn symlink(&self, target: &[u8], linkpath: &[u8]) -> Result<(), Error> {
        let cwd = self.cwd();
        resolver::resolve(&self.mounts, &cwd, linkpath, |fs, subpath| {
            fs.symlink(target, subpath).map(OpOutcome::Done)
        })
    }

    pub fn readlink(&self, path: &[u8]) -> Result<Vec<u8>, Error> {
        let cwd = self.cwd();
        resolver::resolve(&self.mounts, &cwd, path, |fs, subpath| {
            fs.readlink(subpath).map(OpOutcome::Done)
        })
    }

    pub fn mkdir(&self, path: &[u8], mode: u32) -> Result<(), Error> {
        let cwd = self.cwd();
        let mode = mode & !self.umask_value() & 0o7777;
        resolver::resolve(&self.mounts, &cwd, path, |fs, subpath| {
            fs.mkdir(subpath, mode).map(OpOutcome::Done)
        })
    }

    pub fn rmdir(&self, path: &[u8]) -> Result<(), Error> {
        let cwd = self.cwd();
        resolver::resolve(&self.mounts, &cwd, path, |fs, subpath| {
            fs.rmdir(subpath).map(OpOutcome::Done)
        })
    }

    pub fn rename(&self, oldpath: &[u8], newpath: &[u8]) -> Result<(), Error> {
        let cwd = self.cwd();
        resolver::resolve_pair(&self.mounts, &cwd, oldpath, newpath, |fs, old, new| {
            fs.rename(old, new)
        })
    }

    /// Stat a path; `follow` distinguishes stat from lstat. A symlink leaf
    /// under lstat is reported synthetically (the capability record has no
    /// path-stat operation, so the link's own metadata is fabricated the way
    /// the personality always has).
    pub fn stat_path(&self, path: &[u8], follow: bool) -> Result<FileStat, Error> {
        let cwd = self.cwd();
        resolver::resolve(&self.mounts, &cwd, path, |fs, subpath| {
            match fs.open(subpath, OpenFlags::empty(), 0)? {
                OpenOutcome::Opened(file) => Ok(OpOutcome::Done(file.stat()?)),
                OpenOutcome::Symlink(target) if follow => Ok(OpOutcome::FollowSymlink(target)),
                OpenOutcome::Symlink(target) => Ok(OpOutcome::Done(FileStat {
                    mode: FileType::Symlink.mode_bits() | 0o777,
                    nlink: 1,
                    size: target.len() as i64,
                    blksize: 4096,
                    ..FileStat::default()
                })),
            }
        })
    }

    pub fn statfs_path(&self, path: &[u8]) -> Result<FsStat, Error> {
        let cwd = self.cwd();
        resolver::resolve(&self.mounts, &cwd, path, |fs, subpath| {
            match fs.open(subpath, OpenFlags::empty(), 0)? {
                OpenOutcome::Opened(file) => Ok(OpOutcome::Done(file.statfs()?)),
                OpenOutcome::Symlink(target) => Ok(OpOutcome::FollowSymlink(target)),
            }
        })
    }

    pub fn utimens_path(
        &self,
        path: &[u8],
        atime: Option<Timespec>,
        mtime: Option<Timespec>,
        follow: bool,
    ) -> Result<(), Error> {
        let cwd = self.cwd();
        resolver::resolve(&self.mounts, &cwd, path, |fs, subpath| {
            match fs.open(subpath, OpenFlags::empty(), 0)? {
                OpenOutcome::Opened(file) => {
                    file.utimens(atime, mtime)?;
                    Ok(OpOutcome::Done(()))
                }
                OpenOutcome::Symlink(target) if follow => Ok(OpOutcome::FollowSymlink(target)),
                // Symlinks carry no settable timestamps here; NotSupported
                // would read as "probe me" to the resolver, so map directly.
                OpenOutcome::Symlink(_) => Err(ErrorImpl::Errno {
                    operation: "utimens on symlink".into(),
                    errno: libc::EOPNOTSUPP,
                }
                .into()),
            }
        })
    }

    /// Change the working directory. The target must resolve to something
    /// openable as a directory; the stored CWD is the normalised logical
    /// path, not the symlink-expanded one.
    pub fn chdir(&self, path: &[u8]) -> Result<(), Error> {
        let file = self.open_file(path, OpenFlags::O_DIRECTORY, 0)?;
        drop(file);
        let mut state = self.state.lock().expect("vfs lock poisoned");
        state.cwd = normalize(&state.cwd, path)?;
        Ok(())
    }

    pub fn getcwd(&self) -> Vec<u8> {
        self.cwd()
    }

    /// Set the umask, returning the previous value.
    pub fn umask(&self, new: u32) -> u32 {
        let mut state = self.state.lock().expect("vfs lock poisoned");
        std::mem::replace(&mut state.umask, new & 0o777)
    }

    /// Exec-style reset: close cloexec descriptors, restore the default
    /// umask.
    pub fn reset_on_exec(&self) {
        let mut state = self.state.lock().expect("vfs lock poisoned");
        state.fds.reset_on_exec();
        state.umask = DEFAULT_UMASK;
    }

    /// Close every descriptor.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("vfs lock poisoned");
        state.fds.shutdown();
    }
}
