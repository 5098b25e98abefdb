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

#![cfg(unix)]

//! The host-backed filesystem.
//!
//! Maps a guest subtree onto a host directory. Guest symlinks are host
//! symlinks: a symlink leaf surfaces as [`OpenOutcome::Symlink`] (classified
//! with `lstat` first, opened `O_NOFOLLOW` after; the window between the two
//! is the accepted host-boundary race), and the per-component `readlink`
//! capability lets the resolver probe intermediate components the same way
//! it does on every other filesystem.
//!
//! Mount-relative subpaths arrive normalised (no `..`, no `//`), so joining
//! them under the base directory cannot escape it.

use crate::{
    error::{Error, ErrorImpl},
    vfs::{
        dirent::DirentSink,
        file::{File, FileSystem, FileType, FlagsCell, OpenFlags, OpenOutcome},
        poll::PollEvents,
        stat::{FileStat, FsStat, Timespec},
    },
};

use std::{
    ffi::OsStr,
    os::unix::ffi::OsStrExt,
    os::{fd::OwnedFd, unix::fs::DirEntryExt, unix::fs::FileTypeExt},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use rustix::{
    fs::{openat, statat, AtFlags, Mode, OFlags, CWD},
    io::Errno,
};

fn host_err(operation: &'static str, err: Errno) -> Error {
    if err == Errno::NOENT {
        ErrorImpl::NoEntry {
            path: operation.into(),
        }
        .into()
    } else {
        ErrorImpl::Errno {
            operation: operation.into(),
            errno: err.raw_os_error(),
        }
        .into()
    }
}

fn io_err(operation: &'static str, err: std::io::Error) -> Error {
    if err.raw_os_error() == Some(libc::ENOENT) {
        ErrorImpl::NoEntry {
            path: operation.into(),
        }
        .into()
    } else {
        ErrorImpl::OsError {
            operation: operation.into(),
            source: err,
        }
        .into()
    }
}

#[derive(Debug)]
pub struct HostFs {
    base: PathBuf,
}

impl HostFs {
    /// Back the mount with `base`, which must be an existing host directory.
    pub fn new(base: impl Into<PathBuf>) -> Result<Arc<Self>, Error> {
        let base = base.into();
        let meta = std::fs::metadata(&base).map_err(|err| io_err("stat hostfs base", err))?;
        if !meta.is_dir() {
            return Err(ErrorImpl::InvalidArgument {
                name: "base".into(),
                description: "hostfs base is not a directory".into(),
            }
            .into());
        }
        Ok(Arc::new(Self { base }))
    }

    fn host_path(&self, subpath: &[u8]) -> PathBuf {
        if subpath.is_empty() {
            self.base.clone()
        } else {
            self.base.join(OsStr::from_bytes(subpath))
        }
    }
}

fn open_flags_to_host(flags: OpenFlags) -> OFlags {
    let mut oflags = OFlags::CLOEXEC | OFlags::NOFOLLOW;
    oflags |= match flags.access_mode() {
        0o1 => OFlags::WRONLY,
        0o2 => OFlags::RDWR,
        _ => OFlags::RDONLY,
    };
    if flags.contains(OpenFlags::O_CREAT) {
        oflags |= OFlags::CREATE;
    }
    if flags.contains(OpenFlags::O_EXCL) {
        oflags |= OFlags::EXCL;
    }
    if flags.contains(OpenFlags::O_TRUNC) {
        oflags |= OFlags::TRUNC;
    }
    if flags.contains(OpenFlags::O_APPEND) {
        oflags |= OFlags::APPEND;
    }
    if flags.contains(OpenFlags::O_DIRECTORY) {
        oflags |= OFlags::DIRECTORY;
    }
    oflags
}

impl FileSystem for HostFs {
    fn name(&self) -> &str {
        "hostfs"
    }

    fn open(&self, path: &[u8], flags: OpenFlags, mode: u32) -> Result<OpenOutcome, Error> {
        let host = self.host_path(path);

        match statat(CWD, &host, AtFlags::SYMLINK_NOFOLLOW) {
            Ok(stat) => {
                if (stat.st_mode & libc::S_IFMT) == libc::S_IFLNK {
                    let target = std::fs::read_link(&host)
                        .map_err(|err| io_err("readlink symlink leaf", err))?;
                    return Ok(OpenOutcome::Symlink(
                        target.as_os_str().as_bytes().to_vec(),
                    ));
                }
                if (stat.st_mode & libc::S_IFMT) == libc::S_IFDIR {
                    let fd = openat(
                        CWD,
                        &host,
                        OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
                        Mode::empty(),
                    )
                    .map_err(|err| host_err("open host directory", err))?;
                    return Ok(OpenOutcome::Opened(Arc::new(HostDir {
                        fd,
                        path: host,
                        flags: FlagsCell::new(flags),
                        entries: Mutex::new(None),
                    })));
                }
            }
            Err(err) if err == Errno::NOENT && flags.contains(OpenFlags::O_CREAT) => {
                // Fall through to the creating open below.
            }
            Err(err) => return Err(host_err("classify host path", err)),
        }

        let fd = openat(
            CWD,
            &host,
            open_flags_to_host(flags),
            Mode::from_bits_truncate(mode),
        )
        .map_err(|err| host_err("open host file", err))?;
        Ok(OpenOutcome::Opened(Arc::new(HostFile {
            fd,
            flags: FlagsCell::new(flags),
        })))
    }

    fn link(&self, oldpath: &[u8], newpath: &[u8]) -> Result<(), Error> {
        rustix::fs::linkat(
            CWD,
            &self.host_path(oldpath),
            CWD,
            &self.host_path(newpath),
            AtFlags::empty(),
        )
        .map_err(|err| host_err("link host file", err))
    }

    fn unlink(&self, path: &[u8]) -> Result<(), Error> {
        rustix::fs::unlinkat(CWD, &self.host_path(path), AtFlags::empty())
            .map_err(|err| host_err("unlink host file", err))
    }

    fn symlink(&self, target: &[u8], path: &[u8]) -> Result<(), Error> {
        rustix::fs::symlinkat(OsStr::from_bytes(target), CWD, &self.host_path(path))
            .map_err(|err| host_err("create host symlink", err))
    }

    fn readlink(&self, path: &[u8]) -> Result<Vec<u8>, Error> {
        let target = rustix::fs::readlinkat(CWD, &self.host_path(path), Vec::new())
            .map_err(|err| host_err("readlink host path", err))?;
        Ok(target.into_bytes())
    }

    fn mkdir(&self, path: &[u8], mode: u32) -> Result<(), Error> {
        rustix::fs::mkdirat(CWD, &self.host_path(path), Mode::from_bits_truncate(mode))
            .map_err(|err| host_err("mkdir on host", err))
    }

    fn rmdir(&self, path: &[u8]) -> Result<(), Error> {
        rustix::fs::unlinkat(CWD, &self.host_path(path), AtFlags::REMOVEDIR)
            .map_err(|err| host_err("rmdir on host", err))
    }

    fn rename(&self, oldpath: &[u8], newpath: &[u8]) -> Result<(), Error> {
        rustix::fs::renameat(CWD, &self.host_path(oldpath), CWD, &self.host_path(newpath))
            .map_err(|err| host_err("rename on host", err))
    }
}

fn stat_from_host(stat: rustix::fs::Stat) -> FileStat {
    FileStat {
        dev: stat.st_dev as u64,
        ino: stat.st_ino as u64,
        mode: stat.st_mode as u32,
        nlink: stat.st_nlink as u64,
        uid: stat.st_uid,
        gid: stat.st_gid,
        rdev: stat.st_rdev as u64,
        size: stat.st_size,
        blksize: stat.st_blksize as i64,
        blocks: stat.st_blocks as i64,
        atime: Timespec {
            tv_sec: stat.st_atime as i64,
            tv_nsec: stat.st_atime_nsec as i64,
        },
        mtime: Timespec {
            tv_sec: stat.st_mtime as i64,
            tv_nsec: stat.st_mtime_nsec as i64,
        },
        ctime: Timespec {
            tv_sec: stat.st_ctime as i64,
            tv_nsec: stat.st_ctime_nsec as i64,
        },
    }
}

fn statfs_from_host(statfs: rustix::fs::StatFs) -> FsStat {
    FsStat {
        fs_type: statfs.f_type as i64,
        bsize: statfs.f_bsize as i64,
        blocks: statfs.f_blocks as u64,
        bfree: statfs.f_bfree as u64,
        bavail: statfs.f_bavail as u64,
        files: statfs.f_files as u64,
        ffree: statfs.f_ffree as u64,
        namelen: statfs.f_namelen as i64,
        frsize: statfs.f_frsize as i64,
        flags: statfs.f_flags as i64,
    }
}

fn utimens_host(fd: &OwnedFd, atime: Option<Timespec>, mtime: Option<Timespec>) -> Result<(), Error> {
    let omit = rustix::fs::Timespec {
        tv_sec: 0,
        tv_nsec: libc::UTIME_OMIT as _,
    };
    let to_host = |ts: Option<Timespec>| match ts {
        Some(ts) => rustix::fs::Timespec {
            tv_sec: ts.tv_sec,
            tv_nsec: ts.tv_nsec as _,
        },
        None => omit,
    };
    rustix::fs::futimens(
        fd,
        &rustix::fs::Timestamps {
            last_access: to_host(atime),
            last_modification: to_host(mtime),
        },
    )
    .map_err(|err| host_err("futimens on host", err))
}

#[derive(Debug)]
pub struct HostFile {
    fd: OwnedFd,
    flags: FlagsCell,
}

impl File for HostFile {
    fn flags(&self) -> OpenFlags {
        self.flags.get()
    }

    fn set_flags(&self, flags: OpenFlags) {
        self.flags.set(flags);
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        rustix::io::read(&self.fd, buf).map_err(|err| host_err("read host file", err))
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        rustix::io::write(&self.fd, buf).map_err(|err| host_err("write host file", err))
    }

    fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize, Error> {
        rustix::io::pread(&self.fd, buf, offset).map_err(|err| host_err("pread host file", err))
    }

    fn pwrite(&self, buf: &[u8], offset: u64) -> Result<usize, Error> {
        rustix::io::pwrite(&self.fd, buf, offset).map_err(|err| host_err("pwrite host file", err))
    }

    fn llseek(&self, offset: i64, whence: crate::vfs::file::SeekWhence) -> Result<u64, Error> {
        use crate::vfs::file::SeekWhence;
        let pos = match whence {
            SeekWhence::Set => rustix::fs::SeekFrom::Start(offset as u64),
            SeekWhence::Cur => rustix::fs::SeekFrom::Current(offset),
            SeekWhence::End => rustix::fs::SeekFrom::End(offset),
        };
        rustix::fs::seek(&self.fd, pos).map_err(|err| host_err("seek host file", err))
    }

    fn stat(&self) -> Result<FileStat, Error> {
        rustix::fs::fstat(&self.fd)
            .map(stat_from_host)
            .map_err(|err| host_err("fstat host file", err))
    }

    fn statfs(&self) -> Result<FsStat, Error> {
        rustix::fs::fstatfs(&self.fd)
            .map(statfs_from_host)
            .map_err(|err| host_err("fstatfs host file", err))
    }

    fn utimens(&self, atime: Option<Timespec>, mtime: Option<Timespec>) -> Result<(), Error> {
        utimens_host(&self.fd, atime, mtime)
    }

    fn poll_status(&self) -> PollEvents {
        // Regular files never block.
        PollEvents::POLLIN | PollEvents::POLLOUT
    }
}

type DirSnapshot = Vec<(u64, FileType, Vec<u8>)>;

#[derive(Debug)]
pub struct HostDir {
    fd: OwnedFd,
    path: PathBuf,
    flags: FlagsCell,
    // (position, snapshot); the snapshot is taken on first getdents.
    entries: Mutex<Option<(usize, DirSnapshot)>>,
}

fn host_file_type(ft: std::fs::FileType) -> FileType {
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_fifo() {
        FileType::Fifo
    } else if ft.is_socket() {
        FileType::Socket
    } else if ft.is_char_device() {
        FileType::CharDevice
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else {
        FileType::Regular
    }
}

fn snapshot_dir(path: &Path) -> Result<DirSnapshot, Error> {
    let mut entries: DirSnapshot = vec![
        (1, FileType::Directory, b".".to_vec()),
        (1, FileType::Directory, b"..".to_vec()),
    ];
    for entry in std::fs::read_dir(path).map_err(|err| io_err("list host directory", err))? {
        let entry = entry.map_err(|err| io_err("read host directory entry", err))?;
        let ftype = entry
            .file_type()
            .map(host_file_type)
            .unwrap_or(FileType::Regular);
        entries.push((entry.ino(), ftype, entry.file_name().as_bytes().to_vec()));
    }
    Ok(entries)
}

impl File for HostDir {
    fn flags(&self) -> OpenFlags {
        self.flags.get()
    }

    fn set_flags(&self, flags: OpenFlags) {
        self.flags.set(flags);
    }

    fn stat(&self) -> Result<FileStat, Error> {
        rustix::fs::fstat(&self.fd)
            .map(stat_from_host)
            .map_err(|err| host_err("fstat host directory", err))
    }

    fn statfs(&self) -> Result<FsStat, Error> {
        rustix::fs::fstatfs(&self.fd)
            .map(statfs_from_host)
            .map_err(|err| host_err("fstatfs host directory", err))
    }

    fn getdents(&self, sink: &mut DirentSink<'_>) -> Result<(), Error> {
        let mut guard = self.entries.lock().expect("hostdir lock poisoned");
        if guard.is_none() {
            *guard = Some((0, snapshot_dir(&self.path)?));
        }
        let (pos, entries) = guard.as_mut().expect("snapshot just taken");
        while let Some((ino, ftype, name)) = entries.get(*pos) {
            if !sink.push(*ino, (*pos + 1) as u64, *ftype, name) {
                break;
            }
            *pos += 1;
        }
        Ok(())
    }

    fn utimens(&self, atime: Option<Timespec>, mtime: Option<Timespec>) -> Result<(), Error> {
        utimens_host(&self.fd, atime, mtime)
    }

    fn poll_status(&self) -> PollEvents {
        PollEvents::POLLIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn opened(outcome: OpenOutcome) -> Arc<dyn File> {
        match outcome {
            OpenOutcome::Opened(file) => file,
            OpenOutcome::Symlink(target) => {
                panic!("unexpected symlink: {:?}", String::from_utf8_lossy(&target))
            }
        }
    }

    #[test]
    fn create_write_reopen_read() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path()).unwrap();

        let file = opened(
            fs.open(
                b"note.txt",
                OpenFlags::O_CREAT | OpenFlags::O_WRONLY,
                0o644,
            )
            .unwrap(),
        );
        assert_eq!(file.write(b"persisted").unwrap(), 9);
        drop(file);

        let file = opened(fs.open(b"note.txt", OpenFlags::empty(), 0).unwrap());
        let mut buf = [0u8; 16];
        let n = file.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"persisted");
    }

    #[test]
    fn missing_file_is_noentry() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path()).unwrap();
        let err = fs.open(b"absent", OpenFlags::empty(), 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NoEntry);
    }

    #[test]
    fn symlink_leaf_surfaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path()).unwrap();
        fs.symlink(b"/real", b"link").unwrap();

        match fs.open(b"link", OpenFlags::empty(), 0).unwrap() {
            OpenOutcome::Symlink(target) => assert_eq!(target, b"/real"),
            OpenOutcome::Opened(_) => panic!("symlink leaf must not open"),
        }
        assert_eq!(fs.readlink(b"link").unwrap(), b"/real");
    }

    #[test]
    fn readlink_on_regular_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("plain"), b"x").unwrap();
        let err = fs.readlink(b"plain").unwrap_err();
        assert_eq!(
            err.errno(),
            Some(libc::EINVAL),
            "host EINVAL passes through"
        );
    }

    #[test]
    fn mkdir_list_rmdir() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path()).unwrap();
        fs.mkdir(b"sub", 0o755).unwrap();
        std::fs::write(dir.path().join("sub/inner"), b"x").unwrap();

        let listing = opened(fs.open(b"sub", OpenFlags::O_DIRECTORY, 0).unwrap());
        let mut buf = Vec::new();
        let mut sink =
            crate::vfs::dirent::DirentSink::new(&mut buf, 4096, crate::vfs::dirent::DirentFormat::Dirent64);
        listing.getdents(&mut sink).unwrap();
        assert_eq!(sink.entries(), 3, "dot, dotdot, inner");

        fs.unlink(b"sub/inner").unwrap();
        fs.rmdir(b"sub").unwrap();
        assert_eq!(
            fs.open(b"sub", OpenFlags::empty(), 0).unwrap_err().kind(),
            crate::error::ErrorKind::NoEntry
        );
    }

    #[test]
    fn rename_moves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("from"), b"content").unwrap();
        fs.rename(b"from", b"to").unwrap();
        assert!(dir.path().join("to").exists());
        assert!(!dir.path().join("from").exists());
    }
}
