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

#![forbid(unsafe_code)]

//! Path and descriptor syscalls.

use crate::{
    core::Core,
    error::{Error, ErrorImpl},
    syscalls::{fd_index, invalid, map_unsupported, SyscallResult},
    uaccess::{UserCStr, UserReadPtr, UserWritePtr},
    vfs::{
        dirent::{DirentFormat, DirentSink},
        file::{FdFlags, OpenFlags},
        path::PATH_MAX,
        stat::{Stat, Stat64, Statfs, Statfs64, Timespec},
    },
};

const AT_FDCWD: i32 = -100;
const AT_SYMLINK_NOFOLLOW: i32 = 0x100;

const F_DUPFD: u32 = 0;
const F_GETFD: u32 = 1;
const F_SETFD: u32 = 2;
const F_GETFL: u32 = 3;
const F_SETFL: u32 = 4;
const F_DUPFD_CLOEXEC: u32 = 1030;

const UTIME_NOW: i64 = 0x3fff_ffff;
const UTIME_OMIT: i64 = 0x3fff_fffe;

fn read_path(core: &Core, path: u64) -> Result<Vec<u8>, Error> {
    UserCStr::from(path).read(core.mem(), PATH_MAX - 1)
}

pub fn sys_open(core: &Core, path: u64, flags: i32, mode: u32) -> SyscallResult {
    let path = read_path(core, path)?;
    let flags = OpenFlags::from_guest(flags);
    let fd = core.vfs().open(&path, flags, mode)?;
    log::trace!(
        "open({:?}, {flags:?}) = {fd}",
        String::from_utf8_lossy(&path)
    );
    Ok(fd as i64)
}

pub fn sys_close(core: &Core, fd: i32) -> SyscallResult {
    core.vfs().close(fd_index(fd)?)?;
    Ok(0)
}

pub fn sys_pipe2(core: &Core, fds: u64, flags: i32) -> SyscallResult {
    let flags = OpenFlags::from_guest(flags);
    if !(OpenFlags::O_CLOEXEC | OpenFlags::O_NONBLOCK).contains(flags) {
        return Err(invalid("flags", "unsupported pipe2 flag"));
    }
    // Validate the result pointer before any descriptor is allocated.
    if !core.mem().check_write(fds, 8) {
        return Err(ErrorImpl::BadAddress { addr: fds, len: 8 }.into());
    }
    let (rfd, wfd) = core.vfs().pipe(flags)?;
    UserWritePtr::<i32>::from(fds).write_array(core.mem(), &[rfd as i32, wfd as i32])?;
    Ok(0)
}

pub fn sys_pipe(core: &Core, fds: u64) -> SyscallResult {
    sys_pipe2(core, fds, 0)
}

pub fn sys_dup(core: &Core, fd: i32) -> SyscallResult {
    let new = core.vfs().dup(fd_index(fd)?, 0, FdFlags::empty())?;
    Ok(new as i64)
}

pub fn sys_dup2(core: &Core, oldfd: i32, newfd: i32) -> SyscallResult {
    let oldfd = fd_index(oldfd)?;
    let newfd = fd_index(newfd)?;
    if oldfd == newfd {
        // dup2 is a no-op on equal descriptors, provided oldfd is open.
        core.vfs().get(oldfd)?;
        return Ok(newfd as i64);
    }
    let new = core.vfs().dup_to(oldfd, newfd, FdFlags::empty())?;
    Ok(new as i64)
}

pub fn sys_dup3(core: &Core, oldfd: i32, newfd: i32, flags: i32) -> SyscallResult {
    let flags = OpenFlags::from_guest(flags);
    if !(OpenFlags::O_CLOEXEC).contains(flags) {
        return Err(invalid("flags", "unsupported dup3 flag"));
    }
    let new = core
        .vfs()
        .dup_to(fd_index(oldfd)?, fd_index(newfd)?, FdFlags::from(flags))?;
    Ok(new as i64)
}

pub fn sys_fcntl(core: &Core, fd: i32, cmd: u32, arg: u64) -> SyscallResult {
    let fd = fd_index(fd)?;
    match cmd {
        F_DUPFD => {
            let new = core.vfs().dup(fd, arg as usize, FdFlags::empty())?;
            Ok(new as i64)
        }
        F_DUPFD_CLOEXEC => {
            let new = core.vfs().dup(fd, arg as usize, FdFlags::CLOEXEC)?;
            Ok(new as i64)
        }
        F_GETFD => Ok(core.vfs().fd_flags(fd)?.bits() as i64),
        F_SETFD => {
            core.vfs()
                .set_fd_flags(fd, FdFlags::from_bits_truncate(arg as u32))?;
            Ok(0)
        }
        F_GETFL => Ok(core.vfs().get(fd)?.flags().bits() as i64),
        F_SETFL => {
            let file = core.vfs().get(fd)?;
            let old = file.flags();
            let wanted = OpenFlags::from_guest(arg as i32).settable();
            // Access mode and creation flags are immutable.
            let kept = old & !(OpenFlags::O_APPEND | OpenFlags::O_NONBLOCK);
            file.set_flags(kept | wanted);
            Ok(0)
        }
        _ => Err(invalid("cmd", "unsupported fcntl command")),
    }
}

pub fn sys_ioctl(core: &Core, fd: i32, cmd: u32, arg: u64) -> SyscallResult {
    let file = core.vfs().get(fd_index(fd)?)?;
    file.ioctl(cmd, arg, core.mem())
        .map_err(|err| map_unsupported(err, "ioctl", libc::ENOTTY))
}

fn getdents_common(
    core: &Core,
    fd: i32,
    dirp: u64,
    count: u32,
    format: DirentFormat,
) -> SyscallResult {
    if !core.mem().check_write(dirp, count as u64) {
        return Err(ErrorImpl::BadAddress {
            addr: dirp,
            len: count as u64,
        }
        .into());
    }
    let file = core.vfs().get(fd_index(fd)?)?;
    let mut buf = Vec::new();
    let mut sink = DirentSink::new(&mut buf, count as usize, format);
    file.getdents(&mut sink)
        .map_err(|err| map_unsupported(err, "getdents", libc::ENOTDIR))?;
    let written = sink.len();
    UserWritePtr::<u8>::from(dirp).write_buf(core.mem(), &buf)?;
    Ok(written as i64)
}

pub fn sys_getdents(core: &Core, fd: i32, dirp: u64, count: u32) -> SyscallResult {
    getdents_common(core, fd, dirp, count, DirentFormat::Legacy)
}

pub fn sys_getdents64(core: &Core, fd: i32, dirp: u64, count: u32) -> SyscallResult {
    getdents_common(core, fd, dirp, count, DirentFormat::Dirent64)
}

fn stat_common(core: &Core, path: u64, follow: bool) -> Result<crate::vfs::stat::FileStat, Error> {
    let path = read_path(core, path)?;
    core.vfs().stat_path(&path, follow)
}

pub fn sys_stat64(core: &Core, path: u64, statbuf: u64) -> SyscallResult {
    let stat = stat_common(core, path, true)?.to_stat64();
    UserWritePtr::<Stat64>::from(statbuf).write(core.mem(), &stat)?;
    Ok(0)
}

pub fn sys_lstat64(core: &Core, path: u64, statbuf: u64) -> SyscallResult {
    let stat = stat_common(core, path, false)?.to_stat64();
    UserWritePtr::<Stat64>::from(statbuf).write(core.mem(), &stat)?;
    Ok(0)
}

pub fn sys_fstat64(core: &Core, fd: i32, statbuf: u64) -> SyscallResult {
    let stat = core.vfs().get(fd_index(fd)?)?.stat()?.to_stat64();
    UserWritePtr::<Stat64>::from(statbuf).write(core.mem(), &stat)?;
    Ok(0)
}

/// The legacy narrow stat family checks every narrowed field and fails with
/// `EOVERFLOW` instead of truncating.
pub fn sys_newstat(core: &Core, path: u64, statbuf: u64) -> SyscallResult {
    let stat = stat_common(core, path, true)?.to_stat()?;
    UserWritePtr::<Stat>::from(statbuf).write(core.mem(), &stat)?;
    Ok(0)
}

pub fn sys_newlstat(core: &Core, path: u64, statbuf: u64) -> SyscallResult {
    let stat = stat_common(core, path, false)?.to_stat()?;
    UserWritePtr::<Stat>::from(statbuf).write(core.mem(), &stat)?;
    Ok(0)
}

pub fn sys_newfstat(core: &Core, fd: i32, statbuf: u64) -> SyscallResult {
    let stat = core.vfs().get(fd_index(fd)?)?.stat()?.to_stat()?;
    UserWritePtr::<Stat>::from(statbuf).write(core.mem(), &stat)?;
    Ok(0)
}

pub fn sys_statfs(core: &Core, path: u64, buf: u64) -> SyscallResult {
    let path = read_path(core, path)?;
    let statfs = core.vfs().statfs_path(&path)?.to_statfs()?;
    UserWritePtr::<Statfs>::from(buf).write(core.mem(), &statfs)?;
    Ok(0)
}

pub fn sys_statfs64(core: &Core, path: u64, size: u64, buf: u64) -> SyscallResult {
    if size != std::mem::size_of::<Statfs64>() as u64 {
        return Err(invalid("sz", "statfs64 structure size mismatch"));
    }
    let path = read_path(core, path)?;
    let statfs = core.vfs().statfs_path(&path)?.to_statfs64();
    UserWritePtr::<Statfs64>::from(buf).write(core.mem(), &statfs)?;
    Ok(0)
}

pub fn sys_fstatfs(core: &Core, fd: i32, buf: u64) -> SyscallResult {
    let statfs = core.vfs().get(fd_index(fd)?)?.statfs()?.to_statfs()?;
    UserWritePtr::<Statfs>::from(buf).write(core.mem(), &statfs)?;
    Ok(0)
}

pub fn sys_fstatfs64(core: &Core, fd: i32, size: u64, buf: u64) -> SyscallResult {
    if size != std::mem::size_of::<Statfs64>() as u64 {
        return Err(invalid("sz", "statfs64 structure size mismatch"));
    }
    let statfs = core.vfs().get(fd_index(fd)?)?.statfs()?.to_statfs64();
    UserWritePtr::<Statfs64>::from(buf).write(core.mem(), &statfs)?;
    Ok(0)
}

pub fn sys_readlink(core: &Core, path: u64, buf: u64, bufsiz: u64) -> SyscallResult {
    if bufsiz == 0 {
        return Err(invalid("bufsiz", "zero-length readlink buffer"));
    }
    let path = read_path(core, path)?;
    let target = core
        .vfs()
        .readlink(&path)
        .map_err(|err| map_unsupported(err, "readlink", libc::EINVAL))?;
    // Truncated, not NUL-terminated.
    let n = target.len().min(bufsiz as usize);
    UserWritePtr::<u8>::from(buf).write_buf(core.mem(), &target[..n])?;
    Ok(n as i64)
}

pub fn sys_symlink(core: &Core, target: u64, linkpath: u64) -> SyscallResult {
    let target = read_path(core, target)?;
    if target.is_empty() {
        return Err(ErrorImpl::NoEntry {
            path: "empty symlink target".into(),
        }
        .into());
    }
    let linkpath = read_path(core, linkpath)?;
    core.vfs().symlink(&target, &linkpath)?;
    Ok(0)
}

pub fn sys_link(core: &Core, oldpath: u64, newpath: u64) -> SyscallResult {
    let oldpath = read_path(core, oldpath)?;
    let newpath = read_path(core, newpath)?;
    core.vfs().link(&oldpath, &newpath)?;
    Ok(0)
}

pub fn sys_unlink(core: &Core, path: u64) -> SyscallResult {
    let path = read_path(core, path)?;
    core.vfs().unlink(&path)?;
    Ok(0)
}

pub fn sys_rename(core: &Core, oldpath: u64, newpath: u64) -> SyscallResult {
    let oldpath = read_path(core, oldpath)?;
    let newpath = read_path(core, newpath)?;
    core.vfs().rename(&oldpath, &newpath)?;
    Ok(0)
}

pub fn sys_mkdir(core: &Core, path: u64, mode: u32) -> SyscallResult {
    let path = read_path(core, path)?;
    core.vfs().mkdir(&path, mode)?;
    Ok(0)
}

pub fn sys_rmdir(core: &Core, path: u64) -> SyscallResult {
    let path = read_path(core, path)?;
    core.vfs().rmdir(&path)?;
    Ok(0)
}

pub fn sys_chdir(core: &Core, path: u64) -> SyscallResult {
    let path = read_path(core, path)?;
    core.vfs().chdir(&path)?;
    Ok(0)
}

pub fn sys_getcwd(core: &Core, buf: u64, size: u64) -> SyscallResult {
    let cwd = core.vfs().getcwd();
    let needed = cwd.len() + 1;
    if (size as usize) < needed {
        return Err(ErrorImpl::Errno {
            operation: "getcwd into short buffer".into(),
            errno: libc::ERANGE,
        }
        .into());
    }
    let mut out = cwd;
    out.push(0);
    UserWritePtr::<u8>::from(buf).write_buf(core.mem(), &out)?;
    Ok(needed as i64)
}

pub fn sys_umask(core: &Core, mask: u32) -> SyscallResult {
    Ok(core.vfs().umask(mask) as i64)
}

pub fn sys_utimensat(
    core: &Core,
    dirfd: i32,
    path: u64,
    times: u64,
    flags: i32,
) -> SyscallResult {
    if dirfd != AT_FDCWD {
        return Err(invalid("dirfd", "only AT_FDCWD is supported"));
    }
    if flags & !AT_SYMLINK_NOFOLLOW != 0 {
        return Err(invalid("flags", "unsupported utimensat flag"));
    }
    let path = read_path(core, path)?;

    let now = || {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Timespec {
            tv_sec: now.as_secs() as i64,
            tv_nsec: now.subsec_nanos() as i64,
        }
    };
    let (atime, mtime) = if times == 0 {
        (Some(now()), Some(now()))
    } else {
        let spec: [Timespec; 2] = {
            let raw = UserReadPtr::<Timespec>::from(times).read_array(core.mem(), 2)?;
            [raw[0], raw[1]]
        };
        let convert = |ts: Timespec| match ts.tv_nsec {
            UTIME_OMIT => None,
            UTIME_NOW => Some(now()),
            _ => Some(ts),
        };
        (convert(spec[0]), convert(spec[1]))
    };

    let follow = flags & AT_SYMLINK_NOFOLLOW == 0;
    core.vfs().utimens_path(&path, atime, mtime, follow)?;
    Ok(0)
}
