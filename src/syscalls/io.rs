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

//! Data-plane syscalls: read/write, vectored IO, positioned IO, seek,
//! poll and select.

use crate::{
    core::Core,
    error::{Error, ErrorImpl},
    signal::types::{Sig, SigInfo},
    syscalls::{fd_index, invalid, map_unsupported, SyscallResult},
    uaccess::{UserReadPtr, UserWritePtr},
    vfs::{
        file::{File, SeekWhence},
        poll::{poll_wait, PollEvents, PollRequest},
    },
};

use std::{sync::Arc, time::Duration};

use bytemuck::{Pod, Zeroable};

/// Linux trims single transfers to this.
const MAX_RW_COUNT: u64 = 0x7fff_f000;

/// Guest `struct iovec`.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct IoVec {
    pub iov_base: u64,
    pub iov_len: u64,
}

const UIO_MAXIOV: usize = 1024;

/// Guest `struct pollfd`.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct PollFd {
    pub fd: i32,
    pub events: u16,
    pub revents: u16,
}

const FD_SETSIZE: usize = 1024;
const FD_SETLEN: usize = FD_SETSIZE / 64;

/// Guest `fd_set`.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FdSet {
    pub fds_bits: [u64; FD_SETLEN],
}

impl FdSet {
    pub fn zero() -> Self {
        Self::zeroed()
    }

    pub fn set(&mut self, fd: usize) {
        self.fds_bits[fd / 64] |= 1 << (fd % 64);
    }

    pub fn is_set(&self, fd: usize) -> bool {
        self.fds_bits[fd / 64] & (1 << (fd % 64)) != 0
    }
}

/// Guest `struct timeval`.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct Timeval {
    pub tv_sec: i64,
    pub tv_usec: i64,
}

fn readable(file: &Arc<dyn File>, fd: i32) -> Result<(), Error> {
    if file.flags().readable() {
        Ok(())
    } else {
        Err(ErrorImpl::BadFd { fd }.into())
    }
}

fn writable(file: &Arc<dyn File>, fd: i32) -> Result<(), Error> {
    if file.flags().writable() {
        Ok(())
    } else {
        Err(ErrorImpl::BadFd { fd }.into())
    }
}

/// A write that hits a readerless pipe also raises SIGPIPE.
fn raise_sigpipe_on_epipe(core: &Core, err: &Error) {
    if err.errno() == Some(libc::EPIPE) {
        core.signal().send(SigInfo::kernel(Sig::SIGPIPE));
    }
}

pub fn sys_read(core: &Core, fd: i32, buf: u64, count: u64) -> SyscallResult {
    let count = count.min(MAX_RW_COUNT) as usize;
    if count > 0 && !core.mem().check_write(buf, count as u64) {
        return Err(ErrorImpl::BadAddress {
            addr: buf,
            len: count as u64,
        }
        .into());
    }
    let file = core.vfs().get(fd_index(fd)?)?;
    readable(&file, fd)?;
    let mut data = vec![0u8; count];
    let n = file.read(&mut data)?;
    UserWritePtr::<u8>::from(buf).write_buf(core.mem(), &data[..n])?;
    Ok(n as i64)
}

pub fn sys_write(core: &Core, fd: i32, buf: u64, count: u64) -> SyscallResult {
    let count = count.min(MAX_RW_COUNT) as usize;
    let data = UserReadPtr::<u8>::from(buf).read_buf(core.mem(), count)?;
    let file = core.vfs().get(fd_index(fd)?)?;
    writable(&file, fd)?;
    match file.write(&data) {
        Ok(n) => Ok(n as i64),
        Err(err) => {
            raise_sigpipe_on_epipe(core, &err);
            Err(err)
        }
    }
}

fn read_iovecs(core: &Core, iov: u64, iovcnt: i32) -> Result<Vec<IoVec>, Error> {
    if iovcnt < 0 || iovcnt as usize > UIO_MAXIOV {
        return Err(invalid("iovcnt", "iovec count out of range"));
    }
    UserReadPtr::<IoVec>::from(iov).read_array(core.mem(), iovcnt as usize)
}

pub fn sys_readv(core: &Core, fd: i32, iov: u64, iovcnt: i32) -> SyscallResult {
    let iovecs = read_iovecs(core, iov, iovcnt)?;
    let file = core.vfs().get(fd_index(fd)?)?;
    readable(&file, fd)?;

    let mut total: i64 = 0;
    for vec in &iovecs {
        if vec.iov_len == 0 {
            continue;
        }
        let len = vec.iov_len.min(MAX_RW_COUNT) as usize;
        if !core.mem().check_write(vec.iov_base, len as u64) {
            return Err(ErrorImpl::BadAddress {
                addr: vec.iov_base,
                len: len as u64,
            }
            .into());
        }
        let mut data = vec![0u8; len];
        let n = file.read(&mut data)?;
        UserWritePtr::<u8>::from(vec.iov_base).write_buf(core.mem(), &data[..n])?;
        total += n as i64;
        if n < len {
            break;
        }
    }
    Ok(total)
}

pub fn sys_writev(core: &Core, fd: i32, iov: u64, iovcnt: i32) -> SyscallResult {
    let iovecs = read_iovecs(core, iov, iovcnt)?;
    let file = core.vfs().get(fd_index(fd)?)?;
    writable(&file, fd)?;

    let mut total: i64 = 0;
    for vec in &iovecs {
        if vec.iov_len == 0 {
            continue;
        }
        let len = vec.iov_len.min(MAX_RW_COUNT) as usize;
        let data = UserReadPtr::<u8>::from(vec.iov_base).read_buf(core.mem(), len)?;
        match file.write(&data) {
            Ok(n) => {
                total += n as i64;
                if n < len {
                    break;
                }
            }
            Err(err) => {
                if total > 0 {
                    return Ok(total);
                }
                raise_sigpipe_on_epipe(core, &err);
                return Err(err);
            }
        }
    }
    Ok(total)
}

pub fn sys_pread64(core: &Core, fd: i32, buf: u64, count: u64, offset: i64) -> SyscallResult {
    if offset < 0 {
        return Err(invalid("offset", "negative file offset"));
    }
    let count = count.min(MAX_RW_COUNT) as usize;
    if count > 0 && !core.mem().check_write(buf, count as u64) {
        return Err(ErrorImpl::BadAddress {
            addr: buf,
            len: count as u64,
        }
        .into());
    }
    let file = core.vfs().get(fd_index(fd)?)?;
    readable(&file, fd)?;
    let mut data = vec![0u8; count];
    let n = file
        .pread(&mut data, offset as u64)
        .map_err(|err| map_unsupported(err, "pread", libc::ESPIPE))?;
    UserWritePtr::<u8>::from(buf).write_buf(core.mem(), &data[..n])?;
    Ok(n as i64)
}

pub fn sys_pwrite64(core: &Core, fd: i32, buf: u64, count: u64, offset: i64) -> SyscallResult {
    if offset < 0 {
        return Err(invalid("offset", "negative file offset"));
    }
    let count = count.min(MAX_RW_COUNT) as usize;
    let data = UserReadPtr::<u8>::from(buf).read_buf(core.mem(), count)?;
    let file = core.vfs().get(fd_index(fd)?)?;
    writable(&file, fd)?;
    match file.pwrite(&data, offset as u64) {
        Ok(n) => Ok(n as i64),
        Err(err) => {
            let err = map_unsupported(err, "pwrite", libc::ESPIPE);
            raise_sigpipe_on_epipe(core, &err);
            Err(err)
        }
    }
}

pub fn sys_lseek(core: &Core, fd: i32, offset: i64, whence: u32) -> SyscallResult {
    let whence = SeekWhence::from_guest(whence)?;
    let file = core.vfs().get(fd_index(fd)?)?;
    let pos = file
        .llseek(offset, whence)
        .map_err(|err| map_unsupported(err, "llseek", libc::ESPIPE))?;
    Ok(pos as i64)
}

pub fn sys_poll(core: &Core, fds: u64, nfds: u64, timeout_ms: i32) -> SyscallResult {
    if nfds as usize > FD_SETSIZE {
        return Err(invalid("nfds", "too many poll descriptors"));
    }
    let nfds = nfds as usize;
    // poll(NULL, 0, timeout) is a plain interruptible sleep.
    let mut poll_fds = if nfds == 0 {
        Vec::new()
    } else {
        let poll_fds = UserReadPtr::<PollFd>::from(fds).read_array(core.mem(), nfds)?;
        // Validate writability up front; revents are written back at the end.
        if !core
            .mem()
            .check_write(fds, (std::mem::size_of::<PollFd>() * nfds) as u64)
        {
            return Err(ErrorImpl::BadAddress {
                addr: fds,
                len: (std::mem::size_of::<PollFd>() * nfds) as u64,
            }
            .into());
        }
        poll_fds
    };

    let vfs = core.vfs();
    let requests: Vec<PollRequest> = poll_fds
        .iter()
        .map(|pfd| {
            if pfd.fd < 0 {
                // Negative descriptors are ignored slots, never ready.
                (Some(never_ready()), PollEvents::empty())
            } else {
                match vfs.get(pfd.fd as usize) {
                    Ok(file) => (Some(file), PollEvents::from_bits_truncate(pfd.events)),
                    Err(_) => (None, PollEvents::empty()),
                }
            }
        })
        .collect();

    let timeout = if timeout_ms < 0 {
        None
    } else {
        Some(Duration::from_millis(timeout_ms as u64))
    };
    let revents = poll_wait(
        &requests,
        vfs.hub(),
        vfs.interrupt(),
        timeout,
    )?;

    let mut ready = 0i64;
    for (pfd, got) in poll_fds.iter_mut().zip(&revents) {
        pfd.revents = got.bits();
        if !got.is_empty() {
            ready += 1;
        }
    }
    if !poll_fds.is_empty() {
        UserWritePtr::<PollFd>::from(fds).write_array(core.mem(), &poll_fds)?;
    }
    Ok(ready)
}

/// A permanently idle poll slot (negative fd).
fn never_ready() -> Arc<dyn File> {
    use crate::vfs::file::{FlagsCell, OpenFlags};

    struct NeverReady(FlagsCell);
    impl File for NeverReady {
        fn flags(&self) -> OpenFlags {
            self.0.get()
        }
        fn set_flags(&self, flags: OpenFlags) {
            self.0.set(flags);
        }
    }
    Arc::new(NeverReady(FlagsCell::new(OpenFlags::empty())))
}

fn read_fdset(core: &Core, addr: u64) -> Result<Option<FdSet>, Error> {
    if addr == 0 {
        return Ok(None);
    }
    Ok(Some(UserReadPtr::<FdSet>::from(addr).read(core.mem())?))
}

fn write_fdset(core: &Core, addr: u64, set: &FdSet) -> Result<(), Error> {
    if addr != 0 {
        UserWritePtr::<FdSet>::from(addr).write(core.mem(), set)?;
    }
    Ok(())
}

pub fn sys_select(
    core: &Core,
    nfds: i32,
    readfds: u64,
    writefds: u64,
    exceptfds: u64,
    timeout: u64,
) -> SyscallResult {
    if !(0..=FD_SETSIZE as i32).contains(&nfds) {
        return Err(invalid("nfds", "descriptor range out of bounds"));
    }
    let read_in = read_fdset(core, readfds)?;
    let write_in = read_fdset(core, writefds)?;
    let except_in = read_fdset(core, exceptfds)?;

    let duration = if timeout == 0 {
        None
    } else {
        let tv: Timeval = UserReadPtr::from(timeout).read(core.mem())?;
        if tv.tv_sec < 0 || tv.tv_usec < 0 {
            return Err(invalid("timeout", "negative timeval"));
        }
        Some(Duration::from_secs(tv.tv_sec as u64) + Duration::from_micros(tv.tv_usec as u64))
    };

    // select reports EBADF for any bad descriptor in any set, unlike poll.
    let vfs = core.vfs();
    let mut requests: Vec<PollRequest> = Vec::new();
    let mut slots: Vec<(usize, PollEvents)> = Vec::new();
    for fd in 0..nfds as usize {
        let mut wanted = PollEvents::empty();
        if read_in.as_ref().is_some_and(|s| s.is_set(fd)) {
            wanted |= PollEvents::POLLIN;
        }
        if write_in.as_ref().is_some_and(|s| s.is_set(fd)) {
            wanted |= PollEvents::POLLOUT;
        }
        if except_in.as_ref().is_some_and(|s| s.is_set(fd)) {
            wanted |= PollEvents::POLLPRI;
        }
        if wanted.is_empty() {
            continue;
        }
        let file = vfs.get(fd)?;
        slots.push((fd, wanted));
        requests.push((Some(file), wanted));
    }

    let revents = poll_wait(&requests, vfs.hub(), vfs.interrupt(), duration)?;

    let mut read_out = FdSet::zero();
    let mut write_out = FdSet::zero();
    let mut except_out = FdSet::zero();
    let mut ready = 0i64;
    for ((fd, wanted), got) in slots.iter().zip(&revents) {
        let got_err = got.intersects(PollEvents::POLLERR | PollEvents::POLLHUP);
        if wanted.contains(PollEvents::POLLIN) && (got.contains(PollEvents::POLLIN) || got_err) {
            read_out.set(*fd);
            ready += 1;
        }
        if wanted.contains(PollEvents::POLLOUT) && (got.contains(PollEvents::POLLOUT) || got_err) {
            write_out.set(*fd);
            ready += 1;
        }
        if wanted.contains(PollEvents::POLLPRI) && got.contains(PollEvents::POLLPRI) {
            except_out.set(*fd);
            ready += 1;
        }
    }
    write_fdset(core, readfds, &read_out)?;
    write_fdset(core, writefds, &write_out)?;
    write_fdset(core, exceptfds, &except_out)?;
    Ok(ready)
}
