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

//! Anonymous pipes.
//!
//! A pipe is one shared ring buffer with a read end and a write end, each an
//! ordinary [`File`] in the descriptor table. Blocking ends sleep on the IO
//! hub and wake on data, space, hangup, or signal delivery (`EINTR`).

use crate::{
    error::{Error, ErrorImpl},
    sync::{Event, IoHub},
    vfs::{
        file::{File, FileType, FlagsCell, OpenFlags},
        poll::PollEvents,
        stat::{FileStat, FsStat},
    },
};

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

/// Pipe buffer size (the Linux default).
pub const PIPE_BUF_CAPACITY: usize = 65536;

static PIPE_INO: AtomicU64 = AtomicU64::new(1);

struct PipeState {
    buf: VecDeque<u8>,
    readers: usize,
    writers: usize,
}

struct PipeShared {
    ino: u64,
    state: Mutex<PipeState>,
    hub: Arc<IoHub>,
    interrupt: Arc<Event>,
}

impl PipeShared {
    fn stat(&self) -> FileStat {
        FileStat {
            ino: self.ino,
            mode: FileType::Fifo.mode_bits() | 0o600,
            nlink: 1,
            blksize: 4096,
            ..FileStat::default()
        }
    }
}

/// Create a connected pipe pair.
pub(crate) fn pipe_pair(
    hub: Arc<IoHub>,
    interrupt: Arc<Event>,
    flags: OpenFlags,
) -> (Arc<PipeReader>, Arc<PipeWriter>) {
    let shared = Arc::new(PipeShared {
        ino: PIPE_INO.fetch_add(1, Ordering::Relaxed),
        state: Mutex::new(PipeState {
            buf: VecDeque::with_capacity(PIPE_BUF_CAPACITY),
            readers: 1,
            writers: 1,
        }),
        hub,
        interrupt,
    });
    let status = flags & OpenFlags::O_NONBLOCK;
    let reader = Arc::new(PipeReader {
        shared: Arc::clone(&shared),
        flags: FlagsCell::new(status),
    });
    let writer = Arc::new(PipeWriter {
        shared,
        flags: FlagsCell::new(status | OpenFlags::O_WRONLY),
    });
    (reader, writer)
}

pub struct PipeReader {
    shared: Arc<PipeShared>,
    flags: FlagsCell,
}

pub struct PipeWriter {
    shared: Arc<PipeShared>,
    flags: FlagsCell,
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader")
            .field("ino", &self.shared.ino)
            .field("flags", &self.flags)
            .finish()
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter")
            .field("ino", &self.shared.ino)
            .field("flags", &self.flags)
            .finish()
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().expect("pipe lock poisoned");
        state.readers -= 1;
        drop(state);
        self.shared.hub.pulse();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().expect("pipe lock poisoned");
        state.writers -= 1;
        drop(state);
        self.shared.hub.pulse();
    }
}

fn eintr() -> Error {
    ErrorImpl::Interrupted.into()
}

fn eagain(operation: &'static str) -> Error {
    ErrorImpl::Errno {
        operation: operation.into(),
        errno: libc::EAGAIN,
    }
    .into()
}

impl File for PipeReader {
    fn flags(&self) -> OpenFlags {
        self.flags.get()
    }

    fn set_flags(&self, flags: OpenFlags) {
        self.flags.set(flags);
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let seen = self.shared.hub.generation();
            {
                let mut state = self.shared.state.lock().expect("pipe lock poisoned");
                if !state.buf.is_empty() {
                    let n = buf.len().min(state.buf.len());
                    for slot in buf[..n].iter_mut() {
                        *slot = state.buf.pop_front().expect("length just checked");
                    }
                    drop(state);
                    // Writers may be waiting for space.
                    self.shared.hub.pulse();
                    return Ok(n);
                }
                if state.writers == 0 {
                    return Ok(0);
                }
            }
            if self.flags.get().contains(OpenFlags::O_NONBLOCK) {
                return Err(eagain("read from empty pipe"));
            }
            if self.shared.interrupt.is_set() {
                return Err(eintr());
            }
            self.shared.hub.wait_change(seen, None);
        }
    }

    fn stat(&self) -> Result<FileStat, Error> {
        Ok(self.shared.stat())
    }

    fn statfs(&self) -> Result<FsStat, Error> {
        Ok(FsStat {
            fs_type: 0x50495045, // PIPEFS_MAGIC
            bsize: 4096,
            namelen: 255,
            ..FsStat::default()
        })
    }

    fn poll_status(&self) -> PollEvents {
        let state = self.shared.state.lock().expect("pipe lock poisoned");
        let mut events = PollEvents::empty();
        if !state.buf.is_empty() {
            events |= PollEvents::POLLIN;
        }
        if state.writers == 0 {
            events |= PollEvents::POLLHUP;
        }
        events
    }
}

impl File for PipeWriter {
    fn flags(&self) -> OpenFlags {
        self.flags.get()
    }

    fn set_flags(&self, flags: OpenFlags) {
        self.flags.set(flags);
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let seen = self.shared.hub.generation();
            {
                let mut state = self.shared.state.lock().expect("pipe lock poisoned");
                if state.readers == 0 {
                    // The guest also gets SIGPIPE from the syscall layer.
                    return Err(ErrorImpl::Errno {
                        operation: "write to pipe with no readers".into(),
                        errno: libc::EPIPE,
                    }
                    .into());
                }
                let space = PIPE_BUF_CAPACITY - state.buf.len();
                if space > 0 {
                    let n = space.min(buf.len());
                    state.buf.extend(&buf[..n]);
                    drop(state);
                    self.shared.hub.pulse();
                    return Ok(n);
                }
            }
            if self.flags.get().contains(OpenFlags::O_NONBLOCK) {
                return Err(eagain("write to full pipe"));
            }
            if self.shared.interrupt.is_set() {
                return Err(eintr());
            }
            self.shared.hub.wait_change(seen, None);
        }
    }

    fn stat(&self) -> Result<FileStat, Error> {
        Ok(self.shared.stat())
    }

    fn poll_status(&self) -> PollEvents {
        let state = self.shared.state.lock().expect("pipe lock poisoned");
        let mut events = PollEvents::empty();
        if state.readers == 0 {
            events |= PollEvents::POLLERR;
        } else if state.buf.len() < PIPE_BUF_CAPACITY {
            events |= PollEvents::POLLOUT;
        }
        events
    }
}
