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

//! Unix realisation of the host-side plumbing the signal core needs: the
//! per-child death pipe. The write end is handed to the process-spawning
//! machinery (which leaks it into the child and closes its own copy); the
//! read end stays with the child's monitor, which interprets EOF or a read
//! error as child termination.

use crate::error::{Error, ErrorImpl};

use std::os::fd::OwnedFd;

use rustix::{io::Errno, pipe};

/// The read end of a child-death pipe.
#[derive(Debug)]
pub struct ChildPipe {
    read: OwnedFd,
}

impl ChildPipe {
    /// Create a fresh death pipe, returning the monitor's read end and the
    /// write end destined for the child.
    pub fn create() -> Result<(ChildPipe, OwnedFd), Error> {
        let (read, write) = pipe::pipe().map_err(|err| ErrorImpl::OsError {
            operation: "create child death pipe".into(),
            source: err.into(),
        })?;
        Ok((ChildPipe { read }, write))
    }

    /// Block until every write end of the pipe is gone.
    ///
    /// The child never writes; the pipe exists purely so that its death
    /// closes the write end. A successful non-empty read would mean a
    /// confused child, which we treat the same as termination.
    pub fn wait_closed(&self) {
        let mut buf = [0u8; 16];
        loop {
            match rustix::io::read(&self.read, &mut buf) {
                Ok(_) => return,
                Err(err) if err == Errno::INTR => continue,
                Err(_) => return,
            }
        }
    }
}
