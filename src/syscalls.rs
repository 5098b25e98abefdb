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

//! Syscall entry points.
//!
//! Each function takes the [`Core`](crate::Core) handle and raw guest
//! arguments, validates pointers before mutating any state, and returns
//! either a non-negative result or an [`Error`]; [`ret`] flattens that into
//! the negated-errno convention of the trampoline.

pub mod fs;
pub mod io;
pub mod signal;

use crate::error::{Error, ErrorImpl, ErrorKind};

/// The result every syscall entry point produces.
pub type SyscallResult = Result<i64, Error>;

/// Flatten a syscall result into the guest ABI: a non-negative value, or a
/// negated errno.
pub fn ret(result: SyscallResult) -> i64 {
    match result {
        Ok(value) => value,
        Err(err) => {
            let errno = err.errno().unwrap_or(libc::EIO);
            log::trace!("syscall error: {err} -> -{errno}");
            -(errno as i64)
        }
    }
}

/// Replace a `NotSupported` failure with the errno the operation wants
/// (`ESPIPE` for llseek on a pipe, `ENOTTY` for ioctl, ...). Other errors
/// pass through.
pub(crate) fn map_unsupported(err: Error, operation: &'static str, errno: i32) -> Error {
    if err.kind() == ErrorKind::NotSupported {
        ErrorImpl::Errno {
            operation: operation.into(),
            errno,
        }
        .into()
    } else {
        err
    }
}

/// Guest descriptors are ints; negative ones are never valid.
pub(crate) fn fd_index(fd: i32) -> Result<usize, Error> {
    if fd < 0 {
        Err(ErrorImpl::BadFd { fd }.into())
    } else {
        Ok(fd as usize)
    }
}

pub(crate) fn invalid(name: &'static str, description: &'static str) -> Error {
    ErrorImpl::InvalidArgument {
        name: name.into(),
        description: description.into(),
    }
    .into()
}
