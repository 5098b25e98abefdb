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

//! Error types for lxcore.
//!
//! Every guest-visible failure eventually becomes a negated errno at the
//! syscall boundary (see [`crate::syscalls::ret`]), but inside the crate we
//! keep structured errors so that logs carry the failing operation and not
//! just a number.

use std::{borrow::Cow, io::Error as IOError};

/// Opaque error type for lxcore.
///
/// If you wish to do non-trivial error handling with lxcore errors, use
/// [`Error::kind`] to get an [`ErrorKind`] you can handle programmatically.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(#[from] Box<ErrorImpl>);

impl<E: Into<ErrorImpl>> From<E> for Error {
    #[doc(hidden)]
    fn from(err: E) -> Self {
        Self(Box::new(err.into()))
    }
}

impl Error {
    /// Get the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }

    /// Shorthand for `.kind().errno()`.
    pub fn errno(&self) -> Option<i32> {
        self.0.kind().errno()
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> ErrorImpl {
        *self.0
    }
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum ErrorImpl {
    #[error("bad file descriptor {fd}")]
    BadFd { fd: i32 },

    #[error("bad guest address {addr:#x} (length {len})")]
    BadAddress { addr: u64, len: u64 },

    #[error("no such file or directory: {path}")]
    NoEntry { path: Cow<'static, str> },

    #[error("too many levels of symbolic links: {path}")]
    Loop { path: Cow<'static, str> },

    #[error("{field} does not fit in the guest structure field")]
    Overflow { field: Cow<'static, str> },

    #[error("operation {operation} not supported by this object")]
    NotSupported { operation: Cow<'static, str> },

    #[error("invalid {name} argument: {description}")]
    InvalidArgument {
        name: Cow<'static, str>,
        description: Cow<'static, str>,
    },

    #[error("descriptor table is full")]
    TooManyOpenFiles,

    #[error("permission denied: {description}")]
    NoPermission { description: Cow<'static, str> },

    #[error("interrupted by signal delivery")]
    Interrupted,

    #[error("no such process: {pid}")]
    NoSearchProcess { pid: i32 },

    #[error("{operation} failed")]
    Errno {
        operation: Cow<'static, str>,
        errno: i32,
    },

    #[error("{operation} failed")]
    OsError {
        operation: Cow<'static, str>,
        source: IOError,
    },

    #[error("{context}")]
    Wrapped {
        context: Cow<'static, str>,
        source: Box<ErrorImpl>,
    },
}

/// Underlying error class for lxcore errors.
///
/// Each kind corresponds to exactly one errno, except
/// [`ErrorKind::NotSupported`] whose errno depends on the operation that hit
/// the absent capability (the syscall layer maps it per operation) and
/// [`ErrorKind::OsError`] which passes a host or filesystem errno through
/// unchanged.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A descriptor index with no open file behind it.
    BadFd,
    /// A guest pointer failed validation.
    BadAddress,
    /// Path resolution found nothing at a component or the leaf.
    NoEntry,
    /// Symlink expansion exhausted `MAX_SYMLINK_LEVEL`.
    Loop,
    /// A wide value does not fit the narrow guest struct field.
    Overflow,
    /// The filesystem or file does not provide the requested operation.
    NotSupported,
    /// The provided arguments were invalid.
    InvalidArgument,
    /// The descriptor table has no free slot.
    TooManyOpenFiles,
    /// The operation is not permitted on the target.
    NoPermission,
    /// A blocking operation was cut short by signal delivery.
    Interrupted,
    /// A pid that does not name the emulated process.
    NoSearchProcess,
    /// A passed-through errno from the host or a filesystem driver.
    OsError(Option<i32>),
}

impl ErrorImpl {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Self::BadFd { .. } => ErrorKind::BadFd,
            Self::BadAddress { .. } => ErrorKind::BadAddress,
            Self::NoEntry { .. } => ErrorKind::NoEntry,
            Self::Loop { .. } => ErrorKind::Loop,
            Self::Overflow { .. } => ErrorKind::Overflow,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::TooManyOpenFiles => ErrorKind::TooManyOpenFiles,
            Self::NoPermission { .. } => ErrorKind::NoPermission,
            Self::Interrupted => ErrorKind::Interrupted,
            Self::NoSearchProcess { .. } => ErrorKind::NoSearchProcess,
            Self::Errno { errno, .. } => ErrorKind::OsError(Some(*errno)),
            Self::OsError { source, .. } => ErrorKind::OsError(source.raw_os_error()),
            Self::Wrapped { source, .. } => source.kind(),
        }
    }
}

impl ErrorKind {
    /// Return the errno represented by this [`ErrorKind`].
    ///
    /// The only kind without a fixed errno is [`ErrorKind::OsError`] holding
    /// an io error that was not constructed from an os error; the syscall
    /// boundary falls back to `EIO` for those.
    pub fn errno(&self) -> Option<i32> {
        match self {
            ErrorKind::BadFd => Some(libc::EBADF),
            ErrorKind::BadAddress => Some(libc::EFAULT),
            ErrorKind::NoEntry => Some(libc::ENOENT),
            ErrorKind::Loop => Some(libc::ELOOP),
            ErrorKind::Overflow => Some(libc::EOVERFLOW),
            // Default when the syscall layer has no more specific mapping
            // for the operation (see syscalls::map_unsupported).
            ErrorKind::NotSupported => Some(libc::EOPNOTSUPP),
            ErrorKind::InvalidArgument => Some(libc::EINVAL),
            ErrorKind::TooManyOpenFiles => Some(libc::EMFILE),
            ErrorKind::NoPermission => Some(libc::EACCES),
            ErrorKind::Interrupted => Some(libc::EINTR),
            ErrorKind::NoSearchProcess => Some(libc::ESRCH),
            ErrorKind::OsError(errno) => *errno,
        }
    }
}

// Private trait necessary to work around the "orphan trait" restriction.
pub(crate) trait ErrorExt: Sized {
    /// Wrap a `Result<..., Error>` with an additional context string.
    fn wrap<S: Into<String>>(self, context: S) -> Self {
        self.with_wrap(|| context.into())
    }

    /// Wrap a `Result<..., Error>` with an additional context string created
    /// by a closure.
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String;
}

impl ErrorExt for ErrorImpl {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        Self::Wrapped {
            context: context_fn().into(),
            source: self.into(),
        }
    }
}

impl ErrorExt for Error {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        self.0.with_wrap(context_fn).into()
    }
}

impl<T, E: ErrorExt> ErrorExt for Result<T, E> {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| err.with_wrap(context_fn))
    }
}
