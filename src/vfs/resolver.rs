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

//! Symlink-aware path resolution.
//!
//! Every path-taking operation funnels through [`resolve`]: normalise the
//! user path, pick the owning filesystem, attempt the operation, and only on
//! `ENOENT` go looking for a symlink among the path components. Performing
//! the operation first keeps the common case free of a check-then-act
//! window; the TOCTOU between a component probe and the retried operation is
//! inherent to the host boundary and accepted.
//!
//! The walk is bounded by [`MAX_SYMLINK_LEVEL`] expansions in total (leaf
//! and component symlinks share the one counter); exhausting it is `ELOOP`.

use crate::{
    error::{Error, ErrorImpl, ErrorKind},
    vfs::{
        file::FileSystem,
        mount::MountTable,
        path::{normalize, parent},
    },
};

use std::sync::Arc;

/// How many symlink expansions a single resolution may perform.
pub const MAX_SYMLINK_LEVEL: usize = 40;

/// What an operation attempt produced: a final value, or a leaf symlink
/// whose target must be spliced in and the walk re-entered (open only).
pub(crate) enum OpOutcome<T> {
    Done(T),
    FollowSymlink(Vec<u8>),
}

fn lossy(path: &[u8]) -> std::borrow::Cow<'static, str> {
    String::from_utf8_lossy(path).into_owned().into()
}

/// Does this failure mean "nothing at this name", i.e. worth a component
/// probe? Absent capabilities count: a filesystem without the operation
/// behaves as if the name was not there.
fn probes(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::NoEntry | ErrorKind::NotSupported | ErrorKind::OsError(Some(libc::ENOENT))
    )
}

/// Convert a probe-worthy error into the guest-visible `ENOENT`.
fn to_noentry(err: Error, path: &[u8]) -> Error {
    match err.kind() {
        ErrorKind::NoEntry => err,
        _ => ErrorImpl::NoEntry { path: lossy(path) }.into(),
    }
}

/// Drive `op` against the filesystem owning `user_path`, expanding symlinks
/// at the leaf (via [`OpOutcome::FollowSymlink`]) and at any component (via
/// the `ENOENT` probe) until the operation succeeds, fails for a reason
/// other than `ENOENT`, or the expansion budget runs out.
pub(crate) fn resolve<T, F>(
    mounts: &MountTable,
    cwd: &[u8],
    user_path: &[u8],
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut(&Arc<dyn FileSystem>, &[u8]) -> Result<OpOutcome<T>, Error>,
{
    let mut path = normalize(cwd, user_path)?;
    for _ in 0..MAX_SYMLINK_LEVEL {
        let (fs, subpath) = {
            let (fs, subpath) = mounts.find(&path)?;
            (Arc::clone(fs), subpath.to_vec())
        };
        match op(&fs, &subpath) {
            Ok(OpOutcome::Done(value)) => return Ok(value),
            Ok(OpOutcome::FollowSymlink(target)) => {
                log::trace!(
                    "following leaf symlink {} -> {}",
                    String::from_utf8_lossy(&path),
                    String::from_utf8_lossy(&target)
                );
                path = normalize(parent(&path), &target)?;
            }
            Err(err) if probes(err.kind()) => {
                if !component_symlink(&fs, &mut path, &subpath)? {
                    return Err(to_noentry(err, &path));
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(ErrorImpl::Loop { path: lossy(&path) }.into())
}

/// Two-path variant for `link` and `rename`. Both sides must resolve onto
/// the same filesystem (`EXDEV` otherwise); on `ENOENT` the old side is
/// probed for component symlinks first, then the new side.
pub(crate) fn resolve_pair<T, F>(
    mounts: &MountTable,
    cwd: &[u8],
    old_user: &[u8],
    new_user: &[u8],
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut(&Arc<dyn FileSystem>, &[u8], &[u8]) -> Result<T, Error>,
{
    let mut old_path = normalize(cwd, old_user)?;
    let mut new_path = normalize(cwd, new_user)?;
    for _ in 0..MAX_SYMLINK_LEVEL {
        let (old_fs, old_sub) = {
            let (fs, subpath) = mounts.find(&old_path)?;
            (Arc::clone(fs), subpath.to_vec())
        };
        let (new_fs, new_sub) = {
            let (fs, subpath) = mounts.find(&new_path)?;
            (Arc::clone(fs), subpath.to_vec())
        };
        if !Arc::ptr_eq(&old_fs, &new_fs) {
            return Err(ErrorImpl::Errno {
                operation: "two-path operation across filesystems".into(),
                errno: libc::EXDEV,
            }
            .into());
        }
        match op(&old_fs, &old_sub, &new_sub) {
            Ok(value) => return Ok(value),
            Err(err) if probes(err.kind()) => {
                if component_symlink(&old_fs, &mut old_path, &old_sub)? {
                    continue;
                }
                if component_symlink(&new_fs, &mut new_path, &new_sub)? {
                    continue;
                }
                return Err(to_noentry(err, &old_path));
            }
            Err(err) => return Err(err),
        }
    }
    Err(ErrorImpl::Loop {
        path: lossy(&old_path),
    }
    .into())
}

/// The component-symlink probe.
///
/// Scan `subpath` for `/` right to left; at each cut ask the filesystem to
/// readlink the truncated prefix. The first hit splices its target between
/// the already-resolved head of `path` and the untouched tail, and the
/// caller retries. Returns false when nothing was a symlink (or the
/// filesystem has no readlink at all), which the caller turns into the
/// original `ENOENT`.
fn component_symlink(
    fs: &Arc<dyn FileSystem>,
    path: &mut Vec<u8>,
    subpath: &[u8],
) -> Result<bool, Error> {
    debug_assert!(path.ends_with(subpath));
    for cut in memchr::memrchr_iter(b'/', subpath) {
        match fs.readlink(&subpath[..cut]) {
            Ok(target) => {
                // End of the symlink component inside the absolute path.
                let end = path.len() - (subpath.len() - cut);
                let base = parent(&path[..end]).to_vec();
                let mut remainder = target;
                remainder.push(b'/');
                remainder.extend_from_slice(&subpath[cut + 1..]);
                log::trace!(
                    "component symlink {} spliced into {}",
                    String::from_utf8_lossy(&path[..end]),
                    String::from_utf8_lossy(&remainder)
                );
                *path = normalize(&base, &remainder)?;
                return Ok(true);
            }
            // The filesystem has no readlink capability at all; no component
            // of it can ever be a symlink.
            Err(err) if err.kind() == ErrorKind::NotSupported => return Ok(false),
            // Not a symlink (or gone); keep scanning shorter prefixes.
            Err(_) => continue,
        }
    }
    Ok(false)
}
