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

//! Guest path canonicalisation.
//!
//! Guest paths are byte strings with `/` separators; the host's own path
//! syntax never appears here. Collapsing has to happen in the emulator
//! because the resolver repeatedly splices symlink targets into partially
//! resolved paths and needs a stable normal form to do it.

use crate::error::{Error, ErrorImpl};

/// Longest guest path, including the implied NUL.
pub const PATH_MAX: usize = 4096;

/// Canonicalise `input` against the absolute path `base`.
///
/// The result starts with `/`, contains no `//` or `..` and no `.` except a
/// preserved trailing `.` (which keeps "symlink-to-directory" semantics
/// observable for `O_NOFOLLOW` opens), and has no trailing `/` unless it is
/// exactly `/`. `..` never pops past the root. Normalisation is idempotent.
pub fn normalize(base: &[u8], input: &[u8]) -> Result<Vec<u8>, Error> {
    debug_assert!(base.first() == Some(&b'/'), "base must be absolute");

    let mut out: Vec<u8>;
    if input.first() == Some(&b'/') {
        out = vec![b'/'];
    } else {
        out = base.to_vec();
        if out.last() != Some(&b'/') {
            out.push(b'/');
        }
    }

    let mut rest = input;
    while !rest.is_empty() {
        if rest[0] == b'/' {
            rest = &rest[1..];
            continue;
        }
        let (comp, tail) = match memchr::memchr(b'/', rest) {
            Some(cut) => (&rest[..cut], &rest[cut + 1..]),
            None => (rest, &rest[rest.len()..]),
        };
        let at_end = tail.is_empty() && rest.len() == comp.len();
        match comp {
            b"." if at_end => out.push(b'.'),
            b"." => {}
            b".." => {
                // Pop one component, but never the leading '/'.
                if out.len() > 1 {
                    let cut = memchr::memrchr(b'/', &out[..out.len() - 1])
                        .expect("output always starts with '/'");
                    out.truncate(cut + 1);
                }
            }
            _ => {
                out.extend_from_slice(comp);
                out.push(b'/');
            }
        }
        rest = tail;
    }

    if out.len() > 1 && out.last() == Some(&b'/') {
        out.pop();
    }

    if out.len() >= PATH_MAX {
        return Err(ErrorImpl::Errno {
            operation: "normalise guest path".into(),
            errno: libc::ENAMETOOLONG,
        }
        .into());
    }
    Ok(out)
}

/// The directory part of a normalised path: everything up to (excluding) the
/// final component, or `/` for single-component paths.
pub fn parent(path: &[u8]) -> &[u8] {
    debug_assert!(path.first() == Some(&b'/'));
    match memchr::memrchr(b'/', path) {
        Some(0) | None => b"/",
        Some(cut) => &path[..cut],
    }
}

/// The final component of a normalised path.
pub fn basename(path: &[u8]) -> &[u8] {
    match memchr::memrchr(b'/', path) {
        Some(cut) => &path[cut + 1..],
        None => path,
    }
}
