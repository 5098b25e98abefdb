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

//! The mount registry: normalised path in, owning filesystem out.

use crate::{
    error::{Error, ErrorImpl},
    vfs::file::FileSystem,
};

use std::sync::Arc;

struct MountEntry {
    mountpoint: Vec<u8>,
    fs: Arc<dyn FileSystem>,
}

/// Insertion-ordered mount table.
///
/// Lookup is FIRST match on a literal string prefix, not longest-prefix:
/// with overlapping mountpoints the more specific one must be registered
/// first to win.
#[derive(Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl std::fmt::Debug for MountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|entry| {
                (
                    String::from_utf8_lossy(&entry.mountpoint).into_owned(),
                    entry.fs.name(),
                )
            }))
            .finish()
    }
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filesystem at `mountpoint` (a normalised absolute path).
    pub fn add(&mut self, mountpoint: &[u8], fs: Arc<dyn FileSystem>) -> Result<(), Error> {
        if mountpoint.first() != Some(&b'/') {
            return Err(ErrorImpl::InvalidArgument {
                name: "mountpoint".into(),
                description: "mountpoint must be an absolute path".into(),
            }
            .into());
        }
        log::debug!(
            "mounting {} at {}",
            fs.name(),
            String::from_utf8_lossy(mountpoint)
        );
        self.entries.push(MountEntry {
            mountpoint: mountpoint.to_vec(),
            fs,
        });
        Ok(())
    }

    /// Select the owning filesystem for `path`, returning it together with
    /// the mount-relative remainder (no leading `/`).
    pub fn find<'p>(&self, path: &'p [u8]) -> Result<(&Arc<dyn FileSystem>, &'p [u8]), Error> {
        for entry in &self.entries {
            if let Some(rest) = path.strip_prefix(entry.mountpoint.as_slice()) {
                let subpath = match rest.first() {
                    Some(&b'/') => &rest[1..],
                    _ => rest,
                };
                return Ok((&entry.fs, subpath));
            }
        }
        Err(ErrorImpl::NoEntry {
            path: String::from_utf8_lossy(path).into_owned().into(),
        }
        .into())
    }
}
