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

//! The file-descriptor table.

use crate::{
    error::{Error, ErrorImpl},
    vfs::file::{FdFlags, File},
};

use std::sync::Arc;

/// Capacity of the descriptor table.
pub const MAX_FD_COUNT: usize = 1024;

#[derive(Clone)]
struct FdEntry {
    file: Arc<dyn File>,
    flags: FdFlags,
}

/// Dense fixed-capacity descriptor table. Every occupied slot holds one
/// strong reference to its file; the cloexec flag lives in the slot, not in
/// the file.
pub struct FdTable {
    slots: Vec<Option<FdEntry>>,
}

impl std::fmt::Debug for FdTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(fd, slot)| slot.as_ref().map(|_| fd))
            .collect();
        f.debug_struct("FdTable").field("open", &open).finish()
    }
}

fn badfd(fd: usize) -> Error {
    ErrorImpl::BadFd { fd: fd as i32 }.into()
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: vec![None; MAX_FD_COUNT],
        }
    }

    /// Place `file` in the first empty slot, transferring the caller's
    /// reference into the table.
    pub fn store(&mut self, file: Arc<dyn File>, flags: FdFlags) -> Result<usize, Error> {
        let fd = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(ErrorImpl::TooManyOpenFiles)?;
        self.slots[fd] = Some(FdEntry { file, flags });
        Ok(fd)
    }

    /// Like [`FdTable::store`] but scanning from `min_fd` (fcntl F_DUPFD).
    fn store_from(&mut self, min_fd: usize, file: Arc<dyn File>, flags: FdFlags) -> Result<usize, Error> {
        if min_fd >= MAX_FD_COUNT {
            return Err(ErrorImpl::InvalidArgument {
                name: "min_fd".into(),
                description: "starting descriptor out of range".into(),
            }
            .into());
        }
        let fd = self.slots[min_fd..]
            .iter()
            .position(Option::is_none)
            .map(|off| min_fd + off)
            .ok_or(ErrorImpl::TooManyOpenFiles)?;
        self.slots[fd] = Some(FdEntry { file, flags });
        Ok(fd)
    }

    /// Borrow the file behind `fd` (an additional strong reference).
    pub fn get(&self, fd: usize) -> Result<Arc<dyn File>, Error> {
        self.slots
            .get(fd)
            .and_then(Option::as_ref)
            .map(|entry| Arc::clone(&entry.file))
            .ok_or_else(|| badfd(fd))
    }

    pub fn fd_flags(&self, fd: usize) -> Result<FdFlags, Error> {
        self.slots
            .get(fd)
            .and_then(Option::as_ref)
            .map(|entry| entry.flags)
            .ok_or_else(|| badfd(fd))
    }

    pub fn set_fd_flags(&mut self, fd: usize, flags: FdFlags) -> Result<(), Error> {
        self.slots
            .get_mut(fd)
            .and_then(Option::as_mut)
            .map(|entry| entry.flags = flags)
            .ok_or_else(|| badfd(fd))
    }

    /// Release the slot's reference. The file itself closes when its last
    /// reference goes away.
    pub fn close(&mut self, fd: usize) -> Result<(), Error> {
        match self.slots.get_mut(fd) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(badfd(fd)),
        }
    }

    /// Duplicate `fd` into the first empty slot at or above `min_fd`.
    pub fn dup(&mut self, fd: usize, min_fd: usize, flags: FdFlags) -> Result<usize, Error> {
        let file = self.get(fd)?;
        self.store_from(min_fd, file, flags)
    }

    /// Duplicate `fd` into exactly `new_fd`, closing any prior occupant.
    /// `new_fd == fd` is refused.
    pub fn dup_to(&mut self, fd: usize, new_fd: usize, flags: FdFlags) -> Result<usize, Error> {
        if new_fd >= MAX_FD_COUNT {
            return Err(badfd(new_fd));
        }
        if new_fd == fd {
            return Err(ErrorImpl::InvalidArgument {
                name: "newfd".into(),
                description: "newfd must differ from oldfd".into(),
            }
            .into());
        }
        let file = self.get(fd)?;
        self.slots[new_fd] = Some(FdEntry { file, flags });
        Ok(new_fd)
    }

    /// Close every descriptor whose cloexec flag is set.
    pub fn reset_on_exec(&mut self) {
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(entry) if entry.flags.contains(FdFlags::CLOEXEC)) {
                *slot = None;
            }
        }
    }

    /// Close every open descriptor.
    pub fn shutdown(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        error::ErrorKind,
        vfs::file::{FlagsCell, OpenFlags},
    };

    use pretty_assertions::assert_eq;

    struct NullFile {
        flags: FlagsCell,
    }

    impl NullFile {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                flags: FlagsCell::new(OpenFlags::empty()),
            })
        }
    }

    impl File for NullFile {
        fn flags(&self) -> OpenFlags {
            self.flags.get()
        }

        fn set_flags(&self, flags: OpenFlags) {
            self.flags.set(flags);
        }
    }

    #[test]
    fn store_scans_from_zero() {
        let mut table = FdTable::new();
        assert_eq!(table.store(NullFile::new(), FdFlags::empty()).unwrap(), 0);
        assert_eq!(table.store(NullFile::new(), FdFlags::empty()).unwrap(), 1);
        table.close(0).unwrap();
        assert_eq!(
            table.store(NullFile::new(), FdFlags::empty()).unwrap(),
            0,
            "freed slot 0 must be reused first"
        );
    }

    #[test]
    fn refcount_tracks_slots_and_borrows() {
        let mut table = FdTable::new();
        let file = NullFile::new();
        let probe = Arc::clone(&file) as Arc<dyn File>;
        // One reference held by `file`, one by `probe`.
        assert_eq!(Arc::strong_count(&file), 2);

        let fd = table.store(file, FdFlags::empty()).unwrap();
        assert_eq!(Arc::strong_count(&probe), 2, "transfer, not duplication");

        let dup_fd = table.dup(fd, 0, FdFlags::empty()).unwrap();
        assert_eq!(Arc::strong_count(&probe), 3);

        let borrowed = table.get(fd).unwrap();
        assert_eq!(Arc::strong_count(&probe), 4);
        drop(borrowed);

        table.close(fd).unwrap();
        table.close(dup_fd).unwrap();
        assert_eq!(
            Arc::strong_count(&probe),
            1,
            "only the probe reference remains"
        );
    }

    #[test]
    fn dup_to_replaces_occupant() {
        let mut table = FdTable::new();
        let first = NullFile::new();
        let second = NullFile::new();
        let second_probe = Arc::clone(&second) as Arc<dyn File>;

        let fd_a = table.store(first, FdFlags::empty()).unwrap();
        let fd_b = table.store(second, FdFlags::empty()).unwrap();
        assert_eq!(Arc::strong_count(&second_probe), 2);

        let got = table.dup_to(fd_a, fd_b, FdFlags::empty()).unwrap();
        assert_eq!(got, fd_b);
        assert_eq!(
            Arc::strong_count(&second_probe),
            1,
            "prior occupant of the target slot must be released"
        );
        assert!(Arc::ptr_eq(
            &table.get(fd_a).unwrap(),
            &table.get(fd_b).unwrap()
        ));
    }

    #[test]
    fn dup_to_same_fd_rejected() {
        let mut table = FdTable::new();
        let fd = table.store(NullFile::new(), FdFlags::empty()).unwrap();
        let err = table.dup_to(fd, fd, FdFlags::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn dup_to_out_of_range_rejected() {
        let mut table = FdTable::new();
        let fd = table.store(NullFile::new(), FdFlags::empty()).unwrap();
        let err = table.dup_to(fd, MAX_FD_COUNT, FdFlags::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadFd);
    }

    #[test]
    fn reset_on_exec_only_closes_cloexec() {
        let mut table = FdTable::new();
        let keep = table.store(NullFile::new(), FdFlags::empty()).unwrap();
        let lose = table.store(NullFile::new(), FdFlags::CLOEXEC).unwrap();
        table.reset_on_exec();
        assert!(table.get(keep).is_ok());
        assert_eq!(table.get(lose).unwrap_err().kind(), ErrorKind::BadFd);
    }

    #[test]
    fn get_out_of_bounds_is_badfd() {
        let table = FdTable::new();
        assert_eq!(
            table.get(MAX_FD_COUNT + 7).unwrap_err().kind(),
            ErrorKind::BadFd
        );
    }
}
