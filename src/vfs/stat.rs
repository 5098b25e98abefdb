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

//! Stat and statfs translation.
//!
//! Filesystems report the wide [`FileStat`]/[`FsStat`]; the syscall layer
//! picks the guest wire layout. The wide-to-narrow conversions check every
//! narrowed field and fail with `EOVERFLOW` rather than truncate.

use crate::error::{Error, ErrorImpl};

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// Guest `struct timespec`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Timespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

/// What a file knows about itself, at full width.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: i64,
    pub blksize: i64,
    pub blocks: i64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

/// What a filesystem knows about itself, at full width.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStat {
    pub fs_type: i64,
    pub bsize: i64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub namelen: i64,
    pub frsize: i64,
    pub flags: i64,
}

/// Guest `struct stat` with 64-bit fields (the stat64/fstat64 wire layout).
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Stat64 {
    pub st_dev: u64,
    pub st_ino: u64,
    pub st_nlink: u64,
    pub st_mode: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub __pad0: u32,
    pub st_rdev: u64,
    pub st_size: i64,
    pub st_blksize: i64,
    pub st_blocks: i64,
    pub st_atime: i64,
    pub st_atime_nsec: i64,
    pub st_mtime: i64,
    pub st_mtime_nsec: i64,
    pub st_ctime: i64,
    pub st_ctime_nsec: i64,
    pub __unused: [i64; 3],
}

const_assert_eq!(std::mem::size_of::<Stat64>(), 144);

/// Legacy narrow guest `struct stat` (the newstat wire layout). Every field
/// is a candidate for overflow.
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Stat {
    pub st_dev: u32,
    pub st_ino: u32,
    pub st_mode: u16,
    pub st_nlink: u16,
    pub st_uid: u16,
    pub st_gid: u16,
    pub st_rdev: u32,
    pub st_size: u32,
    pub st_blksize: u32,
    pub st_blocks: u32,
    pub st_atime: u32,
    pub st_atime_nsec: u32,
    pub st_mtime: u32,
    pub st_mtime_nsec: u32,
    pub st_ctime: u32,
    pub st_ctime_nsec: u32,
    pub __unused4: u32,
    pub __unused5: u32,
}

const_assert_eq!(std::mem::size_of::<Stat>(), 72);

/// Guest `struct statfs64`.
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Statfs64 {
    pub f_type: i64,
    pub f_bsize: i64,
    pub f_blocks: u64,
    pub f_bfree: u64,
    pub f_bavail: u64,
    pub f_files: u64,
    pub f_ffree: u64,
    pub f_fsid: [i32; 2],
    pub f_namelen: i64,
    pub f_frsize: i64,
    pub f_flags: i64,
    pub f_spare: [i64; 4],
}

const_assert_eq!(std::mem::size_of::<Statfs64>(), 120);

/// Legacy narrow guest `struct statfs`.
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Statfs {
    pub f_type: u32,
    pub f_bsize: u32,
    pub f_blocks: u32,
    pub f_bfree: u32,
    pub f_bavail: u32,
    pub f_files: u32,
    pub f_ffree: u32,
    pub f_fsid: [i32; 2],
    pub f_namelen: u32,
    pub f_frsize: u32,
    pub f_flags: u32,
    pub f_spare: [u32; 4],
}

const_assert_eq!(std::mem::size_of::<Statfs>(), 64);

fn narrow<W, N>(value: W, field: &'static str) -> Result<N, Error>
where
    N: TryFrom<W>,
{
    N::try_from(value).map_err(|_| {
        ErrorImpl::Overflow {
            field: field.into(),
        }
        .into()
    })
}

impl FileStat {
    pub fn to_stat64(&self) -> Stat64 {
        Stat64 {
            st_dev: self.dev,
            st_ino: self.ino,
            st_nlink: self.nlink,
            st_mode: self.mode,
            st_uid: self.uid,
            st_gid: self.gid,
            st_rdev: self.rdev,
            st_size: self.size,
            st_blksize: self.blksize,
            st_blocks: self.blocks,
            st_atime: self.atime.tv_sec,
            st_atime_nsec: self.atime.tv_nsec,
            st_mtime: self.mtime.tv_sec,
            st_mtime_nsec: self.mtime.tv_nsec,
            st_ctime: self.ctime.tv_sec,
            st_ctime_nsec: self.ctime.tv_nsec,
            ..Stat64::default()
        }
    }

    pub fn to_stat(&self) -> Result<Stat, Error> {
        Ok(Stat {
            st_dev: narrow(self.dev, "st_dev")?,
            st_ino: narrow(self.ino, "st_ino")?,
            st_mode: narrow(self.mode, "st_mode")?,
            st_nlink: narrow(self.nlink, "st_nlink")?,
            st_uid: narrow(self.uid, "st_uid")?,
            st_gid: narrow(self.gid, "st_gid")?,
            st_rdev: narrow(self.rdev, "st_rdev")?,
            st_size: narrow(self.size, "st_size")?,
            st_blksize: narrow(self.blksize, "st_blksize")?,
            st_blocks: narrow(self.blocks, "st_blocks")?,
            st_atime: narrow(self.atime.tv_sec, "st_atime")?,
            st_atime_nsec: narrow(self.atime.tv_nsec, "st_atime_nsec")?,
            st_mtime: narrow(self.mtime.tv_sec, "st_mtime")?,
            st_mtime_nsec: narrow(self.mtime.tv_nsec, "st_mtime_nsec")?,
            st_ctime: narrow(self.ctime.tv_sec, "st_ctime")?,
            st_ctime_nsec: narrow(self.ctime.tv_nsec, "st_ctime_nsec")?,
            __unused4: 0,
            __unused5: 0,
        })
    }
}

impl FsStat {
    pub fn to_statfs64(&self) -> Statfs64 {
        Statfs64 {
            f_type: self.fs_type,
            f_bsize: self.bsize,
            f_blocks: self.blocks,
            f_bfree: self.bfree,
            f_bavail: self.bavail,
            f_files: self.files,
            f_ffree: self.ffree,
            f_fsid: [0; 2],
            f_namelen: self.namelen,
            f_frsize: self.frsize,
            f_flags: self.flags,
            f_spare: [0; 4],
        }
    }

    pub fn to_statfs(&self) -> Result<Statfs, Error> {
        Ok(Statfs {
            f_type: narrow(self.fs_type, "f_type")?,
            f_bsize: narrow(self.bsize, "f_bsize")?,
            f_blocks: narrow(self.blocks, "f_blocks")?,
            f_bfree: narrow(self.bfree, "f_bfree")?,
            f_bavail: narrow(self.bavail, "f_bavail")?,
            f_files: narrow(self.files, "f_files")?,
            f_ffree: narrow(self.ffree, "f_ffree")?,
            f_fsid: [0; 2],
            f_namelen: narrow(self.namelen, "f_namelen")?,
            f_frsize: narrow(self.frsize, "f_frsize")?,
            f_flags: narrow(self.flags, "f_flags")?,
            f_spare: [0; 4],
        })
    }
}
