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

//! Typed access to guest memory.
//!
//! Syscall entry points receive raw guest addresses. These wrappers validate
//! the full range through [`GuestMemory`] before a single byte is copied, so
//! a bad pointer becomes `EFAULT` with no state mutated. Structured values
//! are plain-old-data ([`bytemuck::Pod`]) and cross the boundary as bytes.

use crate::{
    error::{Error, ErrorImpl},
    host::GuestMemory,
};

use std::marker::PhantomData;

use bytemuck::Pod;

/// Upper bound on guest C strings read through [`UserCStr`]. Longer strings
/// are refused rather than truncated.
pub const USER_CSTR_MAX: usize = 4096;

fn fault(addr: u64, len: u64) -> Error {
    ErrorImpl::BadAddress { addr, len }.into()
}

/// A guest pointer the syscall reads from.
#[derive(Debug, Clone, Copy)]
pub struct UserReadPtr<T> {
    addr: u64,
    _marker: PhantomData<T>,
}

/// A guest pointer the syscall writes through.
#[derive(Debug, Clone, Copy)]
pub struct UserWritePtr<T> {
    addr: u64,
    _marker: PhantomData<T>,
}

impl<T> From<u64> for UserReadPtr<T> {
    fn from(addr: u64) -> Self {
        Self {
            addr,
            _marker: PhantomData,
        }
    }
}

impl<T> From<u64> for UserWritePtr<T> {
    fn from(addr: u64) -> Self {
        Self {
            addr,
            _marker: PhantomData,
        }
    }
}

impl<T> UserReadPtr<T> {
    pub fn is_null(&self) -> bool {
        self.addr == 0
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }
}

impl<T> UserWritePtr<T> {
    pub fn is_null(&self) -> bool {
        self.addr == 0
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }
}

impl<T: Pod> UserReadPtr<T> {
    pub fn read(&self, mem: &dyn GuestMemory) -> Result<T, Error> {
        let len = std::mem::size_of::<T>() as u64;
        if !mem.check_read(self.addr, len) {
            return Err(fault(self.addr, len));
        }
        let mut value = T::zeroed();
        mem.read_bytes(self.addr, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    pub fn read_array(&self, mem: &dyn GuestMemory, count: usize) -> Result<Vec<T>, Error> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let size = std::mem::size_of::<T>();
        let len = (size * count) as u64;
        if !mem.check_read(self.addr, len) {
            return Err(fault(self.addr, len));
        }
        let mut values = vec![T::zeroed(); count];
        mem.read_bytes(self.addr, bytemuck::cast_slice_mut(&mut values))?;
        Ok(values)
    }
}

impl<T: Pod> UserWritePtr<T> {
    pub fn write(&self, mem: &dyn GuestMemory, value: &T) -> Result<(), Error> {
        let len = std::mem::size_of::<T>() as u64;
        if !mem.check_write(self.addr, len) {
            return Err(fault(self.addr, len));
        }
        mem.write_bytes(self.addr, bytemuck::bytes_of(value))
    }

    pub fn write_array(&self, mem: &dyn GuestMemory, values: &[T]) -> Result<(), Error> {
        if values.is_empty() {
            return Ok(());
        }
        let len = std::mem::size_of_val(values) as u64;
        if !mem.check_write(self.addr, len) {
            return Err(fault(self.addr, len));
        }
        mem.write_bytes(self.addr, bytemuck::cast_slice(values))
    }
}

impl UserReadPtr<u8> {
    /// Read up to `len` raw bytes (the buffer side of read/write syscalls).
    pub fn read_buf(&self, mem: &dyn GuestMemory, len: usize) -> Result<Vec<u8>, Error> {
        if len == 0 {
            return Ok(Vec::new());
        }
        if !mem.check_read(self.addr, len as u64) {
            return Err(fault(self.addr, len as u64));
        }
        let mut buf = vec![0u8; len];
        mem.read_bytes(self.addr, &mut buf)?;
        Ok(buf)
    }
}

impl UserWritePtr<u8> {
    pub fn write_buf(&self, mem: &dyn GuestMemory, buf: &[u8]) -> Result<(), Error> {
        if buf.is_empty() {
            return Ok(());
        }
        if !mem.check_write(self.addr, buf.len() as u64) {
            return Err(fault(self.addr, buf.len() as u64));
        }
        mem.write_bytes(self.addr, buf)
    }
}

/// A NUL-terminated guest string (path arguments, mostly).
#[derive(Debug, Clone, Copy)]
pub struct UserCStr {
    addr: u64,
}

impl From<u64> for UserCStr {
    fn from(addr: u64) -> Self {
        Self { addr }
    }
}

impl UserCStr {
    pub fn is_null(&self) -> bool {
        self.addr == 0
    }

    /// Read the string, excluding the NUL. Refuses strings longer than
    /// `max_len` with `ENAMETOOLONG`.
    pub fn read(&self, mem: &dyn GuestMemory, max_len: usize) -> Result<Vec<u8>, Error> {
        if !mem.check_read_string(self.addr) {
            return Err(fault(self.addr, 1));
        }
        debug_assert!(max_len <= USER_CSTR_MAX);

        // check_read_string guarantees a readable NUL exists. Chunked reads
        // stop at 4 KiB boundaries so we never touch a page beyond the one
        // holding the terminator.
        let mut out = Vec::new();
        let mut addr = self.addr;
        let mut chunk = [0u8; 256];
        loop {
            let until_page = (4096 - (addr & 4095)) as usize;
            let step = until_page.min(chunk.len());
            mem.read_bytes(addr, &mut chunk[..step])?;
            match memchr::memchr(0, &chunk[..step]) {
                Some(nul) => {
                    out.extend_from_slice(&chunk[..nul]);
                    break;
                }
                None => out.extend_from_slice(&chunk[..step]),
            }
            if out.len() > max_len {
                break;
            }
            addr += step as u64;
        }
        if out.len() > max_len {
            return Err(ErrorImpl::Errno {
                operation: "read guest string".into(),
                errno: libc::ENAMETOOLONG,
            }
            .into());
        }
        Ok(out)
    }
}
