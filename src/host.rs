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

//! The host boundary.
//!
//! The core consumes three collaborators: the memory manager (guest pointer
//! validity and byte access), the dynamic binary translator (context
//! rewriting and guest FPU state), and the emulated main thread
//! (suspend-modify-resume). Each is a trait held by [`crate::Core`] so the
//! rest of the crate is host-agnostic safe code; the inherently unsafe
//! suspend/set-context dance lives entirely inside the host's
//! [`GuestThread`] implementation.

#[cfg(unix)]
pub mod unix;

use crate::error::Error;

/// Saved integer and control registers of the emulated main thread.
///
/// The layout mirrors what the DBT hands back for a suspended thread. The
/// signal core only ever reads and writes whole register values; it never
/// interprets guest code. The struct is plain-old-data because it is
/// embedded verbatim in the guest-visible `mcontext`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct GuestContext {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
}

/// Guest pointer validity and byte-level access, provided by the memory
/// manager collaborator.
///
/// The `check_*` contract is the mm's `mm_check_read`/`mm_check_write`/
/// `mm_check_read_string`: a `true` return means the range (or the
/// NUL-terminated string starting at `addr`) is fully mapped with the
/// required access. The typed wrappers in [`crate::uaccess`] call these
/// before any byte is copied, so `EFAULT` short-circuits before state
/// mutation.
pub trait GuestMemory: Send + Sync {
    fn check_read(&self, addr: u64, len: u64) -> bool;
    fn check_write(&self, addr: u64, len: u64) -> bool;
    fn check_read_string(&self, addr: u64) -> bool;

    /// Copy guest memory out. The range has already passed `check_read`.
    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), Error>;

    /// Copy into guest memory. The range has already passed `check_write`.
    fn write_bytes(&self, addr: u64, buf: &[u8]) -> Result<(), Error>;
}

/// The dynamic binary translator.
pub trait Dbt: Send + Sync {
    /// Rewrite a suspended thread's context so that on resume it lands in
    /// the emulator's signal-setup trampoline (which in turn calls
    /// [`crate::signal::SignalCore::setup_handler`]).
    ///
    /// Only ever invoked from inside [`GuestThread::with_suspended`], which
    /// is what the original `dbt_deliver_signal` contract ("MUST be called
    /// with the thread suspended") becomes here.
    fn deliver_signal(&self, ctx: &mut GuestContext);

    /// Save the guest FPU state into guest memory at `addr` (a 512-byte
    /// fxsave-shaped area reserved by the signal frame builder).
    fn save_fpu(&self, mem: &dyn GuestMemory, addr: u64) -> Result<(), Error>;

    /// Restore the guest FPU state from guest memory at `addr`.
    fn restore_fpu(&self, mem: &dyn GuestMemory, addr: u64) -> Result<(), Error>;
}

/// Suspend-modify-resume control over the emulated main thread.
///
/// This is the single bounded boundary around thread suspension: the host
/// implementation suspends the thread, fetches its context, runs `f`, writes
/// the (possibly modified) context back, and resumes. Everything the closure
/// does is ordinary safe code over [`GuestContext`].
pub trait GuestThread: Send + Sync {
    fn with_suspended(&self, f: &mut dyn FnMut(&mut GuestContext)) -> Result<(), Error>;
}
