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

//! The guest signal frame.
//!
//! Layout placed on the guest stack for each delivery, top down: the
//! 512-byte FPU save area (aligned to 512), then the `rt_sigframe` aligned
//! so that the handler entry sees `(sp + 4) % 16 == 0`. The handler's
//! eventual `ret` pops `pretcode` into the restorer, which immediately traps
//! into `rt_sigreturn` with the stack pointer sitting 8 bytes into the
//! frame.

use crate::{
    host::GuestContext,
    signal::types::{SigInfoWire, SigSet},
};

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// Size and alignment of the FPU save area (fxsave image).
pub const FPSTATE_SIZE: u64 = 512;
pub const FPSTATE_ALIGN: u64 = 512;

/// Machine context as restored by `rt_sigreturn`: the integer register file,
/// the guest address of the FPU save area, and the pre-delivery mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct MContext {
    pub regs: GuestContext,
    pub fpstate: u64,
    pub oldmask: u64,
}

/// Guest `ucontext`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct UContext {
    pub uc_flags: u64,
    pub uc_link: u64,
    /// No alternate-stack support: always zeroed (ss_sp, ss_flags, ss_size).
    pub uc_stack: [u64; 3],
    pub uc_mcontext: MContext,
    pub uc_sigmask: SigSet,
    pub _pad: u64,
}

/// The complete signal frame.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct RtSigframe {
    /// Handler return address: the registered restorer, or the emulator's
    /// default restorer.
    pub pretcode: u64,
    pub sig: u64,
    /// Guest pointer to `info` below.
    pub pinfo: u64,
    /// Guest pointer to `uc` below.
    pub puc: u64,
    pub info: SigInfoWire,
    pub uc: UContext,
}

pub const FRAME_INFO_OFFSET: u64 = 32;
pub const FRAME_UC_OFFSET: u64 = FRAME_INFO_OFFSET + 128;

const_assert_eq!(std::mem::size_of::<GuestContext>(), 144);
const_assert_eq!(std::mem::size_of::<MContext>(), 160);
const_assert_eq!(std::mem::size_of::<UContext>(), 216);
const_assert_eq!(std::mem::size_of::<RtSigframe>(), 32 + 128 + 216);

/// Where the two frame pieces land for a given guest stack pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameLayout {
    pub fpstate: u64,
    pub frame: u64,
}

/// Carve the FPU area and the `rt_sigframe` out of the guest stack.
pub(crate) fn layout(stack_top: u64) -> FrameLayout {
    let fpstate = (stack_top - FPSTATE_SIZE) & !(FPSTATE_ALIGN - 1);
    let candidate = fpstate - std::mem::size_of::<RtSigframe>() as u64;
    // Highest frame address not above `candidate` with (frame + 4) % 16 == 0.
    let frame = candidate - (candidate.wrapping_sub(12) & 15);
    FrameLayout { fpstate, frame }
}
