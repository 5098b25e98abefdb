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

//! Signal syscalls.

use crate::{
    core::Core,
    error::ErrorImpl,
    host::GuestContext,
    signal::{
        types::{Disposition, Sig, SigActionWire, SigSet},
        MaskHow,
    },
    syscalls::{invalid, SyscallResult},
    uaccess::{UserReadPtr, UserWritePtr},
};

/// The kernel rejects any other sigset size for the rt_* family.
fn check_sigsetsize(size: u64) -> Result<(), crate::error::Error> {
    if size == std::mem::size_of::<SigSet>() as u64 {
        Ok(())
    } else {
        Err(invalid("sigsetsize", "sigset size mismatch"))
    }
}

pub fn sys_rt_sigaction(
    core: &Core,
    signum: i32,
    act: u64,
    oldact: u64,
    sigsetsize: u64,
) -> SyscallResult {
    check_sigsetsize(sigsetsize)?;
    let sig = Sig::new(signum)?;

    // Validate the out-pointer before the action table can change.
    if oldact != 0 && !core.mem().check_write(oldact, std::mem::size_of::<SigActionWire>() as u64)
    {
        return Err(ErrorImpl::BadAddress {
            addr: oldact,
            len: std::mem::size_of::<SigActionWire>() as u64,
        }
        .into());
    }

    let new = if act != 0 {
        let wire: SigActionWire = UserReadPtr::from(act).read(core.mem())?;
        Some(Disposition::from_wire(wire))
    } else {
        None
    };

    let old = core.signal().rt_sigaction(sig, new)?;
    if oldact != 0 {
        UserWritePtr::<SigActionWire>::from(oldact).write(core.mem(), &old.to_wire())?;
    }
    Ok(0)
}

pub fn sys_rt_sigprocmask(
    core: &Core,
    how: i32,
    set: u64,
    oldset: u64,
    sigsetsize: u64,
) -> SyscallResult {
    check_sigsetsize(sigsetsize)?;

    if oldset != 0 && !core.mem().check_write(oldset, std::mem::size_of::<SigSet>() as u64) {
        return Err(ErrorImpl::BadAddress {
            addr: oldset,
            len: std::mem::size_of::<SigSet>() as u64,
        }
        .into());
    }

    let (how, new) = if set != 0 {
        let how = MaskHow::from_guest(how)?;
        let new: SigSet = UserReadPtr::from(set).read(core.mem())?;
        (how, Some(new))
    } else {
        // A null set queries the mask; `how` is ignored.
        (MaskHow::Block, None)
    };

    let old = core.signal().rt_sigprocmask(how, new)?;
    if oldset != 0 {
        UserWritePtr::<SigSet>::from(oldset).write(core.mem(), &old)?;
    }
    Ok(0)
}

pub fn sys_rt_sigpending(core: &Core, set: u64, sigsetsize: u64) -> SyscallResult {
    check_sigsetsize(sigsetsize)?;
    let pending = core.signal().rt_sigpending();
    UserWritePtr::<SigSet>::from(set).write(core.mem(), &pending)?;
    Ok(0)
}

pub fn sys_kill(core: &Core, pid: i32, signum: i32) -> SyscallResult {
    let sig = if signum == 0 {
        None
    } else {
        Some(Sig::new(signum)?)
    };
    core.signal().kill(pid, sig)?;
    Ok(0)
}

/// rt_sigreturn(2). The trampoline passes the live syscall context; on
/// success the context has been replaced wholesale and the returned value is
/// the restored accumulator, which the trampoline must hand back unchanged.
pub fn sys_rt_sigreturn(core: &Core, ctx: &mut GuestContext) -> SyscallResult {
    core.signal().sigreturn(ctx, core.mem())
}
