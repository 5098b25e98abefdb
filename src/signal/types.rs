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

//! Signal numbers, sets, actions, and siginfo.

use crate::error::{Error, ErrorImpl};

use std::fmt;

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// Number of signals (valid signal numbers are `1..NSIG`).
pub const NSIG: usize = 64;

pub const SIG_DFL: u64 = 0;
pub const SIG_IGN: u64 = 1;

/// A validated guest signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Sig(i32);

#[rustfmt::skip]
impl Sig {
    pub const SIGHUP: Sig = Sig(1);
    pub const SIGINT: Sig = Sig(2);
    pub const SIGQUIT: Sig = Sig(3);
    pub const SIGILL: Sig = Sig(4);
    pub const SIGTRAP: Sig = Sig(5);
    pub const SIGABRT: Sig = Sig(6);
    pub const SIGBUS: Sig = Sig(7);
    pub const SIGFPE: Sig = Sig(8);
    pub const SIGKILL: Sig = Sig(9);
    pub const SIGUSR1: Sig = Sig(10);
    pub const SIGSEGV: Sig = Sig(11);
    pub const SIGUSR2: Sig = Sig(12);
    pub const SIGPIPE: Sig = Sig(13);
    pub const SIGALRM: Sig = Sig(14);
    pub const SIGTERM: Sig = Sig(15);
    pub const SIGSTKFLT: Sig = Sig(16);
    pub const SIGCHLD: Sig = Sig(17);
    pub const SIGCONT: Sig = Sig(18);
    pub const SIGSTOP: Sig = Sig(19);
    pub const SIGTSTP: Sig = Sig(20);
    pub const SIGTTIN: Sig = Sig(21);
    pub const SIGTTOU: Sig = Sig(22);
    pub const SIGURG: Sig = Sig(23);
    pub const SIGXCPU: Sig = Sig(24);
    pub const SIGXFSZ: Sig = Sig(25);
    pub const SIGVTALRM: Sig = Sig(26);
    pub const SIGPROF: Sig = Sig(27);
    pub const SIGWINCH: Sig = Sig(28);
    pub const SIGIO: Sig = Sig(29);
    pub const SIGPWR: Sig = Sig(30);
    pub const SIGSYS: Sig = Sig(31);
}

impl Sig {
    /// Validate a raw guest signal number.
    pub fn new(signo: i32) -> Result<Sig, Error> {
        if (1..NSIG as i32).contains(&signo) {
            Ok(Sig(signo))
        } else {
            Err(ErrorImpl::InvalidArgument {
                name: "signum".into(),
                description: "signal number out of range".into(),
            }
            .into())
        }
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    /// Zero-based bit/array index.
    pub fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    pub fn is_kill_or_stop(self) -> bool {
        matches!(self, Sig::SIGKILL | Sig::SIGSTOP)
    }
}

impl fmt::Display for Sig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 31] = [
            "SIGHUP", "SIGINT", "SIGQUIT", "SIGILL", "SIGTRAP", "SIGABRT", "SIGBUS", "SIGFPE",
            "SIGKILL", "SIGUSR1", "SIGSEGV", "SIGUSR2", "SIGPIPE", "SIGALRM", "SIGTERM",
            "SIGSTKFLT", "SIGCHLD", "SIGCONT", "SIGSTOP", "SIGTSTP", "SIGTTIN", "SIGTTOU",
            "SIGURG", "SIGXCPU", "SIGXFSZ", "SIGVTALRM", "SIGPROF", "SIGWINCH", "SIGIO",
            "SIGPWR", "SIGSYS",
        ];
        match NAMES.get(self.index()) {
            Some(name) => f.write_str(name),
            None => write!(f, "SIG{}", self.0),
        }
    }
}

/// A guest signal set: bit `n` is signal `n + 1`, the 64-bit wire layout of
/// `sigset_t`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct SigSet(pub u64);

impl SigSet {
    pub const fn empty() -> Self {
        SigSet(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn bit(sig: Sig) -> u64 {
        1 << sig.index()
    }

    pub fn add(&mut self, sig: Sig) {
        self.0 |= Self::bit(sig);
    }

    pub fn remove(&mut self, sig: Sig) {
        self.0 &= !Self::bit(sig);
    }

    pub fn contains(self, sig: Sig) -> bool {
        self.0 & Self::bit(sig) != 0
    }

    /// Lowest-numbered signal in the set.
    pub fn first(self) -> Option<Sig> {
        if self.0 == 0 {
            None
        } else {
            Some(Sig(self.0.trailing_zeros() as i32 + 1))
        }
    }
}

impl std::ops::BitOr for SigSet {
    type Output = SigSet;
    fn bitor(self, rhs: SigSet) -> SigSet {
        SigSet(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for SigSet {
    fn bitor_assign(&mut self, rhs: SigSet) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for SigSet {
    type Output = SigSet;
    fn bitand(self, rhs: SigSet) -> SigSet {
        SigSet(self.0 & rhs.0)
    }
}

impl std::ops::Not for SigSet {
    type Output = SigSet;
    fn not(self) -> SigSet {
        SigSet(!self.0)
    }
}

/// si_code values the core produces.
pub const SI_USER: i32 = 0;
pub const SI_KERNEL: i32 = 0x80;
pub const CLD_EXITED: i32 = 1;

/// Internal siginfo, widened to wire format on frame construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigInfo {
    pub sig: Sig,
    pub code: i32,
    pub errno: i32,
    pub pid: i32,
    pub uid: u32,
    pub status: i32,
}

impl SigInfo {
    pub fn user(sig: Sig, pid: i32) -> Self {
        Self {
            sig,
            code: SI_USER,
            errno: 0,
            pid,
            uid: 0,
            status: 0,
        }
    }

    pub fn kernel(sig: Sig) -> Self {
        Self {
            sig,
            code: SI_KERNEL,
            errno: 0,
            pid: 0,
            uid: 0,
            status: 0,
        }
    }

    pub fn child_exited(pid: i32, status: i32) -> Self {
        Self {
            sig: Sig::SIGCHLD,
            code: CLD_EXITED,
            errno: 0,
            pid,
            uid: 0,
            status,
        }
    }

    pub(crate) fn to_wire(self) -> SigInfoWire {
        let mut wire = SigInfoWire::zeroed();
        wire.si_signo = self.sig.raw();
        wire.si_errno = self.errno;
        wire.si_code = self.code;
        // kill/CLD layout: si_pid + si_uid, then (CLD only) si_status.
        wire.fields[0] = (self.pid as u32 as u64) | ((self.uid as u64) << 32);
        if self.sig == Sig::SIGCHLD {
            wire.fields[1] = self.status as u32 as u64;
        }
        wire
    }
}

/// Guest `siginfo_t` (128 bytes on the wire).
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct SigInfoWire {
    pub si_signo: i32,
    pub si_errno: i32,
    pub si_code: i32,
    pub _pad: i32,
    pub fields: [u64; 14],
}

const_assert_eq!(std::mem::size_of::<SigInfoWire>(), 128);

/// Guest `struct sigaction` wire layout (handler, flags, restorer, mask).
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct SigActionWire {
    pub sa_handler: u64,
    pub sa_flags: u64,
    pub sa_restorer: u64,
    pub sa_mask: SigSet,
}

const_assert_eq!(std::mem::size_of::<SigActionWire>(), 32);

/// A registered user handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub addr: u64,
    pub mask: SigSet,
    pub flags: u64,
    pub restorer: u64,
}

/// What to do when a signal is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    Custom(Handler),
}

impl Disposition {
    pub fn from_wire(wire: SigActionWire) -> Self {
        match wire.sa_handler {
            SIG_DFL => Disposition::Default,
            SIG_IGN => Disposition::Ignore,
            addr => Disposition::Custom(Handler {
                addr,
                mask: wire.sa_mask,
                flags: wire.sa_flags,
                restorer: wire.sa_restorer,
            }),
        }
    }

    pub fn to_wire(self) -> SigActionWire {
        match self {
            Disposition::Default => SigActionWire {
                sa_handler: SIG_DFL,
                ..SigActionWire::default()
            },
            Disposition::Ignore => SigActionWire {
                sa_handler: SIG_IGN,
                ..SigActionWire::default()
            },
            Disposition::Custom(handler) => SigActionWire {
                sa_handler: handler.addr,
                sa_flags: handler.flags,
                sa_restorer: handler.restorer,
                sa_mask: handler.mask,
            },
        }
    }
}

/// What the default disposition of a signal does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Terminate,
    Ignore,
    Stop,
    Continue,
}

impl DefaultAction {
    pub fn of(sig: Sig) -> Self {
        match sig {
            Sig::SIGCHLD | Sig::SIGURG | Sig::SIGWINCH => DefaultAction::Ignore,
            Sig::SIGSTOP | Sig::SIGTSTP | Sig::SIGTTIN | Sig::SIGTTOU => DefaultAction::Stop,
            Sig::SIGCONT => DefaultAction::Continue,
            _ => DefaultAction::Terminate,
        }
    }
}

/// Per-process action table. `SIGKILL` and `SIGSTOP` entries are immutable.
#[derive(Debug)]
pub struct ActionTable {
    actions: [Disposition; NSIG],
}

impl ActionTable {
    pub fn new() -> Self {
        Self {
            actions: [Disposition::Default; NSIG],
        }
    }

    pub fn get(&self, sig: Sig) -> Disposition {
        self.actions[sig.index()]
    }

    /// Replace an entry, returning the previous disposition. Refuses
    /// `SIGKILL`/`SIGSTOP` with `EINVAL`, leaving the table unchanged.
    pub fn set(&mut self, sig: Sig, new: Disposition) -> Result<Disposition, Error> {
        if sig.is_kill_or_stop() {
            return Err(ErrorImpl::InvalidArgument {
                name: "signum".into(),
                description: "SIGKILL and SIGSTOP dispositions cannot be changed".into(),
            }
            .into());
        }
        Ok(std::mem::replace(&mut self.actions[sig.index()], new))
    }

    /// Exec-style reset: custom handlers revert to the default, ignore
    /// dispositions survive.
    pub fn reset_on_exec(&mut self) {
        for action in self.actions.iter_mut() {
            if matches!(action, Disposition::Custom(_)) {
                *action = Disposition::Default;
            }
        }
    }
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::new()
    }
}
