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

//! The signal core.
//!
//! State (actions, mask, pending, `can_accept_signal`) lives under one
//! mutex. Ingress converges on the worker's packet queue; the worker alone
//! rewrites the main thread's context (see [`worker`]); handler setup and
//! sigreturn run on the main thread with the guest syscall context in hand.

pub mod frame;
pub mod types;
pub(crate) mod worker;

use crate::{
    error::{Error, ErrorImpl},
    host::{Dbt, GuestContext, GuestMemory, GuestThread},
    signal::{
        frame::{MContext, RtSigframe, UContext, FRAME_INFO_OFFSET, FRAME_UC_OFFSET},
        types::{ActionTable, Disposition, Sig, SigInfo, SigSet, NSIG},
        worker::Packet,
    },
    sync::{Counter, Event, IoHub},
    uaccess::{UserReadPtr, UserWritePtr},
};

use std::{
    sync::{
        mpsc::{self, Sender},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

/// Outcome of [`SignalCore::signal_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The signal-ready event fired before the timeout.
    Interrupted,
    TimedOut,
}

/// How rt_sigprocmask combines the new set with the current mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskHow {
    Block,
    Unblock,
    SetMask,
}

impl MaskHow {
    pub fn from_guest(how: i32) -> Result<Self, Error> {
        match how {
            0 => Ok(MaskHow::Block),
            1 => Ok(MaskHow::Unblock),
            2 => Ok(MaskHow::SetMask),
            _ => Err(ErrorImpl::InvalidArgument {
                name: "how".into(),
                description: "unknown sigprocmask operation".into(),
            }
            .into()),
        }
    }
}

pub(crate) struct SignalState {
    pub(crate) actions: ActionTable,
    pub(crate) mask: SigSet,
    pub(crate) pending: SigSet,
    pub(crate) info: [Option<SigInfo>; NSIG],
    pub(crate) current: Option<SigInfo>,
    pub(crate) can_accept: bool,
}

pub(crate) struct SignalShared {
    pub(crate) state: Mutex<SignalState>,
    /// The "signal-ready" event; doubles as the interrupt probe for
    /// blocking VFS operations.
    pub(crate) ready: Arc<Event>,
    pub(crate) hub: Arc<IoHub>,
    pub(crate) child_exits: Counter,
    pub(crate) thread: Arc<dyn GuestThread>,
    pub(crate) dbt: Arc<dyn Dbt>,
    pub(crate) exit_request: Mutex<Option<Sig>>,
}

/// The signal half of the core.
pub struct SignalCore {
    shared: Arc<SignalShared>,
    tx: Sender<Packet>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    pid: i32,
    default_restorer: u64,
}

impl std::fmt::Debug for SignalCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalCore")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl SignalCore {
    pub(crate) fn new(
        dbt: Arc<dyn Dbt>,
        thread_handle: Arc<dyn GuestThread>,
        hub: Arc<IoHub>,
        ready: Arc<Event>,
        pid: i32,
        default_restorer: u64,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(SignalShared {
            state: Mutex::new(SignalState {
                actions: ActionTable::new(),
                mask: SigSet::empty(),
                pending: SigSet::empty(),
                info: [None; NSIG],
                current: None,
                can_accept: true,
            }),
            ready,
            hub,
            child_exits: Counter::new(),
            thread: thread_handle,
            dbt,
            exit_request: Mutex::new(None),
        });

        // A failed spawn leaves a core that parks every signal as pending:
        // degraded but defined.
        let worker = thread::Builder::new()
            .name("lx-signal".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || worker::run(shared, rx)
            })
            .map_err(|err| log::error!("signal worker spawn failed: {err}"))
            .ok();

        Self {
            shared,
            tx,
            worker: Mutex::new(worker),
            pid,
            default_restorer,
        }
    }

    fn enqueue(&self, packet: Packet) {
        if self.tx.send(packet).is_err() {
            log::warn!("signal worker is gone; packet dropped");
        }
    }

    /// Queue a signal for the emulated process.
    pub fn send(&self, si: SigInfo) {
        log::debug!("queueing {} (code {})", si.sig, si.code);
        self.enqueue(Packet::Signal(si));
    }

    /// kill(2). Only the emulated process itself can be signalled; any
    /// other pid is `ESRCH`. A `None` signal performs the existence check
    /// only.
    pub fn kill(&self, pid: i32, sig: Option<Sig>) -> Result<(), Error> {
        if pid != self.pid {
            return Err(ErrorImpl::NoSearchProcess { pid }.into());
        }
        if let Some(sig) = sig {
            self.send(SigInfo::user(sig, self.pid));
        }
        Ok(())
    }

    /// rt_sigaction(2): atomically fetch the old disposition and optionally
    /// install a new one.
    pub fn rt_sigaction(
        &self,
        sig: Sig,
        new: Option<Disposition>,
    ) -> Result<Disposition, Error> {
        let mut state = self.shared.state.lock().expect("signal mutex poisoned");
        let old = state.actions.get(sig);
        if let Some(new) = new {
            state.actions.set(sig, new)?;
            log::debug!("{sig} disposition changed");
        }
        Ok(old)
    }

    /// rt_sigprocmask(2). Unmasking a pending signal puts a `DELIVER`
    /// packet in flight before this returns.
    pub fn rt_sigprocmask(&self, how: MaskHow, set: Option<SigSet>) -> Result<SigSet, Error> {
        let mut state = self.shared.state.lock().expect("signal mutex poisoned");
        let old = state.mask;
        if let Some(mut set) = set {
            // SIGKILL and SIGSTOP are never maskable.
            set.remove(Sig::SIGKILL);
            set.remove(Sig::SIGSTOP);
            state.mask = match how {
                MaskHow::Block => old | set,
                MaskHow::Unblock => state.mask & !set,
                MaskHow::SetMask => set,
            };
            if !(state.pending & !state.mask).is_empty() {
                self.enqueue(Packet::Deliver);
            }
        }
        Ok(old)
    }

    /// rt_sigpending(2).
    pub fn rt_sigpending(&self) -> SigSet {
        self.shared.state.lock().expect("signal mutex poisoned").pending
    }

    /// Build the signal frame on the guest stack and redirect `ctx` into
    /// the user handler. Runs on the main thread, called by the signal
    /// trampoline with the syscall context in hand.
    pub fn setup_handler(
        &self,
        ctx: &mut GuestContext,
        mem: &dyn GuestMemory,
    ) -> Result<(), Error> {
        // Snapshot everything the frame needs while holding the mutex, then
        // release it before touching guest memory.
        let (si, handler, old_mask) = {
            let mut state = self.shared.state.lock().expect("signal mutex poisoned");
            let si = state.current.take().ok_or(ErrorImpl::InvalidArgument {
                name: "context".into(),
                description: "no signal delivery in progress".into(),
            })?;
            match state.actions.get(si.sig) {
                Disposition::Custom(handler) => (si, handler, state.mask),
                _ => {
                    // The disposition changed between arming and setup.
                    state.can_accept = true;
                    self.shared.ready.clear();
                    return Err(ErrorImpl::InvalidArgument {
                        name: "signum".into(),
                        description: "armed signal no longer has a handler".into(),
                    }
                    .into());
                }
            }
        };

        let layout = frame::layout(ctx.rsp);
        self.shared.dbt.save_fpu(mem, layout.fpstate)?;

        let frame = RtSigframe {
            pretcode: if handler.restorer != 0 {
                handler.restorer
            } else {
                self.default_restorer
            },
            sig: si.sig.raw() as u64,
            pinfo: layout.frame + FRAME_INFO_OFFSET,
            puc: layout.frame + FRAME_UC_OFFSET,
            info: si.to_wire(),
            uc: UContext {
                uc_flags: 0,
                uc_link: 0,
                uc_stack: [0; 3],
                uc_mcontext: MContext {
                    regs: *ctx,
                    fpstate: layout.fpstate,
                    oldmask: old_mask.0,
                },
                uc_sigmask: old_mask,
                _pad: 0,
            },
        };
        UserWritePtr::<RtSigframe>::from(layout.frame).write(mem, &frame)?;

        {
            let mut state = self.shared.state.lock().expect("signal mutex poisoned");
            state.mask |= handler.mask;
            state.mask.add(si.sig);
            state.can_accept = true;
            self.shared.ready.clear();
        }

        log::debug!(
            "{} handler at {:#x}, frame at {:#x}",
            si.sig,
            handler.addr,
            layout.frame
        );
        ctx.rsp = layout.frame;
        ctx.rip = handler.addr;
        ctx.rdi = si.sig.raw() as u64;
        ctx.rsi = frame.pinfo;
        ctx.rdx = frame.puc;
        Ok(())
    }

    /// rt_sigreturn(2): restore FPU and mask from the frame, re-arm any
    /// now-deliverable pending signal, and restore the register file. The
    /// syscall's return value is the restored accumulator.
    pub fn sigreturn(&self, ctx: &mut GuestContext, mem: &dyn GuestMemory) -> Result<i64, Error> {
        // The restorer entered via the frame's pretcode pop, so the stack
        // pointer sits 8 bytes into the frame.
        let frame_addr = ctx.rsp.wrapping_sub(8);
        let frame: RtSigframe = UserReadPtr::from(frame_addr).read(mem)?;

        self.shared
            .dbt
            .restore_fpu(mem, frame.uc.uc_mcontext.fpstate)?;

        {
            let mut state = self.shared.state.lock().expect("signal mutex poisoned");
            let mut mask = frame.uc.uc_sigmask;
            mask.remove(Sig::SIGKILL);
            mask.remove(Sig::SIGSTOP);
            state.mask = mask;
            if !(state.pending & !state.mask).is_empty() {
                self.enqueue(Packet::Deliver);
            }
        }

        *ctx = frame.uc.uc_mcontext.regs;
        log::debug!("sigreturn to {:#x}", ctx.rip);
        Ok(ctx.rax as i64)
    }

    /// Wait for the signal-ready event alongside a timeout, the multi-object
    /// wait of blocking syscalls. Returns [`WaitStatus::Interrupted`] when
    /// the event fired.
    pub fn signal_wait(&self, timeout: Option<Duration>) -> WaitStatus {
        if self.shared.ready.wait(timeout) {
            WaitStatus::Interrupted
        } else {
            WaitStatus::TimedOut
        }
    }

    /// Track a child process by the read end of its death pipe. EOF (or a
    /// read error) raises `SIGCHLD` through the normal ingress path and
    /// releases one unit of the child-wait counter.
    #[cfg(unix)]
    pub fn watch_child(&self, pid: i32, pipe: crate::host::unix::ChildPipe) {
        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("lx-child-{pid}"))
            .spawn(move || {
                pipe.wait_closed();
                let _ = tx.send(Packet::ChildDeath(pid));
            });
        if let Err(err) = spawned {
            log::error!("cannot monitor child {pid}: {err}");
        }
    }

    /// Directly report a child's death (hosts without pipe monitors).
    pub fn notify_child_death(&self, pid: i32) {
        self.enqueue(Packet::ChildDeath(pid));
    }

    /// Consume one child-death notification, waiting up to `timeout`.
    pub fn wait_child(&self, timeout: Option<Duration>) -> bool {
        self.shared.child_exits.acquire(timeout)
    }

    /// The signal a default disposition decided should terminate the
    /// process, if any.
    pub fn exit_requested(&self) -> Option<Sig> {
        *self.shared.exit_request.lock().expect("exit latch poisoned")
    }

    /// Exec-style reset: custom handlers revert to default dispositions.
    pub fn reset_on_exec(&self) {
        let mut state = self.shared.state.lock().expect("signal mutex poisoned");
        state.actions.reset_on_exec();
    }

    /// Stop the worker. No signals are drained after this.
    pub fn shutdown(&self) {
        self.enqueue(Packet::Shutdown);
        if let Some(handle) = self.worker.lock().expect("worker slot poisoned").take() {
            if handle.join().is_err() {
                log::error!("signal worker panicked");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn can_accept(&self) -> bool {
        self.shared.state.lock().expect("signal mutex poisoned").can_accept
    }

    #[cfg(test)]
    pub(crate) fn current_mask(&self) -> SigSet {
        self.shared.state.lock().expect("signal mutex poisoned").mask
    }
}

impl Drop for SignalCore {
    fn drop(&mut self) {
        // Idempotent: shutdown() may already have joined the worker.
        let _ = self.tx.send(Packet::Shutdown);
    }
}
