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

//! The signal worker.
//!
//! Every ingress source converges on one packet queue: `kill` from the main
//! thread, child-death monitors, and `DELIVER` prompts re-arming pending
//! signals after a mask change or sigreturn. The worker is the only thread
//! that may suspend and rewrite the main thread's context, and it does so
//! while holding the signal mutex, so the main thread can never be caught
//! suspended inside its own critical section.

use crate::signal::{
    types::{DefaultAction, Disposition, SigInfo},
    SignalShared, SignalState,
};

use std::sync::{mpsc::Receiver, Arc, MutexGuard};

/// Fixed-size message consumed by the worker.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Packet {
    /// A signal arrived (self-kill or synthesized).
    Signal(SigInfo),
    /// Re-evaluate pending ∧ ¬mask and deliver at most one signal.
    Deliver,
    /// A tracked child's death pipe closed.
    ChildDeath(i32),
    /// Stop the worker; no signals are drained afterwards.
    Shutdown,
}

pub(crate) fn run(shared: Arc<SignalShared>, rx: Receiver<Packet>) {
    log::debug!("signal worker started");
    // Queue order is acceptance order; a closed channel means the core was
    // dropped without shutdown, which ends the worker the same way.
    for packet in rx.iter() {
        match packet {
            Packet::Shutdown => break,
            Packet::Signal(si) => ingest(&shared, si),
            Packet::Deliver => prompt(&shared),
            Packet::ChildDeath(pid) => {
                log::debug!("child {pid} terminated");
                shared.child_exits.release();
                ingest(&shared, SigInfo::child_exited(pid, 0));
            }
        }
    }
    log::debug!("signal worker stopped");
}

fn ingest(shared: &Arc<SignalShared>, si: SigInfo) {
    let mut state = shared.state.lock().expect("signal mutex poisoned");
    if state.pending.contains(si.sig) {
        // First-wins: one pending instance per signo.
        log::trace!("{} already pending, dropped", si.sig);
        return;
    }
    if state.mask.contains(si.sig) || !state.can_accept {
        log::trace!("{} parked as pending", si.sig);
        state.pending.add(si.sig);
        state.info[si.sig.index()] = Some(si);
        return;
    }
    deliver(shared, state, si);
}

fn prompt(shared: &Arc<SignalShared>) {
    let mut state = shared.state.lock().expect("signal mutex poisoned");
    if !state.can_accept {
        // A delivery is in flight; the pending signal will be re-armed by
        // the next sigreturn.
        return;
    }
    let deliverable = state.pending & !state.mask;
    if let Some(sig) = deliverable.first() {
        state.pending.remove(sig);
        let si = state.info[sig.index()]
            .take()
            .unwrap_or_else(|| SigInfo::user(sig, 0));
        deliver(shared, state, si);
    }
}

/// Act on one accepted signal. Called with the signal mutex held; for
/// handler deliveries the mutex stays held across the suspension so the
/// main thread cannot be suspended inside its own signal critical section.
fn deliver(shared: &Arc<SignalShared>, mut state: MutexGuard<'_, SignalState>, si: SigInfo) {
    match state.actions.get(si.sig) {
        Disposition::Ignore => {
            log::trace!("{} ignored", si.sig);
        }
        Disposition::Default => match DefaultAction::of(si.sig) {
            DefaultAction::Ignore | DefaultAction::Continue => {
                log::trace!("{} default-ignored", si.sig);
            }
            DefaultAction::Stop => {
                // A single-process personality has nobody to stop for.
                log::warn!("{} default action is stop; not supported, dropped", si.sig);
            }
            DefaultAction::Terminate => {
                log::warn!("{} terminates the emulated process", si.sig);
                *shared.exit_request.lock().expect("exit latch poisoned") = Some(si.sig);
                drop(state);
                shared.hub.pulse();
            }
        },
        Disposition::Custom(_) => {
            state.can_accept = false;
            state.current = Some(si);
            let result = shared.thread.with_suspended(&mut |ctx| {
                shared.dbt.deliver_signal(ctx);
                // Set while still suspended so the ready event can never
                // trail the main thread's handler setup.
                shared.ready.set();
            });
            if let Err(err) = result {
                log::error!("cannot interrupt main thread, {} dropped: {err}", si.sig);
                state.can_accept = true;
                state.current = None;
                shared.ready.clear();
                return;
            }
            log::trace!("{} delivery armed", si.sig);
            drop(state);
            // Wake poll/blocking IO so the main thread reaches the
            // trampoline promptly.
            shared.hub.pulse();
        }
    }
}
