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

//! Signal delivery end to end: mask/pending races, frame construction,
//! sigreturn, and child-death fan-in.

use crate::{
    signal::{
        frame::{RtSigframe, FPSTATE_ALIGN, FRAME_INFO_OFFSET, FRAME_UC_OFFSET},
        types::{Sig, SigActionWire, SigSet},
        WaitStatus,
    },
    syscalls::{ret, signal as syssig},
    tests::common::{eventually, rig, TestRig, DEFAULT_RESTORER, FPU_FILL, RAM_BASE, TRAMPOLINE},
};

use std::{sync::atomic::Ordering, time::Duration};

use pretty_assertions::assert_eq;

const HANDLER: u64 = 0x4100_0000;
const RESTORER: u64 = 0x4200_0000;

const ACT_ADDR: u64 = RAM_BASE + 0x200;
const SET_ADDR: u64 = RAM_BASE + 0x280;
const OLDSET_ADDR: u64 = RAM_BASE + 0x290;

fn install_handler(rig: &TestRig, signo: i32, handler: u64, sa_mask: SigSet, restorer: u64) {
    let wire = SigActionWire {
        sa_handler: handler,
        sa_flags: 0,
        sa_restorer: restorer,
        sa_mask,
    };
    rig.ram.poke(ACT_ADDR, bytemuck::bytes_of(&wire));
    assert_eq!(
        ret(syssig::sys_rt_sigaction(&rig.core, signo, ACT_ADDR, 0, 8)),
        0
    );
}

fn change_mask(rig: &TestRig, how: i32, set: SigSet) -> SigSet {
    rig.ram.poke(SET_ADDR, bytemuck::bytes_of(&set));
    assert_eq!(
        ret(syssig::sys_rt_sigprocmask(
            &rig.core, how, SET_ADDR, OLDSET_ADDR, 8
        )),
        0
    );
    bytemuck::pod_read_unaligned(&rig.ram.peek(OLDSET_ADDR, 8))
}

fn set_of(sig: Sig) -> SigSet {
    let mut set = SigSet::empty();
    set.add(sig);
    set
}

#[test]
fn mask_then_deliver_runs_the_handler_exactly_once() {
    let rig = rig();
    install_handler(
        &rig,
        Sig::SIGUSR1.raw(),
        HANDLER,
        set_of(Sig::SIGUSR2),
        0, // fall back to the emulator's default restorer
    );

    // Block, then self-kill: the signal parks as pending.
    let old = change_mask(&rig, 0, set_of(Sig::SIGUSR1));
    assert_eq!(old, SigSet::empty());
    assert_eq!(ret(syssig::sys_kill(&rig.core, 1, Sig::SIGUSR1.raw())), 0);

    assert!(
        eventually(|| rig.core.signal().rt_sigpending().contains(Sig::SIGUSR1)),
        "signal must become pending while masked"
    );
    assert_eq!(rig.dbt.deliveries.load(Ordering::SeqCst), 0);
    assert_ne!(rig.thread.context().rip, TRAMPOLINE);

    // Unblock: a DELIVER packet is in flight and the worker arms delivery.
    change_mask(&rig, 1, set_of(Sig::SIGUSR1));
    assert!(
        eventually(|| rig.thread.context().rip == TRAMPOLINE),
        "the main thread context must be redirected to the trampoline"
    );
    assert_eq!(rig.dbt.deliveries.load(Ordering::SeqCst), 1);
    assert!(rig.core.signal().rt_sigpending().is_empty());
    assert!(!rig.core.signal().can_accept());
    assert_eq!(
        rig.core.signal().signal_wait(Some(Duration::ZERO)),
        WaitStatus::Interrupted,
        "the signal-ready event is set while delivery is armed"
    );

    // The trampoline (main thread) builds the frame.
    let mut ctx = rig.thread.context();
    let pre = ctx;
    rig.core
        .signal()
        .setup_handler(&mut ctx, rig.core.mem())
        .expect("frame construction");

    assert_eq!(ctx.rip, HANDLER);
    assert_eq!(ctx.rdi, Sig::SIGUSR1.raw() as u64);
    assert_eq!(ctx.rsi, ctx.rsp + FRAME_INFO_OFFSET);
    assert_eq!(ctx.rdx, ctx.rsp + FRAME_UC_OFFSET);
    assert_eq!((ctx.rsp + 4) % 16, 0, "handler entry stack alignment");
    assert!(rig.core.signal().can_accept());
    assert_eq!(
        rig.core.signal().signal_wait(Some(Duration::ZERO)),
        WaitStatus::TimedOut,
        "the ready event is cleared once setup completes"
    );

    // Handler-time mask: old | sa_mask | {signo}.
    let during = rig.core.signal().current_mask();
    assert!(during.contains(Sig::SIGUSR1));
    assert!(during.contains(Sig::SIGUSR2));

    // The frame on the guest stack.
    let frame: RtSigframe = bytemuck::pod_read_unaligned(
        &rig.ram.peek(ctx.rsp, std::mem::size_of::<RtSigframe>()),
    );
    assert_eq!(frame.pretcode, DEFAULT_RESTORER);
    assert_eq!(frame.sig, Sig::SIGUSR1.raw() as u64);
    assert_eq!(frame.pinfo, ctx.rsp + FRAME_INFO_OFFSET);
    assert_eq!(frame.puc, ctx.rsp + FRAME_UC_OFFSET);
    assert_eq!(frame.info.si_signo, Sig::SIGUSR1.raw());
    assert_eq!(frame.uc.uc_link, 0);
    assert_eq!(frame.uc.uc_flags, 0);
    assert_eq!(frame.uc.uc_sigmask, SigSet::empty(), "pre-delivery mask");
    assert_eq!(frame.uc.uc_mcontext.regs, pre);
    assert_eq!(frame.uc.uc_mcontext.fpstate % FPSTATE_ALIGN, 0);
    assert!(
        rig.ram
            .peek(frame.uc.uc_mcontext.fpstate, 512)
            .iter()
            .all(|&b| b == FPU_FILL),
        "host FPU state saved into the reserved area"
    );

    // The handler returns through the restorer into rt_sigreturn.
    ctx.rsp += 8; // pretcode popped
    let rax = syssig::sys_rt_sigreturn(&rig.core, &mut ctx).expect("sigreturn");
    assert_eq!(rax, pre.rax as i64);
    assert_eq!(ctx, pre, "full register file restored");
    assert_eq!(rig.dbt.fpu_restores.load(Ordering::SeqCst), 1);
    assert_eq!(rig.core.signal().current_mask(), SigSet::empty());

    // Exactly once.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(rig.dbt.deliveries.load(Ordering::SeqCst), 1);
}

#[test]
fn sigkill_and_sigstop_dispositions_are_immutable() {
    let rig = rig();
    for signo in [Sig::SIGKILL.raw(), Sig::SIGSTOP.raw()] {
        let wire = SigActionWire {
            sa_handler: 1, // SIG_IGN
            ..SigActionWire::default()
        };
        rig.ram.poke(ACT_ADDR, bytemuck::bytes_of(&wire));
        assert_eq!(
            ret(syssig::sys_rt_sigaction(&rig.core, signo, ACT_ADDR, 0, 8)),
            -(libc::EINVAL as i64)
        );
    }
    // And the mask never blocks them.
    let mut set = SigSet::empty();
    set.add(Sig::SIGKILL);
    set.add(Sig::SIGSTOP);
    change_mask(&rig, 0, set);
    let now = change_mask(&rig, 0, SigSet::empty());
    assert!(!now.contains(Sig::SIGKILL));
    assert!(!now.contains(Sig::SIGSTOP));
}

#[test]
fn kill_rejects_foreign_pids() {
    let rig = rig();
    assert_eq!(
        ret(syssig::sys_kill(&rig.core, 4242, Sig::SIGUSR1.raw())),
        -(libc::ESRCH as i64)
    );
    // Signal 0 probes for existence without sending anything.
    assert_eq!(ret(syssig::sys_kill(&rig.core, 1, 0)), 0);
    assert_eq!(rig.dbt.deliveries.load(Ordering::SeqCst), 0);
}

#[test]
fn default_terminate_records_an_exit_request() {
    let rig = rig();
    assert_eq!(ret(syssig::sys_kill(&rig.core, 1, Sig::SIGTERM.raw())), 0);
    assert!(eventually(|| rig.core.signal().exit_requested() == Some(Sig::SIGTERM)));
    assert_eq!(rig.dbt.deliveries.load(Ordering::SeqCst), 0);
}

#[test]
fn default_ignore_signals_vanish() {
    let rig = rig();
    assert_eq!(ret(syssig::sys_kill(&rig.core, 1, Sig::SIGCHLD.raw())), 0);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(rig.dbt.deliveries.load(Ordering::SeqCst), 0);
    assert!(rig.core.signal().rt_sigpending().is_empty());
    assert_eq!(rig.core.signal().exit_requested(), None);
}

#[test]
fn second_pending_instance_is_dropped_first_wins() {
    let rig = rig();
    install_handler(&rig, Sig::SIGUSR1.raw(), HANDLER, SigSet::empty(), RESTORER);

    change_mask(&rig, 0, set_of(Sig::SIGUSR1));
    assert_eq!(ret(syssig::sys_kill(&rig.core, 1, Sig::SIGUSR1.raw())), 0);
    assert_eq!(ret(syssig::sys_kill(&rig.core, 1, Sig::SIGUSR1.raw())), 0);
    assert!(eventually(|| rig
        .core
        .signal()
        .rt_sigpending()
        .contains(Sig::SIGUSR1)));

    change_mask(&rig, 1, set_of(Sig::SIGUSR1));
    assert!(eventually(|| rig.dbt.deliveries.load(Ordering::SeqCst) == 1));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        rig.dbt.deliveries.load(Ordering::SeqCst),
        1,
        "the coalesced duplicate must not deliver a second time"
    );
}

#[test]
fn setmask_without_unblocking_sends_no_deliver() {
    let rig = rig();
    install_handler(&rig, Sig::SIGUSR1.raw(), HANDLER, SigSet::empty(), RESTORER);

    change_mask(&rig, 0, set_of(Sig::SIGUSR1));
    assert_eq!(ret(syssig::sys_kill(&rig.core, 1, Sig::SIGUSR1.raw())), 0);
    assert!(eventually(|| rig
        .core
        .signal()
        .rt_sigpending()
        .contains(Sig::SIGUSR1)));

    // SETMASK to the same blocking mask: pending ∧ ¬mask stays empty.
    change_mask(&rig, 2, set_of(Sig::SIGUSR1));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(rig.dbt.deliveries.load(Ordering::SeqCst), 0);

    // SETMASK to empty: now a DELIVER is in flight.
    change_mask(&rig, 2, SigSet::empty());
    assert!(eventually(|| rig.dbt.deliveries.load(Ordering::SeqCst) == 1));
}

#[test]
fn ingress_is_gated_while_a_delivery_is_in_flight() {
    let rig = rig();
    install_handler(&rig, Sig::SIGUSR1.raw(), HANDLER, SigSet::empty(), RESTORER);
    install_handler(&rig, Sig::SIGUSR2.raw(), HANDLER + 0x10, SigSet::empty(), RESTORER);

    assert_eq!(ret(syssig::sys_kill(&rig.core, 1, Sig::SIGUSR1.raw())), 0);
    assert!(eventually(|| !rig.core.signal().can_accept()));
    assert_eq!(rig.dbt.deliveries.load(Ordering::SeqCst), 1);

    // A second signal arriving mid-delivery parks, even though unmasked.
    assert_eq!(ret(syssig::sys_kill(&rig.core, 1, Sig::SIGUSR2.raw())), 0);
    assert!(eventually(|| rig
        .core
        .signal()
        .rt_sigpending()
        .contains(Sig::SIGUSR2)));
    assert_eq!(rig.dbt.deliveries.load(Ordering::SeqCst), 1);

    // Finish the first delivery; sigreturn re-arms the parked signal.
    let mut ctx = rig.thread.context();
    rig.core
        .signal()
        .setup_handler(&mut ctx, rig.core.mem())
        .unwrap();
    ctx.rsp += 8;
    syssig::sys_rt_sigreturn(&rig.core, &mut ctx).unwrap();

    assert!(eventually(|| rig.dbt.deliveries.load(Ordering::SeqCst) == 2));
    assert!(eventually(|| rig
        .core
        .signal()
        .rt_sigpending()
        .is_empty()));
}

#[test]
fn registered_restorer_lands_in_pretcode() {
    let rig = rig();
    install_handler(&rig, Sig::SIGUSR1.raw(), HANDLER, SigSet::empty(), RESTORER);
    assert_eq!(ret(syssig::sys_kill(&rig.core, 1, Sig::SIGUSR1.raw())), 0);
    assert!(eventually(|| rig.thread.context().rip == TRAMPOLINE));

    let mut ctx = rig.thread.context();
    rig.core
        .signal()
        .setup_handler(&mut ctx, rig.core.mem())
        .unwrap();
    let frame: RtSigframe = bytemuck::pod_read_unaligned(
        &rig.ram.peek(ctx.rsp, std::mem::size_of::<RtSigframe>()),
    );
    assert_eq!(frame.pretcode, RESTORER);
}

#[test]
fn child_death_with_default_disposition_only_counts() {
    let rig = rig();
    rig.core.signal().notify_child_death(7);
    assert!(rig.core.signal().wait_child(Some(Duration::from_secs(2))));
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(
        rig.dbt.deliveries.load(Ordering::SeqCst),
        0,
        "SIGCHLD defaults to ignore"
    );
}

#[test]
fn child_death_raises_sigchld_through_the_handler() {
    let rig = rig();
    install_handler(&rig, Sig::SIGCHLD.raw(), HANDLER, SigSet::empty(), RESTORER);

    rig.core.signal().notify_child_death(99);
    assert!(rig.core.signal().wait_child(Some(Duration::from_secs(2))));
    assert!(eventually(|| rig.dbt.deliveries.load(Ordering::SeqCst) == 1));

    let mut ctx = rig.thread.context();
    rig.core
        .signal()
        .setup_handler(&mut ctx, rig.core.mem())
        .unwrap();
    let frame: RtSigframe = bytemuck::pod_read_unaligned(
        &rig.ram.peek(ctx.rsp, std::mem::size_of::<RtSigframe>()),
    );
    assert_eq!(frame.info.si_signo, Sig::SIGCHLD.raw());
    assert_eq!(frame.info.si_code, crate::signal::types::CLD_EXITED);
    assert_eq!(frame.info.fields[0] as u32, 99, "si_pid of the dead child");
}

#[cfg(unix)]
#[test]
fn child_pipe_eof_feeds_the_same_path() {
    use crate::host::unix::ChildPipe;

    let rig = rig();
    let (pipe, write_end) = ChildPipe::create().unwrap();
    rig.core.signal().watch_child(31, pipe);

    // The "child" dies: its leaked write end goes away.
    drop(write_end);
    assert!(rig.core.signal().wait_child(Some(Duration::from_secs(2))));
}

#[test]
fn shutdown_stops_draining_signals() {
    let rig = rig();
    install_handler(&rig, Sig::SIGUSR1.raw(), HANDLER, SigSet::empty(), RESTORER);
    rig.core.shutdown();

    assert_eq!(ret(syssig::sys_kill(&rig.core, 1, Sig::SIGUSR1.raw())), 0);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        rig.dbt.deliveries.load(Ordering::SeqCst),
        0,
        "no delivery after shutdown"
    );
    // Idempotent.
    rig.core.shutdown();
}
