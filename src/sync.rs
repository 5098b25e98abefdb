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

//! Small waitable primitives.
//!
//! These realise the host event objects of the original design: the
//! "signal-ready" manual-reset event, the IO readiness pulse that poll and
//! blocking pipe ops sleep on, and the child-wait counting semaphore.

use std::{
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

/// A pulse counter. Waiters snapshot the generation, re-check their
/// condition, and sleep until the generation moves past the snapshot.
/// Missed pulses are impossible: a pulse between snapshot and sleep makes
/// the sleep return immediately.
#[derive(Debug, Default)]
pub struct IoHub {
    gen: Mutex<u64>,
    cond: Condvar,
}

impl IoHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        *self.gen.lock().expect("io hub lock poisoned")
    }

    /// Wake every waiter.
    pub fn pulse(&self) {
        let mut gen = self.gen.lock().expect("io hub lock poisoned");
        *gen = gen.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Sleep until the generation moves past `seen` or `timeout` expires.
    /// Returns true if the generation moved.
    pub fn wait_change(&self, seen: u64, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut gen = self.gen.lock().expect("io hub lock poisoned");
        while *gen == seen {
            match deadline {
                None => {
                    gen = self.cond.wait(gen).expect("io hub lock poisoned");
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(gen, deadline - now)
                        .expect("io hub lock poisoned");
                    gen = guard;
                }
            }
        }
        true
    }
}

/// A manual-reset event.
#[derive(Debug, Default)]
pub struct Event {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut set = self.set.lock().expect("event lock poisoned");
        *set = true;
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        *self.set.lock().expect("event lock poisoned") = false;
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock().expect("event lock poisoned")
    }

    /// Wait until the event is set or `timeout` expires. Returns true if the
    /// event was (or became) set.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut set = self.set.lock().expect("event lock poisoned");
        while !*set {
            match deadline {
                None => {
                    set = self.cond.wait(set).expect("event lock poisoned");
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(set, deadline - now)
                        .expect("event lock poisoned");
                    set = guard;
                }
            }
        }
        true
    }
}

/// A counting semaphore, used for child-death accounting.
#[derive(Debug, Default)]
pub struct Counter {
    count: Mutex<u64>,
    cond: Condvar,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        let mut count = self.count.lock().expect("counter lock poisoned");
        *count += 1;
        self.cond.notify_one();
    }

    pub fn value(&self) -> u64 {
        *self.count.lock().expect("counter lock poisoned")
    }

    /// Take one unit, waiting up to `timeout`. Returns true on success.
    pub fn acquire(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut count = self.count.lock().expect("counter lock poisoned");
        while *count == 0 {
            match deadline {
                None => {
                    count = self.cond.wait(count).expect("counter lock poisoned");
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, _) = self
                        .cond
                        .wait_timeout(count, deadline - now)
                        .expect("counter lock poisoned");
                    count = guard;
                }
            }
        }
        *count -= 1;
        true
    }
}
