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

//! Readiness polling.
//!
//! Files report instantaneous readiness through [`File::poll_status`] and
//! pulse the shared [`IoHub`] whenever it may have changed. The poll engine
//! re-checks statuses on every pulse; the signal-ready event participates in
//! the same wait, so a blocked poll turns into `EINTR` the moment a signal
//! delivery is decided.

use crate::{
    error::{Error, ErrorImpl},
    sync::{Event, IoHub},
    vfs::file::File,
};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

bitflags! {
    /// Guest poll bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PollEvents: u16 {
        const POLLIN   = 0x1;
        const POLLPRI  = 0x2;
        const POLLOUT  = 0x4;
        const POLLERR  = 0x8;
        const POLLHUP  = 0x10;
        const POLLNVAL = 0x20;
    }
}

/// One slot of a poll request: the file (None for a bad descriptor, which
/// polls as `POLLNVAL`) and the events the guest asked for.
pub(crate) type PollRequest = (Option<Arc<dyn File>>, PollEvents);

/// Wait until at least one request is ready, the timeout expires (all-empty
/// result), or signal delivery interrupts the wait (`EINTR`).
pub(crate) fn poll_wait(
    requests: &[PollRequest],
    hub: &IoHub,
    interrupt: &Event,
    timeout: Option<Duration>,
) -> Result<Vec<PollEvents>, Error> {
    let deadline = timeout.map(|d| Instant::now() + d);
    loop {
        let seen = hub.generation();

        let revents: Vec<PollEvents> = requests
            .iter()
            .map(|(file, wanted)| match file {
                None => PollEvents::POLLNVAL,
                // Error conditions are reported whether or not they were
                // asked for.
                Some(file) => {
                    file.poll_status() & (*wanted | PollEvents::POLLERR | PollEvents::POLLHUP)
                }
            })
            .collect();
        if revents.iter().any(|ev| !ev.is_empty()) {
            return Ok(revents);
        }

        if interrupt.is_set() {
            return Err(ErrorImpl::Interrupted.into());
        }

        let remaining = match deadline {
            None => None,
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(revents);
                }
                Some(deadline - now)
            }
        };
        hub.wait_change(seen, remaining);
    }
}
