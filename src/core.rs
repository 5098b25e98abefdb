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

//! The core handle.
//!
//! One [`Core`] owns the signal state, the VFS state, and the collaborator
//! trait objects, and is threaded through every syscall entry point. There
//! is no process-global state: the embedding emulator establishes a single
//! immutable reference to its `Core` at init and tears it down at shutdown.

use crate::{
    error::{Error, ErrorImpl},
    host::{Dbt, GuestMemory, GuestThread},
    signal::SignalCore,
    sync::{Event, IoHub},
    vfs::{file::FileSystem, mount::MountTable, Vfs},
};

use std::sync::Arc;

pub struct Core {
    mem: Arc<dyn GuestMemory>,
    signal: SignalCore,
    vfs: Vfs,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("signal", &self.signal)
            .field("vfs", &self.vfs)
            .finish_non_exhaustive()
    }
}

impl Core {
    pub fn builder() -> CoreBuilder {
        CoreBuilder::default()
    }

    pub fn mem(&self) -> &dyn GuestMemory {
        &*self.mem
    }

    pub fn signal(&self) -> &SignalCore {
        &self.signal
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// Exec-style reset: cloexec descriptors close, the umask reverts, and
    /// custom signal handlers fall back to their defaults.
    pub fn reset_on_exec(&self) {
        self.vfs.reset_on_exec();
        self.signal.reset_on_exec();
    }

    /// Tear the core down: close every descriptor and stop the signal
    /// worker.
    pub fn shutdown(&self) {
        self.vfs.shutdown();
        self.signal.shutdown();
    }
}

/// Assembles a [`Core`] from its collaborators and mount table.
#[derive(Default)]
pub struct CoreBuilder {
    mem: Option<Arc<dyn GuestMemory>>,
    dbt: Option<Arc<dyn Dbt>>,
    thread: Option<Arc<dyn GuestThread>>,
    mounts: Vec<(Vec<u8>, Arc<dyn FileSystem>)>,
    pid: Option<i32>,
    default_restorer: u64,
}

impl std::fmt::Debug for CoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreBuilder")
            .field("mounts", &self.mounts.len())
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl CoreBuilder {
    pub fn memory(mut self, mem: Arc<dyn GuestMemory>) -> Self {
        self.mem = Some(mem);
        self
    }

    pub fn dbt(mut self, dbt: Arc<dyn Dbt>) -> Self {
        self.dbt = Some(dbt);
        self
    }

    pub fn main_thread(mut self, thread: Arc<dyn GuestThread>) -> Self {
        self.thread = Some(thread);
        self
    }

    /// Register a filesystem. First match on a literal prefix wins, so
    /// register more specific mountpoints first.
    pub fn mount(mut self, mountpoint: &[u8], fs: Arc<dyn FileSystem>) -> Self {
        self.mounts.push((mountpoint.to_vec(), fs));
        self
    }

    /// The guest's pid (the only pid `kill` accepts).
    pub fn pid(mut self, pid: i32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Guest address of the emulator's default sigreturn restorer, used
    /// when a handler registration carries none.
    pub fn default_restorer(mut self, addr: u64) -> Self {
        self.default_restorer = addr;
        self
    }

    pub fn build(self) -> Result<Core, Error> {
        fn missing(name: &'static str) -> Error {
            ErrorImpl::InvalidArgument {
                name: name.into(),
                description: "required collaborator not provided".into(),
            }
            .into()
        }

        let mem = self.mem.ok_or_else(|| missing("memory"))?;
        let dbt = self.dbt.ok_or_else(|| missing("dbt"))?;
        let thread = self.thread.ok_or_else(|| missing("main_thread"))?;

        let mut mounts = MountTable::new();
        for (mountpoint, fs) in self.mounts {
            mounts.add(&mountpoint, fs)?;
        }

        let hub = Arc::new(IoHub::new());
        let ready = Arc::new(Event::new());
        let vfs = Vfs::new(mounts, Arc::clone(&hub), Arc::clone(&ready));
        let signal = SignalCore::new(
            dbt,
            thread,
            hub,
            ready,
            self.pid.unwrap_or(1),
            self.default_restorer,
        );

        Ok(Core { mem, signal, vfs })
    }
}
