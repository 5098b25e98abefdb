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

//! lxcore is the core of a user-space compatibility layer that gives a
//! single emulated process a Linux personality on top of a foreign host.
//! It provides the two subsystems the host cannot: POSIX signal semantics
//! (mask, pending, and delivery by rewriting the emulated main thread's
//! register context with a correctly laid-out signal frame) and a virtual
//! filesystem (a descriptor table over pluggable filesystems, guest path
//! normalisation, and Linux-style symlink resolution at every component of
//! every path).
//!
//! The surrounding emulator — the syscall trampoline, the dynamic binary
//! translator, the memory manager, and process startup — are collaborators
//! reached through the traits in [`host`]. A [`Core`] is assembled from
//! them at init:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use lxcore::{Core, vfs::{devfs::DevFs, hostfs::HostFs}};
//! # fn main() -> Result<(), lxcore::error::Error> {
//! # let (mem, dbt, thread): (Arc<dyn lxcore::host::GuestMemory>,
//! #     Arc<dyn lxcore::host::Dbt>, Arc<dyn lxcore::host::GuestThread>) = todo!();
//! let core = Core::builder()
//!     .memory(mem)
//!     .dbt(dbt)
//!     .main_thread(thread)
//!     .mount(b"/dev", DevFs::new())
//!     .mount(b"/", HostFs::new("/srv/guest-root")?)
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! and threaded through every entry point in [`syscalls`]; there is no
//! process-global state.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(clippy::all)]
#![deny(missing_debug_implementations)]

#[macro_use]
extern crate bitflags;

// The `Core` handle.
mod core;
#[doc(inline)]
pub use crate::core::*;

pub mod error;
pub mod host;
pub mod signal;
pub mod syscalls;
pub mod uaccess;
pub mod vfs;

// Internally used primitives.
pub(crate) mod sync;
