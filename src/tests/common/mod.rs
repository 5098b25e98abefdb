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

//! The shared test harness: a flat guest RAM, a fake DBT and main thread,
//! an in-memory filesystem, and a fully-assembled [`Core`].

pub(crate) mod memfs;

use crate::{
    error::Error,
    host::{Dbt, GuestContext, GuestMemory, GuestThread},
    vfs::devfs::DevFs,
    Core,
};

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

pub(crate) use memfs::MemFs;

/// Guest address the fake DBT redirects to when arming a delivery.
pub(crate) const TRAMPOLINE: u64 = 0xcafe_0000;
/// Byte the fake DBT fills the FPU save area with.
pub(crate) const FPU_FILL: u8 = 0xf7;

pub(crate) const RAM_BASE: u64 = 0x10000;
pub(crate) const RAM_SIZE: u64 = 0x200000;
/// A guest stack top inside the RAM window.
pub(crate) const STACK_TOP: u64 = RAM_BASE + RAM_SIZE - 0x1000;

/// Flat guest memory over one mapped window.
pub(crate) struct GuestRam {
    base: u64,
    buf: Mutex<Vec<u8>>,
}

impl GuestRam {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            base: RAM_BASE,
            buf: Mutex::new(vec![0; RAM_SIZE as usize]),
        })
    }

    fn range(&self, addr: u64, len: u64) -> Option<std::ops::Range<usize>> {
        let start = addr.checked_sub(self.base)? as usize;
        let end = start.checked_add(len as usize)?;
        if end <= RAM_SIZE as usize {
            Some(start..end)
        } else {
            None
        }
    }

    /// Test-side poke, bypassing the checked syscall path.
    pub(crate) fn poke(&self, addr: u64, bytes: &[u8]) {
        let range = self.range(addr, bytes.len() as u64).expect("poke in range");
        self.buf.lock().unwrap()[range].copy_from_slice(bytes);
    }

    pub(crate) fn poke_cstr(&self, addr: u64, s: &[u8]) {
        let mut bytes = s.to_vec();
        bytes.push(0);
        self.poke(addr, &bytes);
    }

    pub(crate) fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        let range = self.range(addr, len as u64).expect("peek in range");
        self.buf.lock().unwrap()[range].to_vec()
    }
}

impl GuestMemory for GuestRam {
    fn check_read(&self, addr: u64, len: u64) -> bool {
        self.range(addr, len).is_some()
    }

    fn check_write(&self, addr: u64, len: u64) -> bool {
        self.range(addr, len).is_some()
    }

    fn check_read_string(&self, addr: u64) -> bool {
        match self.range(addr, 1) {
            Some(range) => self.buf.lock().unwrap()[range.start..].contains(&0),
            None => false,
        }
    }

    fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<(), Error> {
        let range = self
            .range(addr, buf.len() as u64)
            .ok_or(crate::error::ErrorImpl::BadAddress {
                addr,
                len: buf.len() as u64,
            })?;
        buf.copy_from_slice(&self.buf.lock().unwrap()[range]);
        Ok(())
    }

    fn write_bytes(&self, addr: u64, buf: &[u8]) -> Result<(), Error> {
        let range = self
            .range(addr, buf.len() as u64)
            .ok_or(crate::error::ErrorImpl::BadAddress {
                addr,
                len: buf.len() as u64,
            })?;
        self.buf.lock().unwrap()[range].copy_from_slice(buf);
        Ok(())
    }
}

/// Fake binary translator: arming a delivery lands the context on
/// [`TRAMPOLINE`]; FPU save/restore fills and checks a recognisable pattern.
pub(crate) struct FakeDbt {
    pub(crate) deliveries: AtomicUsize,
    pub(crate) fpu_restores: AtomicUsize,
}

impl FakeDbt {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            deliveries: AtomicUsize::new(0),
            fpu_restores: AtomicUsize::new(0),
        })
    }
}

impl Dbt for FakeDbt {
    fn deliver_signal(&self, ctx: &mut GuestContext) {
        ctx.rip = TRAMPOLINE;
        self.deliveries.fetch_add(1, Ordering::SeqCst);
    }

    fn save_fpu(&self, mem: &dyn GuestMemory, addr: u64) -> Result<(), Error> {
        mem.write_bytes(addr, &[FPU_FILL; 512])
    }

    fn restore_fpu(&self, mem: &dyn GuestMemory, addr: u64) -> Result<(), Error> {
        let mut buf = [0u8; 512];
        mem.read_bytes(addr, &mut buf)?;
        assert!(
            buf.iter().all(|&b| b == FPU_FILL),
            "restored FPU area does not carry the saved pattern"
        );
        self.fpu_restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fake main thread: a context slot "suspension" simply locks.
pub(crate) struct FakeThread {
    ctx: Mutex<GuestContext>,
}

impl FakeThread {
    pub(crate) fn new() -> Arc<Self> {
        let ctx = GuestContext {
            rsp: STACK_TOP,
            rip: 0x4000_0000,
            ..GuestContext::default()
        };
        Arc::new(Self {
            ctx: Mutex::new(ctx),
        })
    }

    pub(crate) fn context(&self) -> GuestContext {
        *self.ctx.lock().unwrap()
    }

    pub(crate) fn set_context(&self, ctx: GuestContext) {
        *self.ctx.lock().unwrap() = ctx;
    }
}

impl GuestThread for FakeThread {
    fn with_suspended(&self, f: &mut dyn FnMut(&mut GuestContext)) -> Result<(), Error> {
        let mut ctx = self.ctx.lock().unwrap();
        f(&mut ctx);
        Ok(())
    }
}

/// The guest pid every rig uses.
pub(crate) const GUEST_PID: i32 = 1;
/// Default restorer installed in every rig.
pub(crate) const DEFAULT_RESTORER: u64 = 0xcafe_1000;

pub(crate) struct TestRig {
    pub(crate) core: Core,
    pub(crate) ram: Arc<GuestRam>,
    pub(crate) dbt: Arc<FakeDbt>,
    pub(crate) thread: Arc<FakeThread>,
    pub(crate) fs: Arc<MemFs>,
}

/// A fully-assembled core: memfs at `/`, devfs at `/dev`, console on
/// descriptors 0-2.
pub(crate) fn rig() -> TestRig {
    let ram = GuestRam::new();
    let dbt = FakeDbt::new();
    let thread = FakeThread::new();
    let fs = MemFs::new();

    let core = Core::builder()
        .memory(Arc::clone(&ram))
        .dbt(Arc::clone(&dbt))
        .main_thread(Arc::clone(&thread))
        .mount(b"/dev", DevFs::new())
        .mount(b"/", Arc::clone(&fs))
        .pid(GUEST_PID)
        .default_restorer(DEFAULT_RESTORER)
        .build()
        .expect("assemble test core");

    // Standard descriptors, like process startup would install them.
    use crate::vfs::file::OpenFlags;
    for expected in 0..3 {
        let fd = core
            .vfs()
            .open(b"/dev/console", OpenFlags::empty(), 0)
            .expect("open console");
        assert_eq!(fd, expected, "stdio descriptors in order");
    }

    TestRig {
        core,
        ram,
        dbt,
        thread,
        fs,
    }
}

/// Poll `cond` for up to two seconds.
pub(crate) fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
