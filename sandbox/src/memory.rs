//! Shared linear memory with bounds-checked access.
//!
//! One [`LinearMemory`] backs the whole sandbox. Worker contexts import it
//! as their `env.memory`; the host side reads and writes it through the
//! helpers here. Every access validates `[ptr, ptr+len)` against the
//! current size, and growth is serialized against in-flight accesses with a
//! read/write barrier.
//!
//! Growth bumps an epoch. A [`MemoryView`] records the epoch it was taken
//! at and refuses to read once the memory has grown, so a cached view can
//! never silently observe a relocated backing store.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard};
use std::time::Duration;

use wasmtime::{Engine, MemoryType, SharedMemory, WaitResult};

use crate::config::WASM_PAGE_SIZE;
use crate::error::{Result, SandboxError};

/// The sandbox's shared linear memory.
pub struct LinearMemory {
    shared: SharedMemory,
    epoch: AtomicU64,
    barrier: RwLock<()>,
}

impl std::fmt::Debug for LinearMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearMemory")
            .field("pages", &self.pages())
            .field("epoch", &self.epoch())
            .finish()
    }
}

impl LinearMemory {
    /// Create a shared memory of `initial_pages`, growable to `max_pages`.
    ///
    /// `engine` must have wasm threads enabled.
    pub fn new(engine: &Engine, initial_pages: u32, max_pages: u32) -> Result<Self> {
        let shared = SharedMemory::new(engine, MemoryType::shared(initial_pages, max_pages))?;
        Ok(Self {
            shared,
            epoch: AtomicU64::new(0),
            barrier: RwLock::new(()),
        })
    }

    /// The underlying wasmtime handle, for importing into worker instances.
    pub fn shared(&self) -> &SharedMemory {
        &self.shared
    }

    /// Current size in pages.
    pub fn pages(&self) -> u64 {
        self.shared.size()
    }

    /// Current size in bytes.
    pub fn size(&self) -> usize {
        self.shared.data_size()
    }

    /// Number of times the memory has grown.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn access(&self) -> RwLockReadGuard<'_, ()> {
        self.barrier.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Grow by `pages`. Returns the previous size in pages.
    pub fn grow(&self, pages: u64) -> Result<u64> {
        let _exclusive = self
            .barrier
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = self.shared.grow(pages).map_err(|e| {
            SandboxError::memory(format!(
                "cannot grow linear memory by {pages} pages from {}: {e}",
                self.shared.size()
            ))
        })?;
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(
            from_pages = previous,
            to_pages = previous + pages,
            epoch,
            "linear memory grew"
        );
        Ok(previous)
    }

    /// Grow until at least `bytes` are addressable.
    pub fn ensure_size(&self, bytes: u64) -> Result<()> {
        let current = self.size() as u64;
        if bytes <= current {
            return Ok(());
        }
        let missing = bytes - current;
        self.grow(missing.div_ceil(WASM_PAGE_SIZE))?;
        Ok(())
    }

    fn cells(&self, data: &[UnsafeCell<u8>], ptr: u32, len: usize) -> Result<*mut u8> {
        let start = ptr as usize;
        let end = start.checked_add(len).ok_or_else(|| {
            SandboxError::memory(format!("range {ptr}+{len} overflows the address space"))
        })?;
        if end > data.len() {
            return Err(SandboxError::memory(format!(
                "range {start}..{end} is outside linear memory of {} bytes",
                data.len()
            )));
        }
        Ok(UnsafeCell::raw_get(data[start..end].as_ptr()))
    }

    /// Copy `len` bytes out of memory at `ptr`.
    pub fn read_bytes(&self, ptr: u32, len: u32) -> Result<Vec<u8>> {
        let _access = self.access();
        let len = len as usize;
        let src = self.cells(self.shared.data(), ptr, len)?;
        let mut out = vec![0u8; len];
        // SAFETY: `src..src+len` was bounds-checked against the live memory
        // and growth is excluded while `_access` is held.
        unsafe { std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), len) };
        Ok(out)
    }

    /// Copy `bytes` into memory at `ptr`.
    pub fn write_bytes(&self, ptr: u32, bytes: &[u8]) -> Result<()> {
        let _access = self.access();
        let dst = self.cells(self.shared.data(), ptr, bytes.len())?;
        // SAFETY: as in `read_bytes`; the destination lies inside a region
        // the caller owns through the allocator.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
        Ok(())
    }

    /// Move `len` bytes from `from` to `to` inside memory. Ranges may overlap.
    pub fn copy_within(&self, from: u32, to: u32, len: u32) -> Result<()> {
        let _access = self.access();
        let data = self.shared.data();
        let src = self.cells(data, from, len as usize)?;
        let dst = self.cells(data, to, len as usize)?;
        // SAFETY: both ranges are bounds-checked; `copy` permits overlap.
        unsafe { std::ptr::copy(src, dst, len as usize) };
        Ok(())
    }

    pub fn read_u32(&self, ptr: u32) -> Result<u32> {
        let bytes = self.read_bytes(ptr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn write_u32(&self, ptr: u32, value: u32) -> Result<()> {
        self.write_bytes(ptr, &value.to_le_bytes())
    }

    fn with_atomic<R>(&self, addr: u32, f: impl FnOnce(&AtomicU32) -> R) -> Result<R> {
        if addr % 4 != 0 {
            return Err(SandboxError::memory(format!("atomic access at unaligned address {addr}")));
        }
        let _access = self.access();
        let ptr = self.cells(self.shared.data(), addr, 4)?;
        // SAFETY: the cell is 4-byte aligned, in bounds, and only ever
        // accessed atomically by host code and worker images.
        let cell = unsafe { &*(ptr as *const AtomicU32) };
        Ok(f(cell))
    }

    pub fn atomic_load_u32(&self, addr: u32) -> Result<u32> {
        self.with_atomic(addr, |cell| cell.load(Ordering::SeqCst))
    }

    pub fn atomic_store_u32(&self, addr: u32, value: u32) -> Result<()> {
        self.with_atomic(addr, |cell| cell.store(value, Ordering::SeqCst))
    }

    /// Block until the cell at `addr` is notified, stops holding `expected`,
    /// or `timeout` passes.
    pub fn atomic_wait32(
        &self,
        addr: u32,
        expected: u32,
        timeout: Option<Duration>,
    ) -> Result<WaitResult> {
        self.shared
            .atomic_wait32(u64::from(addr), expected, timeout)
            .map_err(|trap| SandboxError::memory(format!("atomic wait at {addr}: {trap}")))
    }

    /// Wake up to `count` waiters on `addr`. Returns how many woke.
    pub fn atomic_notify(&self, addr: u32, count: u32) -> Result<u32> {
        self.shared
            .atomic_notify(u64::from(addr), count)
            .map_err(|trap| SandboxError::memory(format!("atomic notify at {addr}: {trap}")))
    }

    /// A view pinned to the current epoch.
    pub fn view(&self) -> MemoryView<'_> {
        MemoryView {
            memory: self,
            epoch: self.epoch(),
        }
    }
}

/// Read access valid only until the memory next grows.
#[derive(Debug)]
pub struct MemoryView<'a> {
    memory: &'a LinearMemory,
    epoch: u64,
}

impl MemoryView<'_> {
    pub fn is_stale(&self) -> bool {
        self.memory.epoch() != self.epoch
    }

    /// Re-pin the view to the current epoch.
    pub fn refresh(&mut self) {
        self.epoch = self.memory.epoch();
    }

    fn check(&self) -> Result<()> {
        if self.is_stale() {
            return Err(SandboxError::memory(format!(
                "stale memory view from epoch {} (memory is now at epoch {}); rebuild it",
                self.epoch,
                self.memory.epoch()
            )));
        }
        Ok(())
    }

    pub fn read_bytes(&self, ptr: u32, len: u32) -> Result<Vec<u8>> {
        self.check()?;
        self.memory.read_bytes(ptr, len)
    }

    pub fn read_u32(&self, ptr: u32) -> Result<u32> {
        self.check()?;
        self.memory.read_u32(ptr)
    }
}
