//! Guest heap allocator over the shared linear memory.
//!
//! Bookkeeping only: the allocator hands out offsets and tracks which are
//! live. The sandbox runtime grows the memory to cover [`GuestAllocator::top`]
//! after each allocation.
//!
//! Layout:
//! ```text
//! [0, HEAP_BASE)      reserved, so offset 0 is never a valid allocation
//! [HEAP_BASE, top)    allocated blocks and free-list holes
//! [top, limit)        untouched; memory grows into it page by page
//! ```
//!
//! Sizes round up to 8 bytes. Free blocks coalesce with their neighbours,
//! and a free block touching `top` is returned to the bump region.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, SandboxError};

/// First usable heap offset.
pub const HEAP_BASE: u32 = 1024;

/// Minimum alignment and size granularity of every block.
pub const MIN_ALIGN: u32 = 8;

/// Largest alignment a caller may request.
pub const MAX_ALIGN: u32 = 65_536;

fn round_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

fn block_size(size: u32) -> u64 {
    round_up(u64::from(size.max(1)), u64::from(MIN_ALIGN))
}

fn effective_align(align: u32) -> Result<u64> {
    if align == 0 || !align.is_power_of_two() || align > MAX_ALIGN {
        return Err(SandboxError::marshal(format!("invalid allocation alignment {align}")));
    }
    Ok(u64::from(align.max(MIN_ALIGN)))
}

/// First-fit free-list allocator with a bump top.
#[derive(Debug, Clone)]
pub struct GuestAllocator {
    /// Free holes below `top`, keyed by offset.
    free: BTreeMap<u64, u64>,
    /// Live blocks: offset -> rounded size.
    live: HashMap<u64, u64>,
    top: u64,
    limit: u64,
}

impl GuestAllocator {
    /// An empty heap that may extend up to `limit` bytes.
    pub fn new(limit: u64) -> Self {
        Self {
            free: BTreeMap::new(),
            live: HashMap::new(),
            top: u64::from(HEAP_BASE),
            limit,
        }
    }

    /// End of the highest block ever handed out and not yet returned.
    pub fn top(&self) -> u64 {
        self.top
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn live_bytes(&self) -> u64 {
        self.live.values().sum()
    }

    /// Reserve `size` bytes aligned to `align`.
    pub fn allocate(&mut self, size: u32, align: u32) -> Result<u32> {
        let align = effective_align(align)?;
        let size = block_size(size);

        let hole = self.free.iter().find_map(|(&start, &len)| {
            let aligned = round_up(start, align);
            (aligned + size <= start + len).then_some((start, len, aligned))
        });

        let ptr = match hole {
            Some((start, len, aligned)) => {
                self.free.remove(&start);
                if aligned > start {
                    self.free.insert(start, aligned - start);
                }
                let tail = start + len - (aligned + size);
                if tail > 0 {
                    self.free.insert(aligned + size, tail);
                }
                aligned
            }
            None => {
                let aligned = round_up(self.top, align);
                let end = aligned + size;
                if end > self.limit {
                    return Err(SandboxError::memory(format!(
                        "out of memory: cannot allocate {size} bytes (heap top {}, limit {})",
                        self.top, self.limit
                    )));
                }
                if aligned > self.top {
                    self.release(self.top, aligned - self.top);
                }
                self.top = end;
                aligned
            }
        };
        self.live.insert(ptr, size);
        u32::try_from(ptr).map_err(|_| SandboxError::memory(format!("offset {ptr} exceeds 32 bits")))
    }

    fn live_size(&self, ptr: u32, size: u32, what: &str) -> Result<u64> {
        let recorded = self.live.get(&u64::from(ptr)).copied().ok_or_else(|| {
            SandboxError::lifecycle(format!("{what} of {ptr}, which is not a live allocation"))
        })?;
        if recorded != block_size(size) {
            return Err(SandboxError::lifecycle(format!(
                "{what} of {ptr} with size {size}, but {recorded} bytes were allocated"
            )));
        }
        Ok(recorded)
    }

    /// Return a block. `size` must match what the block was allocated or
    /// last resized with.
    pub fn deallocate(&mut self, ptr: u32, size: u32, align: u32) -> Result<()> {
        effective_align(align)?;
        let recorded = self.live_size(ptr, size, "free")?;
        self.live.remove(&u64::from(ptr));
        self.release(u64::from(ptr), recorded);
        Ok(())
    }

    /// Try to resize a live block without moving it.
    ///
    /// Shrinking always succeeds. Growing succeeds when the block is the
    /// topmost one or is followed by a large enough hole. Returns `false`
    /// when the caller has to move the data.
    pub fn resize_in_place(&mut self, ptr: u32, old_size: u32, new_size: u32) -> Result<bool> {
        let old = self.live_size(ptr, old_size, "realloc")?;
        let new = block_size(new_size);
        let start = u64::from(ptr);

        if new <= old {
            self.live.insert(start, new);
            if old > new {
                self.release(start + new, old - new);
            }
            return Ok(true);
        }

        let extra = new - old;
        let end = start + old;
        if end == self.top {
            if start + new > self.limit {
                return Ok(false);
            }
            self.top = start + new;
        } else {
            match self.free.get(&end).copied() {
                Some(hole) if hole >= extra => {
                    self.free.remove(&end);
                    if hole > extra {
                        self.free.insert(end + extra, hole - extra);
                    }
                }
                _ => return Ok(false),
            }
        }
        self.live.insert(start, new);
        Ok(true)
    }

    /// Put `[start, start+len)` back, merging with adjacent holes.
    fn release(&mut self, mut start: u64, mut len: u64) {
        if let Some((&prev, &prev_len)) = self.free.range(..start).next_back() {
            if prev + prev_len == start {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free.remove(&(start + len)) {
            len += next_len;
        }
        if start + len == self.top {
            self.top = start;
        } else {
            self.free.insert(start, len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: u64 = 1 << 20;

    #[test]
    fn test_allocations_are_aligned_and_disjoint() {
        let mut heap = GuestAllocator::new(LIMIT);
        let a = heap.allocate(10, 1).unwrap();
        let b = heap.allocate(3, 1).unwrap();
        let c = heap.allocate(8, 64).unwrap();
        assert_eq!(a, HEAP_BASE);
        assert_eq!(b, HEAP_BASE + 16);
        assert_eq!(c % 64, 0);
        assert!(c >= b + 8);
        assert_eq!(heap.live_allocations(), 3);
    }

    #[test]
    fn test_free_then_reuse() {
        let mut heap = GuestAllocator::new(LIMIT);
        let a = heap.allocate(32, 8).unwrap();
        let _b = heap.allocate(32, 8).unwrap();
        heap.deallocate(a, 32, 8).unwrap();
        assert_eq!(heap.allocate(16, 8).unwrap(), a);
        assert_eq!(heap.allocate(16, 8).unwrap(), a + 16);
    }

    #[test]
    fn test_freeing_everything_resets_top() {
        let mut heap = GuestAllocator::new(LIMIT);
        let a = heap.allocate(100, 8).unwrap();
        let b = heap.allocate(200, 8).unwrap();
        let c = heap.allocate(300, 8).unwrap();
        heap.deallocate(b, 200, 8).unwrap();
        heap.deallocate(a, 100, 8).unwrap();
        heap.deallocate(c, 300, 8).unwrap();
        assert_eq!(heap.top(), u64::from(HEAP_BASE));
        assert_eq!(heap.live_bytes(), 0);
    }

    #[test]
    fn test_double_free_is_lifecycle_error() {
        let mut heap = GuestAllocator::new(LIMIT);
        let a = heap.allocate(8, 8).unwrap();
        heap.deallocate(a, 8, 8).unwrap();
        let err = heap.deallocate(a, 8, 8).unwrap_err();
        assert!(matches!(err, SandboxError::Lifecycle(_)));
    }

    #[test]
    fn test_free_with_wrong_size_rejected() {
        let mut heap = GuestAllocator::new(LIMIT);
        let a = heap.allocate(8, 8).unwrap();
        assert!(heap.deallocate(a, 64, 8).is_err());
        heap.deallocate(a, 5, 1).unwrap();
    }

    #[test]
    fn test_invalid_alignment() {
        let mut heap = GuestAllocator::new(LIMIT);
        assert!(matches!(heap.allocate(8, 3), Err(SandboxError::Marshal(_))));
        assert!(heap.allocate(8, 0).is_err());
    }

    #[test]
    fn test_out_of_memory() {
        let mut heap = GuestAllocator::new(u64::from(HEAP_BASE) + 64);
        heap.allocate(64, 8).unwrap();
        assert!(matches!(heap.allocate(1, 8), Err(SandboxError::Memory(_))));
    }

    #[test]
    fn test_resize_in_place() {
        let mut heap = GuestAllocator::new(LIMIT);
        let a = heap.allocate(64, 8).unwrap();
        assert!(heap.resize_in_place(a, 64, 16).unwrap());
        let b = heap.allocate(16, 8).unwrap();
        assert_eq!(b, a + 16);

        // `b` is on top, so it can grow freely.
        assert!(heap.resize_in_place(b, 16, 4096).unwrap());
        // `a` is boxed in by `b` now.
        assert!(!heap.resize_in_place(a, 16, 64).unwrap());
        assert!(heap.resize_in_place(a, 64, 8).is_err());
    }
}
