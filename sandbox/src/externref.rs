//! External reference table.
//!
//! Lets sandbox code hold host values (errors, block sources, handle ids
//! in transit) by slot index instead of copying them into linear memory.
//! Slot 0 is reserved and never allocated, so 0 can mean "no value".

use std::any::Any;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, SandboxError};

type HostValue = Box<dyn Any + Send>;

#[derive(Default)]
enum Slot {
    #[default]
    Free,
    Reserved,
    Occupied(HostValue),
}

#[derive(Default)]
struct Slots {
    entries: Vec<Slot>,
    free: Vec<u32>,
}

impl Slots {
    fn is_allocated(&self, index: u32) -> bool {
        index != 0
            && matches!(
                self.entries.get(index as usize),
                Some(Slot::Reserved | Slot::Occupied(_))
            )
    }
}

/// Table of host values addressable from the sandbox.
pub struct ExternRefTable {
    inner: Mutex<Slots>,
}

impl std::fmt::Debug for ExternRefTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternRefTable")
            .field("live", &self.live_count())
            .finish()
    }
}

impl Default for ExternRefTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternRefTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slots {
                entries: vec![Slot::Reserved],
                free: Vec::new(),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve an empty slot.
    pub fn alloc(&self) -> u32 {
        let mut slots = self.slots();
        if let Some(index) = slots.free.pop() {
            slots.entries[index as usize] = Slot::Reserved;
            return index;
        }
        slots.entries.push(Slot::Reserved);
        (slots.entries.len() - 1) as u32
    }

    /// Store `value` in a reserved or occupied slot.
    pub fn set<T: Any + Send>(&self, index: u32, value: T) -> Result<()> {
        let mut slots = self.slots();
        if !slots.is_allocated(index) {
            return Err(SandboxError::lifecycle(format!(
                "external reference slot {index} is not allocated"
            )));
        }
        slots.entries[index as usize] = Slot::Occupied(Box::new(value));
        Ok(())
    }

    /// [`alloc`](Self::alloc) then [`set`](Self::set).
    pub fn insert<T: Any + Send>(&self, value: T) -> u32 {
        let mut slots = self.slots();
        let boxed: HostValue = Box::new(value);
        if let Some(index) = slots.free.pop() {
            slots.entries[index as usize] = Slot::Occupied(boxed);
            return index;
        }
        slots.entries.push(Slot::Occupied(boxed));
        (slots.entries.len() - 1) as u32
    }

    /// Clone the value in `index` without releasing the slot.
    pub fn get<T: Any + Clone>(&self, index: u32) -> Result<T> {
        let slots = self.slots();
        match slots.entries.get(index as usize) {
            Some(Slot::Occupied(value)) => value.downcast_ref::<T>().cloned().ok_or_else(|| {
                SandboxError::marshal(format!(
                    "external reference slot {index} holds a different type than {}",
                    std::any::type_name::<T>()
                ))
            }),
            _ => Err(SandboxError::lifecycle(format!(
                "external reference slot {index} holds no value"
            ))),
        }
    }

    /// Move the value out of `index` and free the slot.
    ///
    /// A type mismatch leaves the slot untouched.
    pub fn take<T: Any>(&self, index: u32) -> Result<T> {
        let mut slots = self.slots();
        let holds_t = match slots.entries.get(index as usize) {
            Some(Slot::Occupied(value)) if index != 0 => value.is::<T>(),
            _ => {
                return Err(SandboxError::lifecycle(format!(
                    "external reference slot {index} holds no value"
                )))
            }
        };
        if !holds_t {
            return Err(SandboxError::marshal(format!(
                "external reference slot {index} holds a different type than {}",
                std::any::type_name::<T>()
            )));
        }
        let slot = std::mem::take(&mut slots.entries[index as usize]);
        slots.free.push(index);
        match slot {
            Slot::Occupied(value) => value.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
                SandboxError::marshal(format!("external reference slot {index} changed type"))
            }),
            _ => Err(SandboxError::lifecycle(format!(
                "external reference slot {index} holds no value"
            ))),
        }
    }

    /// Free a slot, dropping whatever it holds.
    pub fn dealloc(&self, index: u32) -> Result<()> {
        let mut slots = self.slots();
        if !slots.is_allocated(index) {
            return Err(SandboxError::lifecycle(format!(
                "external reference slot {index} is not allocated"
            )));
        }
        slots.entries[index as usize] = Slot::Free;
        slots.free.push(index);
        Ok(())
    }

    /// Slots currently reserved or occupied, excluding slot 0.
    pub fn live_count(&self) -> usize {
        let slots = self.slots();
        slots
            .entries
            .iter()
            .skip(1)
            .filter(|slot| !matches!(slot, Slot::Free))
            .count()
    }
}
