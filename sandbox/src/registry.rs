//! Handles and ownership.
//!
//! Sandbox objects live in per-class [`HandleTable`]s and are named by a
//! [`HandleId`]: class tag, generation, and slot index packed into a `u64`.
//! Taking an entry out bumps its slot's generation, so any copy of the old
//! id fails with a lifecycle error instead of reaching a recycled slot.
//!
//! On the host side every live handle is held by exactly one [`Owned`]
//! wrapper. The sandbox keeps the set of wrapped ids; wrapping an id twice
//! is refused. Dropping a wrapper that was never released frees the
//! underlying object.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, SandboxError};
use crate::runtime::Sandbox;

const GENERATION_BITS: u32 = 24;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

/// Kind of object a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResourceClass {
    Wallet = 1,
    Pczt = 2,
    Proposal = 3,
    UnifiedSpendingKey = 4,
    UnifiedFullViewingKey = 5,
    SeedFingerprint = 6,
    ProofGenerationKey = 7,
    WalletSummary = 8,
}

impl ResourceClass {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Wallet),
            2 => Some(Self::Pczt),
            3 => Some(Self::Proposal),
            4 => Some(Self::UnifiedSpendingKey),
            5 => Some(Self::UnifiedFullViewingKey),
            6 => Some(Self::SeedFingerprint),
            7 => Some(Self::ProofGenerationKey),
            8 => Some(Self::WalletSummary),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Wallet => "WebWallet",
            Self::Pczt => "Pczt",
            Self::Proposal => "Proposal",
            Self::UnifiedSpendingKey => "UnifiedSpendingKey",
            Self::UnifiedFullViewingKey => "UnifiedFullViewingKey",
            Self::SeedFingerprint => "SeedFingerprint",
            Self::ProofGenerationKey => "ProofGenerationKey",
            Self::WalletSummary => "WalletSummary",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque identifier of a sandbox object.
///
/// Bit layout: `class:8 | generation:24 | index+1:32`. The all-zero value
/// is [`HandleId::NULL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub const NULL: HandleId = HandleId(0);

    fn new(class: ResourceClass, generation: u32, index: u32) -> Self {
        Self(
            (u64::from(class.tag()) << 56)
                | (u64::from(generation & GENERATION_MASK) << 32)
                | (u64::from(index) + 1),
        )
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn class(self) -> Option<ResourceClass> {
        ResourceClass::from_tag((self.0 >> 56) as u8)
    }

    pub fn generation(self) -> u32 {
        ((self.0 >> 32) as u32) & GENERATION_MASK
    }

    fn index(self) -> Option<usize> {
        (self.0 as u32).checked_sub(1).map(|i| i as usize)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.class(), self.index()) {
            (Some(class), Some(index)) => {
                write!(f, "{class}#{index}.{}", self.generation())
            }
            _ if self.is_null() => f.write_str("null"),
            _ => write!(f, "{:#018x}", self.0),
        }
    }
}

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

struct Slots<T> {
    entries: Vec<Entry<T>>,
    free: Vec<usize>,
}

/// Generation-checked arena for one resource class.
pub struct HandleTable<T> {
    class: ResourceClass,
    inner: Mutex<Slots<T>>,
}

impl<T> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("class", &self.class)
            .field("live", &self.len())
            .finish()
    }
}

impl<T> HandleTable<T> {
    pub fn new(class: ResourceClass) -> Self {
        Self {
            class,
            inner: Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }

    fn slots(&self) -> MutexGuard<'_, Slots<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, value: T) -> HandleId {
        let mut slots = self.slots();
        let index = match slots.free.pop() {
            Some(index) => {
                slots.entries[index].value = Some(value);
                index
            }
            None => {
                slots.entries.push(Entry {
                    generation: 0,
                    value: Some(value),
                });
                slots.entries.len() - 1
            }
        };
        HandleId::new(self.class, slots.entries[index].generation, index as u32)
    }

    fn locate(&self, slots: &Slots<T>, id: HandleId) -> Result<usize> {
        if id.is_null() {
            return Err(SandboxError::lifecycle(format!("null {} handle", self.class)));
        }
        if id.class() != Some(self.class) {
            return Err(SandboxError::lifecycle(format!(
                "handle {id} is not a {}",
                self.class
            )));
        }
        let index = id.index().filter(|&i| i < slots.entries.len());
        match index {
            Some(i)
                if slots.entries[i].generation == id.generation()
                    && slots.entries[i].value.is_some() =>
            {
                Ok(i)
            }
            _ => Err(SandboxError::lifecycle(format!(
                "{} handle {id} was already consumed or freed",
                self.class
            ))),
        }
    }

    pub fn contains(&self, id: HandleId) -> bool {
        let slots = self.slots();
        self.locate(&slots, id).is_ok()
    }

    /// Run `f` on the object without removing it.
    pub fn with<R>(&self, id: HandleId, f: impl FnOnce(&T) -> R) -> Result<R> {
        let slots = self.slots();
        let index = self.locate(&slots, id)?;
        match &slots.entries[index].value {
            Some(value) => Ok(f(value)),
            None => Err(SandboxError::lifecycle(format!("{id} is vacant"))),
        }
    }

    /// Remove the object, invalidating `id` and every copy of it.
    pub fn take(&self, id: HandleId) -> Result<T> {
        let mut slots = self.slots();
        let index = self.locate(&slots, id)?;
        let entry = &mut slots.entries[index];
        let value = entry.value.take();
        entry.generation = (entry.generation + 1) & GENERATION_MASK;
        slots.free.push(index);
        value.ok_or_else(|| SandboxError::lifecycle(format!("{id} is vacant")))
    }

    pub fn len(&self) -> usize {
        self.slots()
            .entries
            .iter()
            .filter(|e| e.value.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> HandleTable<T> {
    pub fn get(&self, id: HandleId) -> Result<T> {
        self.with(id, T::clone)
    }
}

/// Marker for a host-visible resource class.
pub trait Resource: Send + Sync + 'static {
    const CLASS: ResourceClass;
}

/// The single owning host wrapper of a sandbox object.
///
/// `release` hands the id onward without freeing; `destroy` frees now.
/// Dropping an unreleased wrapper frees the object as well.
pub struct Owned<R: Resource> {
    sandbox: Arc<Sandbox>,
    id: HandleId,
    _class: PhantomData<fn() -> R>,
}

impl<R: Resource> Owned<R> {
    /// Take ownership of a live handle of class `R`.
    ///
    /// Fails if the id is of another class, is not live, or already has a
    /// wrapper.
    pub fn wrap(sandbox: &Arc<Sandbox>, id: HandleId) -> Result<Self> {
        if id.class() != Some(R::CLASS) {
            return Err(SandboxError::lifecycle(format!(
                "cannot wrap {id} as a {}",
                R::CLASS
            )));
        }
        if !sandbox.is_live(id) {
            return Err(SandboxError::lifecycle(format!(
                "{} handle {id} is not live",
                R::CLASS
            )));
        }
        sandbox.register_wrapper(id)?;
        Ok(Self {
            sandbox: Arc::clone(sandbox),
            id,
            _class: PhantomData,
        })
    }

    /// [`wrap`](Self::wrap) a raw id received across the boundary.
    pub fn from_raw(sandbox: &Arc<Sandbox>, raw: u64) -> Result<Self> {
        Self::wrap(sandbox, HandleId::from_raw(raw))
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    /// Give up ownership without freeing. The returned id is what an
    /// ownership-taking call consumes.
    pub fn release(mut self) -> HandleId {
        let id = std::mem::replace(&mut self.id, HandleId::NULL);
        self.sandbox.unregister_wrapper(id);
        id
    }

    /// Release and free the object immediately.
    pub fn destroy(self) -> Result<()> {
        let sandbox = Arc::clone(&self.sandbox);
        let id = self.release();
        sandbox.free_resource(id)
    }
}

impl<R: Resource> Drop for Owned<R> {
    fn drop(&mut self) {
        if self.id.is_null() {
            return;
        }
        let id = std::mem::replace(&mut self.id, HandleId::NULL);
        self.sandbox.unregister_wrapper(id);
        match self.sandbox.free_resource(id) {
            Ok(()) => tracing::debug!(handle = %id, "freed unreleased handle on drop"),
            Err(e) => tracing::warn!(handle = %id, error = %e, "failed to free handle on drop"),
        }
    }
}

impl<R: Resource> fmt::Debug for Owned<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(R::CLASS.name()).field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_layout() {
        let id = HandleId::new(ResourceClass::Pczt, 5, 9);
        assert_eq!(id.class(), Some(ResourceClass::Pczt));
        assert_eq!(id.generation(), 5);
        assert_eq!(id.index(), Some(9));
        assert_eq!(id.to_string(), "Pczt#9.5");
        assert_eq!(HandleId::from_raw(id.raw()), id);
        assert!(!id.is_null());
        assert_eq!(HandleId::NULL.to_string(), "null");
    }

    #[test]
    fn test_insert_with_take() {
        let table = HandleTable::new(ResourceClass::Proposal);
        let id = table.insert(String::from("draft"));
        assert_eq!(table.with(id, |s| s.len()).unwrap(), 5);
        assert_eq!(table.get(id).unwrap(), "draft");
        assert_eq!(table.take(id).unwrap(), "draft");
        assert!(table.is_empty());
    }

    #[test]
    fn test_stale_id_fails_after_take() {
        let table = HandleTable::new(ResourceClass::Pczt);
        let first = table.insert(1u32);
        table.take(first).unwrap();
        let second = table.insert(2u32);

        // Same slot, new generation.
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);

        let err = table.take(first).unwrap_err();
        assert!(matches!(err, SandboxError::Lifecycle(_)));
        assert!(err.to_string().contains("already consumed"));
        assert_eq!(table.get(second).unwrap(), 2);
    }

    #[test]
    fn test_wrong_class_rejected() {
        let pczts = HandleTable::new(ResourceClass::Pczt);
        let keys = HandleTable::new(ResourceClass::UnifiedSpendingKey);
        let key = keys.insert(0u8);
        pczts.insert(0u8);
        let err = pczts.get(key).unwrap_err();
        assert!(err.to_string().contains("is not a Pczt"));
        assert!(pczts.get(HandleId::NULL).is_err());
    }

    #[test]
    fn test_generation_increments() {
        let table = HandleTable::new(ResourceClass::WalletSummary);
        let mut id = table.insert(());
        for _ in 0..3 {
            table.take(id).unwrap();
            id = table.insert(());
        }
        assert_eq!(id.generation(), 3);
        assert!(table.contains(id));
        assert_eq!(ResourceClass::from_tag(0), None);
    }
}
