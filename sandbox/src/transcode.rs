//! Value transcoding across the sandbox boundary.
//!
//! Values are always copied, never aliased: host buffers are written into
//! freshly allocated linear memory, and results are copied back out and
//! their sandbox buffers freed. Memory may grow (and in principle move)
//! during any call, so no raw pointer into it is ever kept across one.
//!
//! | host value        | across the boundary                                  |
//! |-------------------|------------------------------------------------------|
//! | `&str`            | `(ptr, len)` of UTF-8 bytes                          |
//! | `&[u8]`           | `(ptr, len)` copy                                    |
//! | `u64`             | `(lo, hi)` halves                                    |
//! | `i64`             | `(lo, hi)` with a signed high half                   |
//! | `Option<u32>`     | `u64`, absent = [`OPTIONAL_U32_NONE`]                |
//! | string enum       | index into the variant table; unknown = table length |
//! | `[HandleId]`      | `(ptr, len)` of external-reference slot indices      |

use std::sync::Arc;

use crate::error::{Result, SandboxError};
use crate::registry::HandleId;
use crate::runtime::Sandbox;

/// Encoding of an absent `Option<u32>`.
pub const OPTIONAL_U32_NONE: u64 = 0x1_0000_0001;

/// Variant table for `Network`.
pub const NETWORK_VARIANTS: &[&str] = &["main", "test"];

/// A buffer in linear memory owned by the host for the duration of one call.
///
/// Freed when dropped, which happens once the sandbox has consumed it.
#[derive(Debug)]
pub struct Transient {
    sandbox: Arc<Sandbox>,
    ptr: u32,
    len: u32,
    capacity: u32,
    align: u32,
}

impl Transient {
    /// The `(0, 0)` buffer used for an absent optional argument.
    pub fn null(sandbox: &Arc<Sandbox>) -> Self {
        Self {
            sandbox: Arc::clone(sandbox),
            ptr: 0,
            len: 0,
            capacity: 0,
            align: 1,
        }
    }

    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Transient {
    fn drop(&mut self) {
        if self.ptr == 0 {
            return;
        }
        if let Err(e) = self.sandbox.free(self.ptr, self.capacity, self.align) {
            tracing::warn!(ptr = self.ptr, error = %e, "failed to free transient buffer");
        }
    }
}

// ── Host → sandbox ──

/// Copy `s` into linear memory as UTF-8.
///
/// The first allocation is sized for the pure-ASCII case (one byte per
/// UTF-16 unit) and ASCII is copied byte for byte. At the first non-ASCII
/// character the buffer is reallocated to `written + remaining_units * 3`,
/// the worst-case UTF-8 size of the rest, and shrunk to fit afterwards.
pub fn pass_string(sandbox: &Arc<Sandbox>, s: &str) -> Result<Transient> {
    let units = s.encode_utf16().count() as u32;
    let mut capacity = units;
    let ptr = sandbox.malloc(capacity, 1)?;
    let mut transient = Transient {
        sandbox: Arc::clone(sandbox),
        ptr,
        len: 0,
        capacity,
        align: 1,
    };

    let ascii = s.bytes().position(|b| !b.is_ascii()).unwrap_or(s.len());
    sandbox.memory().write_bytes(ptr, &s.as_bytes()[..ascii])?;
    let mut written = ascii as u32;

    if ascii < s.len() {
        let rest = &s[ascii..];
        let remaining_units = rest.encode_utf16().count() as u32;
        let bound = written + remaining_units * 3;
        transient.ptr = sandbox.realloc(transient.ptr, capacity, bound, 1)?;
        capacity = bound;
        transient.capacity = capacity;

        sandbox.memory().write_bytes(transient.ptr + written, rest.as_bytes())?;
        written += rest.len() as u32;

        transient.ptr = sandbox.realloc(transient.ptr, capacity, written, 1)?;
        transient.capacity = written;
    }
    transient.len = written;
    Ok(transient)
}

/// Copy `bytes` into linear memory.
pub fn pass_bytes(sandbox: &Arc<Sandbox>, bytes: &[u8]) -> Result<Transient> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| SandboxError::marshal(format!("buffer of {} bytes is too large", bytes.len())))?;
    let ptr = sandbox.malloc(len, 1)?;
    let transient = Transient {
        sandbox: Arc::clone(sandbox),
        ptr,
        len,
        capacity: len,
        align: 1,
    };
    sandbox.memory().write_bytes(ptr, bytes)?;
    Ok(transient)
}

pub fn pass_optional_bytes(sandbox: &Arc<Sandbox>, bytes: Option<&[u8]>) -> Result<Transient> {
    match bytes {
        Some(bytes) => pass_bytes(sandbox, bytes),
        None => Ok(Transient::null(sandbox)),
    }
}

/// Place each id in its own external-reference slot and pass the slot
/// indices as a `u32` array.
pub fn pass_handle_array(sandbox: &Arc<Sandbox>, ids: &[HandleId]) -> Result<Transient> {
    let slots: Vec<u32> = ids.iter().map(|id| sandbox.externrefs().insert(*id)).collect();
    let encoded: Vec<u8> = slots.iter().flat_map(|slot| slot.to_le_bytes()).collect();

    let written = (|| {
        let ptr = sandbox.malloc(encoded.len() as u32, 4)?;
        let transient = Transient {
            sandbox: Arc::clone(sandbox),
            ptr,
            len: slots.len() as u32,
            capacity: encoded.len() as u32,
            align: 4,
        };
        sandbox.memory().write_bytes(ptr, &encoded)?;
        Ok(transient)
    })();

    if written.is_err() {
        for slot in slots {
            let _ = sandbox.externrefs().dealloc(slot);
        }
    }
    written
}

pub fn split_u64(value: u64) -> (u32, u32) {
    (value as u32, (value >> 32) as u32)
}

pub fn join_u64(lo: u32, hi: u32) -> u64 {
    (u64::from(hi) << 32) | u64::from(lo)
}

pub fn split_i64(value: i64) -> (u32, i32) {
    (value as u32, (value >> 32) as i32)
}

pub fn join_i64(lo: u32, hi: i32) -> i64 {
    (i64::from(hi) << 32) | i64::from(lo)
}

pub fn encode_optional_u32(value: Option<u32>) -> u64 {
    value.map_or(OPTIONAL_U32_NONE, u64::from)
}

pub fn decode_optional_u32(raw: u64) -> Result<Option<u32>> {
    if raw == OPTIONAL_U32_NONE {
        return Ok(None);
    }
    u32::try_from(raw)
        .map(Some)
        .map_err(|_| SandboxError::marshal(format!("{raw:#x} is not an optional u32")))
}

/// Index of `value` in `variants`, or `variants.len()` if it is not one.
pub fn enum_to_index(variants: &[&str], value: &str) -> u32 {
    variants
        .iter()
        .position(|v| *v == value)
        .unwrap_or(variants.len()) as u32
}

pub fn enum_from_index<'a>(variants: &[&'a str], index: u32) -> Option<&'a str> {
    variants.get(index as usize).copied()
}

// ── Sandbox → host ──

pub fn read_bytes(sandbox: &Sandbox, ptr: u32, len: u32) -> Result<Vec<u8>> {
    if ptr == 0 && len != 0 {
        return Err(SandboxError::marshal(format!("null pointer with length {len}")));
    }
    sandbox.memory().read_bytes(ptr, len)
}

/// Strictly decode UTF-8 from `(ptr, len)`.
pub fn read_string(sandbox: &Sandbox, ptr: u32, len: u32) -> Result<String> {
    let bytes = read_bytes(sandbox, ptr, len)?;
    String::from_utf8(bytes).map_err(|e| {
        SandboxError::marshal(format!(
            "invalid UTF-8 at byte {} of {len}",
            e.utf8_error().valid_up_to()
        ))
    })
}

pub fn read_optional_bytes(sandbox: &Sandbox, ptr: u32, len: u32) -> Result<Option<Vec<u8>>> {
    if ptr == 0 {
        return Ok(None);
    }
    read_bytes(sandbox, ptr, len).map(Some)
}

/// Decode a handle array written by [`pass_handle_array`], emptying its
/// external-reference slots.
pub fn read_handle_array(sandbox: &Sandbox, ptr: u32, len: u32) -> Result<Vec<HandleId>> {
    let view = sandbox.memory().view();
    let mut slots = Vec::with_capacity(len as usize);
    for i in 0..len {
        slots.push(view.read_u32(ptr + i * 4)?);
    }
    slots
        .into_iter()
        .map(|slot| sandbox.externrefs().take::<HandleId>(slot))
        .collect()
}

/// Copy `bytes` into a new sandbox-owned buffer whose ownership passes to
/// the caller.
pub fn return_bytes(sandbox: &Sandbox, bytes: &[u8]) -> Result<(u32, u32)> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| SandboxError::marshal(format!("buffer of {} bytes is too large", bytes.len())))?;
    let ptr = sandbox.malloc(len, 1)?;
    if let Err(e) = sandbox.memory().write_bytes(ptr, bytes) {
        let _ = sandbox.free(ptr, len, 1);
        return Err(e);
    }
    Ok((ptr, len))
}

/// Copy a returned buffer out and free it.
pub fn take_bytes(sandbox: &Sandbox, ptr: u32, len: u32) -> Result<Vec<u8>> {
    let bytes = read_bytes(sandbox, ptr, len);
    sandbox.free(ptr, len, 1)?;
    bytes
}

pub fn take_string(sandbox: &Sandbox, ptr: u32, len: u32) -> Result<String> {
    let bytes = take_bytes(sandbox, ptr, len)?;
    String::from_utf8(bytes).map_err(|e| {
        SandboxError::marshal(format!(
            "invalid UTF-8 at byte {} of {len}",
            e.utf8_error().valid_up_to()
        ))
    })
}
