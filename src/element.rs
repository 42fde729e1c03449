//! In-place element records and their slot cells.
//!
//! Every graph element occupies one fixed-size record inside a segment. The
//! record's `access` word lives outside the plain field block so the
//! existence gate can be checked without taking any monitor; all remaining
//! fields are read and written only under the monitor discipline described
//! in `store`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::addr::Addr;
use crate::error::{MemoryError, Result};
use crate::types::ElementType;

/// The slot holds a live element.
pub(crate) const ACCESS_EXIST: u32 = 1 << 30;
/// The element is queued for deletion by a running cascade.
pub(crate) const ACCESS_REQUEST_DELETION: u32 = 1 << 31;

/// Size of one encoded slot on disk: access word plus eleven record fields.
pub(crate) const ELEMENT_ENCODED_LEN: usize = 48;

/// Plain field block of one element record.
///
/// For a freed slot the `kind` field is overloaded with the next offset of
/// the segment's free chain; that is safe to do because the exists bit in
/// the slot's access word is clear while the slot is on the chain.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct Element {
    pub kind: ElementType,
    pub first_out_arc: Addr,
    pub first_in_arc: Addr,
    pub output_arcs_count: u32,
    pub input_arcs_count: u32,
    // Connector fields; zeroed for nodes and links.
    pub begin: Addr,
    pub end: Addr,
    pub prev_out_arc: Addr,
    pub next_out_arc: Addr,
    pub prev_in_arc: Addr,
    pub next_in_arc: Addr,
}

impl Element {
    pub fn encode(&self, access: u32, out: &mut Vec<u8>) {
        out.extend_from_slice(&access.to_be_bytes());
        out.extend_from_slice(&self.kind.bits().to_be_bytes());
        out.extend_from_slice(&self.first_out_arc.pack().to_be_bytes());
        out.extend_from_slice(&self.first_in_arc.pack().to_be_bytes());
        out.extend_from_slice(&self.output_arcs_count.to_be_bytes());
        out.extend_from_slice(&self.input_arcs_count.to_be_bytes());
        out.extend_from_slice(&self.begin.pack().to_be_bytes());
        out.extend_from_slice(&self.end.pack().to_be_bytes());
        out.extend_from_slice(&self.prev_out_arc.pack().to_be_bytes());
        out.extend_from_slice(&self.next_out_arc.pack().to_be_bytes());
        out.extend_from_slice(&self.prev_in_arc.pack().to_be_bytes());
        out.extend_from_slice(&self.next_in_arc.pack().to_be_bytes());
    }

    /// Decodes one slot; returns the access word alongside the record.
    pub fn decode(bytes: &[u8]) -> Result<(u32, Element)> {
        if bytes.len() < ELEMENT_ENCODED_LEN {
            return Err(MemoryError::Corruption("element record truncated"));
        }
        let word = |i: usize| -> u32 {
            u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
        };
        let access = word(0);
        let element = Element {
            kind: ElementType::from_bits(word(4)),
            first_out_arc: Addr::unpack(word(8)),
            first_in_arc: Addr::unpack(word(12)),
            output_arcs_count: word(16),
            input_arcs_count: word(20),
            begin: Addr::unpack(word(24)),
            end: Addr::unpack(word(28)),
            prev_out_arc: Addr::unpack(word(32)),
            next_out_arc: Addr::unpack(word(36)),
            prev_in_arc: Addr::unpack(word(40)),
            next_in_arc: Addr::unpack(word(44)),
        };
        Ok((access, element))
    }
}

/// One slot of a segment: atomic access word plus the plain record.
///
/// The access word carries the exists and deletion-requested sentinel bits
/// and, for slot 0 of a segment, the not-engaged chain link. The record is
/// only touched under the segment monitor (allocation, release) or under the
/// address monitor (every other mutation), which is what makes the unsafe
/// accessors sound.
pub(crate) struct ElementCell {
    access: AtomicU32,
    record: UnsafeCell<Element>,
}

// Slots are shared across threads; exclusion comes from the monitors.
unsafe impl Sync for ElementCell {}

impl ElementCell {
    pub fn new() -> Self {
        Self {
            access: AtomicU32::new(0),
            record: UnsafeCell::new(Element::default()),
        }
    }

    #[inline]
    pub fn exists(&self) -> bool {
        self.access.load(Ordering::Relaxed) & ACCESS_EXIST != 0
    }

    #[inline]
    pub fn deletion_requested(&self) -> bool {
        self.access.load(Ordering::Relaxed) & ACCESS_REQUEST_DELETION != 0
    }

    /// Sets the deletion-requested bit; returns true if it was already set.
    #[inline]
    pub fn mark_deletion_requested(&self) -> bool {
        self.access.fetch_or(ACCESS_REQUEST_DELETION, Ordering::Relaxed) & ACCESS_REQUEST_DELETION
            != 0
    }

    #[inline]
    pub fn mark_exists(&self) {
        self.access.store(ACCESS_EXIST, Ordering::Relaxed);
    }

    #[inline]
    pub fn access_raw(&self) -> u32 {
        self.access.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_access_raw(&self, value: u32) {
        self.access.store(value, Ordering::Relaxed);
    }

    /// # Safety
    ///
    /// The caller must hold the monitor that currently owns this slot: the
    /// segment monitor during allocation and release, the address monitor
    /// otherwise.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self) -> &mut Element {
        &mut *self.record.get()
    }

    /// # Safety
    ///
    /// Same monitor requirement as [`ElementCell::get_mut`]; a shared
    /// (read) acquisition suffices.
    #[inline]
    pub unsafe fn get(&self) -> &Element {
        &*self.record.get()
    }

    /// Snapshot of the record under the caller's monitor.
    ///
    /// # Safety
    ///
    /// Same monitor requirement as [`ElementCell::get`].
    #[inline]
    pub unsafe fn snapshot(&self) -> Element {
        *self.record.get()
    }
}
