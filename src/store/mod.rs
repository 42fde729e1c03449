//! Segmented element store and concurrent graph mutation.
//!
//! The store owns a vector of fixed-capacity segments, hands out stable
//! addresses for elements, and maintains the doubly-linked incidence lists
//! that connect them. Concurrency control is a fixed table of sharded
//! monitors keyed by element address plus one allocator lock per segment and
//! one bookkeeping lock for the store-level segment lists.
//!
//! Lock ordering: the store bookkeeping lock is taken outside segment
//! allocator locks, and both outside element monitors, except on the free
//! path where an element monitor is already held; that path never blocks on
//! another element monitor, so the order stays acyclic.

mod monitor;
mod segment;

pub use segment::SEGMENT_ELEMENTS;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::addr::Addr;
use crate::config::MemoryParams;
use crate::element::{Element, ElementCell};
use crate::error::{MemoryError, Result};
use crate::event::{EventBus, EventKind};
use crate::fs::FileStore;
use crate::types::ElementType;

pub(crate) use monitor::MonitorTable;
pub(crate) use segment::{Segment, SegmentAlloc};

/// Element population counters, collected segment by segment.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct Stat {
    pub nodes: u64,
    pub links: u64,
    pub connectors: u64,
    pub free_slots: u64,
    pub segments: u16,
}

#[derive(Debug, Default)]
struct StoreLists {
    segments_count: u16,
    /// Head of the chain of segments with an unengaged tail, linked through
    /// slot-0 access words.
    last_not_engaged_segment_num: u16,
    /// Head of the chain of segments with released slots, linked through
    /// slot-0 kind words.
    last_released_segment_num: u16,
}

pub struct Store {
    max_segments: u16,
    segments: Box<[OnceLock<Arc<Segment>>]>,
    lists: Mutex<StoreLists>,
    /// Thread id -> the segment that thread currently allocates from.
    processes: Mutex<HashMap<ThreadId, u16>>,
    monitors: MonitorTable,
    pub(crate) events: EventBus,
    pub(crate) fs: FileStore,
}

impl Store {
    pub(crate) fn new(params: &MemoryParams, events: EventBus, fs: FileStore) -> Self {
        let segments = (0..params.max_loaded_segments as usize)
            .map(|_| OnceLock::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        info!(
            max_segments = params.max_loaded_segments,
            segment_elements = SEGMENT_ELEMENTS,
            "storage configured"
        );
        Self {
            max_segments: params.max_loaded_segments,
            segments,
            lists: Mutex::new(StoreLists::default()),
            processes: Mutex::new(HashMap::new()),
            monitors: MonitorTable::new(),
            events,
            fs,
        }
    }

    pub(crate) fn segment(&self, num: u16) -> Option<&Arc<Segment>> {
        if num == 0 || num > self.max_segments {
            return None;
        }
        self.segments[num as usize - 1].get()
    }

    /// Bounds-checked slot lookup requiring the exists bit. Takes no lock.
    pub(crate) fn cell(&self, addr: Addr) -> Result<&ElementCell> {
        if addr.seg == 0
            || addr.offset == 0
            || addr.seg > self.max_segments
            || addr.offset as usize >= SEGMENT_ELEMENTS
        {
            return Err(MemoryError::AddrNotValid);
        }
        let segment = self.segment(addr.seg).ok_or(MemoryError::AddrNotValid)?;
        let cell = segment.cell(addr.offset);
        if !cell.exists() {
            return Err(MemoryError::AddrNotValid);
        }
        Ok(cell)
    }

    /// Record snapshot plus deletion flag, read under the address monitor.
    pub(crate) fn element_snapshot(&self, addr: Addr) -> Result<(Element, bool)> {
        let _guard = self.monitors.read(addr);
        let cell = self.cell(addr)?;
        Ok((unsafe { cell.snapshot() }, cell.deletion_requested()))
    }

    /// Construction gate for iterators pinning a fixed address.
    pub(crate) fn check_pinned(&self, addr: Addr) -> Result<()> {
        let (element, requested) = self.element_snapshot(addr)?;
        if requested || element.kind.is_empty() {
            return Err(MemoryError::AddrNotValid);
        }
        Ok(())
    }

    pub fn is_element(&self, addr: Addr) -> bool {
        self.cell(addr).is_ok()
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    fn thread_segment(&self) -> Option<Arc<Segment>> {
        let processes = self.processes.lock();
        processes
            .get(&thread::current().id())
            .and_then(|&num| self.segment(num).cloned())
    }

    fn pop_not_engaged(&self, lists: &mut StoreLists) -> Option<Arc<Segment>> {
        let num = lists.last_not_engaged_segment_num;
        let segment = self.segment(num).cloned()?;
        lists.last_not_engaged_segment_num = segment.cell(0).access_raw() as u16;
        segment.cell(0).set_access_raw(0);
        Some(segment)
    }

    fn new_segment(&self, lists: &mut StoreLists) -> Option<Arc<Segment>> {
        if lists.segments_count == self.max_segments {
            return None;
        }
        let num = lists.segments_count + 1;
        let segment = Arc::new(Segment::new(num));
        // The slot is written once, here, under the lists lock.
        let _ = self.segments[num as usize - 1].set(segment.clone());
        lists.segments_count = num;
        debug!(num, "segment engaged");
        Some(segment)
    }

    fn last_segment_with_room(&self, lists: &StoreLists) -> Option<Arc<Segment>> {
        let segment = self.segment(lists.segments_count).cloned()?;
        segment.has_room().then_some(segment)
    }

    /// Attaches a segment with room to the calling thread.
    fn attach_segment(&self) -> Option<Arc<Segment>> {
        let mut processes = self.processes.lock();
        let mut lists = self.lists.lock();
        let segment = self
            .pop_not_engaged(&mut lists)
            .or_else(|| self.new_segment(&mut lists))
            .or_else(|| self.last_segment_with_room(&lists));
        if let Some(ref segment) = segment {
            processes.insert(thread::current().id(), segment.num());
        }
        segment
    }

    /// Steals a released slot from any segment on the released chain.
    fn allocate_released(&self) -> Option<Addr> {
        let mut lists = self.lists.lock();
        loop {
            let num = lists.last_released_segment_num;
            let segment = self.segment(num).cloned()?;
            let unlink = |lists: &mut StoreLists| {
                let slot0 = segment.cell(0);
                lists.last_released_segment_num = unsafe { slot0.get() }.kind.bits() as u16;
                unsafe { slot0.get_mut().kind = ElementType::EMPTY };
            };
            match segment.pop_released() {
                None => unlink(&mut lists),
                Some((offset, drained)) => {
                    if drained {
                        unlink(&mut lists);
                    }
                    return Some(Addr::new(num, offset));
                }
            }
        }
    }

    /// Hands out one zeroed slot with the exists bit set.
    fn allocate(&self) -> Result<Addr> {
        if let Some(segment) = self.thread_segment() {
            if let Some(offset) = segment.allocate() {
                return Ok(Addr::new(segment.num(), offset));
            }
        }
        if let Some(segment) = self.attach_segment() {
            if let Some(offset) = segment.allocate() {
                return Ok(Addr::new(segment.num(), offset));
            }
        }
        if let Some(addr) = self.allocate_released() {
            return Ok(addr);
        }
        warn!(
            max_segments = self.max_segments,
            "memory is full; extend the segment limit or erase elements"
        );
        Err(MemoryError::NoMemory)
    }

    /// Returns a slot to its segment's free chain and, when that chain was
    /// empty, threads the segment onto the store's released chain.
    pub(crate) fn free_element(&self, addr: Addr) -> Result<()> {
        self.cell(addr)?;
        let segment = self.segment(addr.seg).ok_or(MemoryError::AddrNotValid)?.clone();
        let chain_was_empty = segment.release(addr.offset);
        if chain_was_empty {
            let mut lists = self.lists.lock();
            let slot0 = segment.cell(0);
            unsafe {
                slot0.get_mut().kind =
                    ElementType::from_bits(lists.last_released_segment_num as u32);
            }
            lists.last_released_segment_num = segment.num();
        }
        Ok(())
    }

    /// Associates the calling thread with a fresh allocation state.
    pub fn begin_process(&self) {
        self.processes.lock().remove(&thread::current().id());
    }

    /// Detaches the calling thread's segment, handing a partially full one
    /// back to the not-engaged chain so other threads can finish it.
    pub fn end_process(&self) {
        let num = self.processes.lock().remove(&thread::current().id());
        let Some(segment) = num.and_then(|n| self.segment(n).cloned()) else {
            return;
        };
        if !segment.has_room() {
            return;
        }
        let mut lists = self.lists.lock();
        let already_listed = lists.last_not_engaged_segment_num == segment.num()
            || segment.cell(0).access_raw() != 0;
        if already_listed {
            return;
        }
        segment
            .cell(0)
            .set_access_raw(lists.last_not_engaged_segment_num as u32);
        lists.last_not_engaged_segment_num = segment.num();
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    pub fn node_new(&self, ty: ElementType) -> Result<Addr> {
        let addr = self.allocate()?;
        let _guard = self.monitors.write(addr);
        let cell = self.cell(addr)?;
        unsafe { cell.get_mut().kind = ElementType::NODE.with(ty) };
        Ok(addr)
    }

    pub fn link_new(&self, ty: ElementType) -> Result<Addr> {
        let addr = self.allocate()?;
        let _guard = self.monitors.write(addr);
        let cell = self.cell(addr)?;
        unsafe { cell.get_mut().kind = ElementType::LINK.with(ty) };
        Ok(addr)
    }

    pub fn arc_new(&self, ty: ElementType, begin: Addr, end: Addr) -> Result<Addr> {
        if begin.is_empty() || end.is_empty() {
            return Err(MemoryError::AddrNotValid);
        }
        let arc_addr = self.allocate()?;
        {
            let _guard = self.monitors.write(arc_addr);
            let cell = self.cell(arc_addr)?;
            let element = unsafe { cell.get_mut() };
            element.kind = ty;
            element.begin = begin;
            element.end = end;
        }

        let is_edge = ty.is_edge();
        let is_not_loop = begin != end;

        let endpoint_guards = self.monitors.write_pair(begin, end);
        if self.cell(begin).is_err() || self.cell(end).is_err() {
            // Roll back the half-allocated slot before surfacing.
            drop(endpoint_guards);
            self.free_element(arc_addr)?;
            return Err(MemoryError::AddrNotValid);
        }

        let held = [
            self.monitors.monitor(begin) as *const RwLock<()>,
            self.monitors.monitor(end) as *const RwLock<()>,
        ];
        self.make_incident(arc_addr, begin, end, &held);
        if is_edge && is_not_loop {
            self.make_incident(arc_addr, end, begin, &held);
        }

        self.events.emit(begin, EventKind::AddOutputArc, arc_addr, end);
        self.events.emit(end, EventKind::AddInputArc, arc_addr, begin);
        if is_edge && is_not_loop {
            self.events.emit(end, EventKind::AddOutputArc, arc_addr, begin);
            self.events.emit(begin, EventKind::AddInputArc, arc_addr, end);
        }

        drop(endpoint_guards);
        Ok(arc_addr)
    }

    /// Splices a new connector at the head of `begin`'s out-list and `end`'s
    /// in-list. Caller holds the write monitors for both endpoints.
    fn make_incident(&self, arc_addr: Addr, begin: Addr, end: Addr, held: &[*const RwLock<()>]) {
        let (Ok(begin_cell), Ok(end_cell)) = (self.cell(begin), self.cell(end)) else {
            return;
        };
        let first_out = unsafe { begin_cell.get() }.first_out_arc;
        let first_in = unsafe { end_cell.get() }.first_in_arc;

        {
            let _head_guards = self.monitors.write_set(&[first_out, first_in], held);
            if let Ok(arc_cell) = self.cell(arc_addr) {
                let element = unsafe { arc_cell.get_mut() };
                element.next_out_arc = first_out;
                element.next_in_arc = first_in;
            }
            if !first_out.is_empty() {
                if let Ok(cell) = self.cell(first_out) {
                    unsafe { cell.get_mut().prev_out_arc = arc_addr };
                }
            }
            if !first_in.is_empty() {
                if let Ok(cell) = self.cell(first_in) {
                    unsafe { cell.get_mut().prev_in_arc = arc_addr };
                }
            }
        }

        unsafe {
            let element = begin_cell.get_mut();
            element.first_out_arc = arc_addr;
            element.output_arcs_count += 1;
        }
        unsafe {
            let element = end_cell.get_mut();
            element.first_in_arc = arc_addr;
            element.input_arcs_count += 1;
        }
    }

    // ------------------------------------------------------------------
    // Erasure
    // ------------------------------------------------------------------

    /// Erases an element and, transitively, every connector incident to it.
    ///
    /// The cascade is fixed-point because a connector is itself an element
    /// whose own incidence lists may hold further connectors.
    pub fn erase_element(&self, root: Addr) -> Result<()> {
        self.cell(root)?;

        let mut visited: HashSet<Addr> = HashSet::new();
        visited.insert(root);
        let mut queue: VecDeque<Addr> = VecDeque::new();
        queue.push_back(root);
        let mut remove_list: Vec<Addr> = vec![root];

        while let Some(addr) = queue.pop_front() {
            if self.cell(addr).is_err() {
                continue;
            }
            let _guard = self.monitors.read(addr);
            let Ok(cell) = self.cell(addr) else { continue };
            let (first_out, first_in) = {
                let element = unsafe { cell.get() };
                (element.first_out_arc, element.first_in_arc)
            };
            for (head, outgoing) in [(first_out, true), (first_in, false)] {
                let mut cursor = head;
                while !cursor.is_empty() {
                    let Ok(arc_cell) = self.cell(cursor) else { break };
                    if visited.insert(cursor) {
                        remove_list.push(cursor);
                        queue.push_back(cursor);
                    }
                    let element = unsafe { arc_cell.get() };
                    cursor = if outgoing {
                        element.next_out_arc
                    } else {
                        element.next_in_arc
                    };
                }
            }
        }

        for addr in remove_list {
            self.unlink_and_free(addr);
        }
        Ok(())
    }

    fn unlink_and_free(&self, addr: Addr) {
        let kind;
        let begin;
        let end;
        {
            let _guard = self.monitors.write(addr);
            let Ok(cell) = self.cell(addr) else { return };
            if cell.mark_deletion_requested() {
                return;
            }
            let element = unsafe { cell.get() };
            kind = element.kind;
            begin = element.begin;
            end = element.end;
        }

        if kind.is_link() {
            if let Err(error) = self.fs.link_string_unlink(addr.pack()) {
                // Best-effort cascade; the adjacency invariants do not
                // depend on the payload index.
                warn!(?addr, %error, "link payload unlink failed, cascade continues");
            }
        } else if kind.is_connector() {
            self.unlink_connector(addr, kind, begin, end);
        }

        self.events
            .emit(addr, EventKind::RemoveElement, Addr::EMPTY, Addr::EMPTY);

        {
            let _guard = self.monitors.write(addr);
            if self.free_element(addr).is_err() {
                debug!(?addr, "slot already freed by a concurrent cascade");
            }
        }
        self.events.notify_element_deleted(addr);
    }

    fn unlink_connector(&self, addr: Addr, kind: ElementType, begin: Addr, end: Addr) {
        let is_edge = kind.is_edge();
        let is_not_loop = begin != end;

        let endpoint_guards = self.monitors.write_pair(begin, end);
        let held = [
            self.monitors.monitor(begin) as *const RwLock<()>,
            self.monitors.monitor(end) as *const RwLock<()>,
        ];

        let Ok(arc_cell) = self.cell(addr) else {
            drop(endpoint_guards);
            return;
        };
        let (prev_out, next_out, prev_in, next_in) = {
            let element = unsafe { arc_cell.get() };
            (
                element.prev_out_arc,
                element.next_out_arc,
                element.prev_in_arc,
                element.next_in_arc,
            )
        };

        let neighbor_guards = self
            .monitors
            .write_set(&[prev_out, next_out, prev_in, next_in], &held);

        // Out-list splice at the begin endpoint.
        if !prev_out.is_empty() {
            if let Ok(cell) = self.cell(prev_out) {
                unsafe { cell.get_mut().next_out_arc = next_out };
            }
        }
        if !next_out.is_empty() {
            if let Ok(cell) = self.cell(next_out) {
                unsafe { cell.get_mut().prev_out_arc = prev_out };
            }
        }
        if let Ok(cell) = self.cell(begin) {
            unsafe {
                let element = cell.get_mut();
                if element.first_out_arc == addr {
                    element.first_out_arc = next_out;
                }
                element.output_arcs_count = element.output_arcs_count.saturating_sub(1);
                if is_edge && is_not_loop {
                    if element.first_in_arc == addr {
                        element.first_in_arc = next_in;
                    }
                    element.input_arcs_count = element.input_arcs_count.saturating_sub(1);
                }
            }
        }
        self.events.emit(begin, EventKind::RemoveOutputArc, addr, end);

        // In-list splice at the end endpoint.
        if !prev_in.is_empty() {
            if let Ok(cell) = self.cell(prev_in) {
                unsafe { cell.get_mut().next_in_arc = next_in };
            }
        }
        if !next_in.is_empty() {
            if let Ok(cell) = self.cell(next_in) {
                unsafe { cell.get_mut().prev_in_arc = prev_in };
            }
        }
        if let Ok(cell) = self.cell(end) {
            unsafe {
                let element = cell.get_mut();
                if element.first_in_arc == addr {
                    element.first_in_arc = next_in;
                }
                element.input_arcs_count = element.input_arcs_count.saturating_sub(1);
                if is_edge && is_not_loop {
                    if element.first_out_arc == addr {
                        element.first_out_arc = next_out;
                    }
                    element.output_arcs_count = element.output_arcs_count.saturating_sub(1);
                }
            }
        }
        self.events.emit(end, EventKind::RemoveInputArc, addr, begin);

        drop(neighbor_guards);
        drop(endpoint_guards);
    }

    // ------------------------------------------------------------------
    // Type queries
    // ------------------------------------------------------------------

    pub fn element_type(&self, addr: Addr) -> Result<ElementType> {
        let _guard = self.monitors.read(addr);
        let cell = self.cell(addr)?;
        Ok(unsafe { cell.get() }.kind)
    }

    /// Overwrites the subtype bits; the element kind itself is immutable.
    pub fn change_element_subtype(&self, addr: Addr, ty: ElementType) -> Result<()> {
        let _guard = self.monitors.write(addr);
        let cell = self.cell(addr)?;
        let element = unsafe { cell.get_mut() };
        if element.kind.element_kind() != ty.element_kind() {
            return Err(MemoryError::InvalidType);
        }
        element.kind = ty;
        Ok(())
    }

    pub fn arc_begin(&self, addr: Addr) -> Result<Addr> {
        self.arc_info(addr).map(|(begin, _)| begin)
    }

    pub fn arc_end(&self, addr: Addr) -> Result<Addr> {
        self.arc_info(addr).map(|(_, end)| end)
    }

    pub fn arc_info(&self, addr: Addr) -> Result<(Addr, Addr)> {
        let _guard = self.monitors.read(addr);
        let cell = self.cell(addr)?;
        let element = unsafe { cell.get() };
        if !element.kind.is_connector() {
            return Err(MemoryError::ElementNotConnector);
        }
        Ok((element.begin, element.end))
    }

    pub fn output_arcs_count(&self, addr: Addr) -> u32 {
        let _guard = self.monitors.read(addr);
        match self.cell(addr) {
            Ok(cell) => unsafe { cell.get() }.output_arcs_count,
            Err(_) => 0,
        }
    }

    pub fn input_arcs_count(&self, addr: Addr) -> u32 {
        let _guard = self.monitors.read(addr);
        match self.cell(addr) {
            Ok(cell) => unsafe { cell.get() }.input_arcs_count,
            Err(_) => 0,
        }
    }

    // ------------------------------------------------------------------
    // Link content bridge
    // ------------------------------------------------------------------

    pub fn set_link_content(&self, addr: Addr, bytes: &[u8], searchable: bool) -> Result<()> {
        let _guard = self.monitors.write(addr);
        let cell = self.cell(addr)?;
        if !unsafe { cell.get() }.kind.is_link() {
            return Err(MemoryError::ElementNotLink);
        }
        self.fs.link_string_set(addr.pack(), bytes, searchable)?;
        self.events
            .emit(addr, EventKind::ContentChanged, Addr::EMPTY, Addr::EMPTY);
        Ok(())
    }

    pub fn get_link_content(&self, addr: Addr) -> Result<Vec<u8>> {
        let _guard = self.monitors.read(addr);
        let cell = self.cell(addr)?;
        if !unsafe { cell.get() }.kind.is_link() {
            return Err(MemoryError::ElementNotLink);
        }
        Ok(self.fs.link_string_get(addr.pack()).unwrap_or_default())
    }

    pub fn find_links_by_content(&self, bytes: &[u8]) -> Vec<Addr> {
        self.fs
            .find_by_exact(bytes)
            .into_iter()
            .map(Addr::unpack)
            .collect()
    }

    pub fn find_links_by_content_substring(&self, bytes: &[u8], prefix_limit: u32) -> Vec<Addr> {
        self.fs
            .find_by_substring(bytes, prefix_limit)
            .into_iter()
            .map(Addr::unpack)
            .collect()
    }

    pub fn find_link_contents_by_substring(&self, bytes: &[u8], prefix_limit: u32) -> Vec<Vec<u8>> {
        self.fs.find_strings_by_substring(bytes, prefix_limit)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    pub fn stat(&self) -> Stat {
        let segments_count = self.lists.lock().segments_count;
        let mut stat = Stat {
            segments: segments_count,
            ..Stat::default()
        };
        for num in 1..=segments_count {
            let Some(segment) = self.segment(num) else { continue };
            let last_engaged = segment.alloc_state().last_engaged_offset;
            for offset in 1..=last_engaged {
                let addr = Addr::new(num, offset);
                let _guard = self.monitors.read(addr);
                match self.cell(addr) {
                    Err(_) => stat.free_slots += 1,
                    Ok(cell) => {
                        let kind = unsafe { cell.get() }.kind;
                        if kind.is_connector() {
                            stat.connectors += 1;
                        } else if kind.is_link() {
                            stat.links += 1;
                        } else if kind.is_node() {
                            stat.nodes += 1;
                        }
                    }
                }
            }
        }
        stat
    }

    pub fn save(&self) -> Result<()> {
        self.fs.save(self)
    }

    // ------------------------------------------------------------------
    // Image restore hooks, used by the persistence layer.
    // ------------------------------------------------------------------

    pub(crate) fn lists_state(&self) -> (u16, u16, u16) {
        let lists = self.lists.lock();
        (
            lists.segments_count,
            lists.last_not_engaged_segment_num,
            lists.last_released_segment_num,
        )
    }

    pub(crate) fn set_lists_state(&self, count: u16, not_engaged: u16, released: u16) {
        let mut lists = self.lists.lock();
        lists.segments_count = count;
        lists.last_not_engaged_segment_num = not_engaged;
        lists.last_released_segment_num = released;
    }

    pub(crate) fn install_segment(&self, num: u16) -> Result<Arc<Segment>> {
        if num == 0 || num > self.max_segments {
            return Err(MemoryError::Corruption("segment number out of range"));
        }
        let segment = Arc::new(Segment::new(num));
        self.segments[num as usize - 1]
            .set(segment.clone())
            .map_err(|_| MemoryError::Corruption("segment installed twice"))?;
        Ok(segment)
    }

    pub(crate) fn max_segments(&self) -> u16 {
        self.max_segments
    }

    /// Releases per-thread state at shutdown; `processes` may still carry
    /// entries for threads that never called `end_process`.
    pub(crate) fn clear_processes(&self) {
        self.processes.lock().clear();
    }
}
