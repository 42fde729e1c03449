//! Engine lifecycle and the thin typed operation surface.
//!
//! [`Memory`] owns the store, the persistence layer, the event worker and
//! the optional background saver; [`MemoryContext`] is the cheaply cloneable
//! handle a thread uses to operate on the graph.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::addr::Addr;
use crate::config::MemoryParams;
use crate::error::{MemoryError, Result};
use crate::event::{EventBus, EventCallback, EventDeleteCallback, EventId, EventKind};
use crate::fs::FileStore;
use crate::iter::TripleIter;
use crate::notation::{self, ElementHandle, ParseResult};
use crate::store::{Stat, Store};
use crate::types::ElementType;

type SaverSignal = (Mutex<bool>, Condvar);

pub struct Memory {
    store: Arc<Store>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stop: Arc<SaverSignal>,
}

impl Memory {
    pub fn initialize(params: MemoryParams) -> Result<Memory> {
        let fs = FileStore::open(&params.repo_path, params.clear)?;
        let events = EventBus::new()?;
        let store = Arc::new(Store::new(&params, events, fs));
        if !params.clear {
            store.fs.load(&store)?;
        }
        info!(
            repo = %params.repo_path.display(),
            clear = params.clear,
            save_period = params.save_period,
            "memory initialized"
        );

        let stop: Arc<SaverSignal> = Arc::new((Mutex::new(false), Condvar::new()));
        let mut workers = Vec::new();
        if params.save_period > 0 {
            let store = store.clone();
            let stop = stop.clone();
            let period = Duration::from_secs(params.save_period);
            workers.push(Self::spawn_ticker("noema-saver", stop, period, move || {
                if let Err(error) = store.save() {
                    warn!(%error, "periodic save failed");
                }
            })?);
        }
        if params.update_period > 0 {
            let store = store.clone();
            let stop = stop.clone();
            let period = Duration::from_secs(params.update_period);
            workers.push(Self::spawn_ticker("noema-updater", stop, period, move || {
                let stat = store.stat();
                info!(
                    nodes = stat.nodes,
                    links = stat.links,
                    connectors = stat.connectors,
                    free_slots = stat.free_slots,
                    "population"
                );
            })?);
        }

        Ok(Memory {
            store,
            workers: Mutex::new(workers),
            stop,
        })
    }

    fn spawn_ticker(
        name: &str,
        stop: Arc<SaverSignal>,
        period: Duration,
        tick: impl Fn() + Send + 'static,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name.into()).spawn(move || {
            let (lock, condvar) = &*stop;
            let mut stopped = lock.lock();
            while !*stopped {
                let timed_out = condvar.wait_for(&mut stopped, period).timed_out();
                if *stopped {
                    break;
                }
                if timed_out {
                    // Run the tick without the signal lock held.
                    drop(stopped);
                    tick();
                    stopped = lock.lock();
                }
            }
        })
    }

    pub fn context(&self) -> MemoryContext {
        MemoryContext {
            store: self.store.clone(),
        }
    }

    /// Orderly teardown: stops the saver, drains the event worker and
    /// optionally saves a final image.
    pub fn shutdown(self, save: bool) -> Result<()> {
        self.shutdown_inner(save)
    }

    fn shutdown_inner(&self, save: bool) -> Result<()> {
        {
            let (lock, condvar) = &*self.stop;
            *lock.lock() = true;
            condvar.notify_all();
        }
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
        self.store.events.shutdown();
        if save {
            self.store.save()?;
        }
        self.store.clear_processes();
        Ok(())
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        let _ = self.shutdown_inner(false);
    }
}

/// Operation handle over the shared store.
#[derive(Clone)]
pub struct MemoryContext {
    store: Arc<Store>,
}

impl MemoryContext {
    // ------------------------------------------------------------------
    // Element lifecycle
    // ------------------------------------------------------------------

    pub fn create_node(&self, ty: ElementType) -> Result<Addr> {
        self.store.node_new(ty)
    }

    pub fn create_link(&self, ty: ElementType) -> Result<Addr> {
        self.store.link_new(ty)
    }

    pub fn create_arc(&self, ty: ElementType, begin: Addr, end: Addr) -> Result<Addr> {
        self.store.arc_new(ty, begin, end)
    }

    pub fn erase_element(&self, addr: Addr) -> Result<()> {
        self.store.erase_element(addr)
    }

    pub fn is_element(&self, addr: Addr) -> bool {
        self.store.is_element(addr)
    }

    // ------------------------------------------------------------------
    // Types and adjacency queries
    // ------------------------------------------------------------------

    pub fn element_type(&self, addr: Addr) -> Result<ElementType> {
        self.store.element_type(addr)
    }

    pub fn change_element_subtype(&self, addr: Addr, ty: ElementType) -> Result<()> {
        self.store.change_element_subtype(addr, ty)
    }

    pub fn arc_begin(&self, addr: Addr) -> Result<Addr> {
        self.store.arc_begin(addr)
    }

    pub fn arc_end(&self, addr: Addr) -> Result<Addr> {
        self.store.arc_end(addr)
    }

    pub fn arc_info(&self, addr: Addr) -> Result<(Addr, Addr)> {
        self.store.arc_info(addr)
    }

    pub fn output_arcs_count(&self, addr: Addr) -> u32 {
        self.store.output_arcs_count(addr)
    }

    pub fn input_arcs_count(&self, addr: Addr) -> u32 {
        self.store.input_arcs_count(addr)
    }

    // ------------------------------------------------------------------
    // Link contents
    // ------------------------------------------------------------------

    pub fn set_link_content(&self, addr: Addr, bytes: &[u8], searchable: bool) -> Result<()> {
        self.store.set_link_content(addr, bytes, searchable)
    }

    pub fn get_link_content(&self, addr: Addr) -> Result<Vec<u8>> {
        self.store.get_link_content(addr)
    }

    pub fn find_links_by_content(&self, bytes: &[u8]) -> Vec<Addr> {
        self.store.find_links_by_content(bytes)
    }

    pub fn find_links_by_content_substring(&self, bytes: &[u8], prefix_limit: u32) -> Vec<Addr> {
        self.store.find_links_by_content_substring(bytes, prefix_limit)
    }

    pub fn find_link_contents_by_substring(
        &self,
        bytes: &[u8],
        prefix_limit: u32,
    ) -> Vec<Vec<u8>> {
        self.store.find_link_contents_by_substring(bytes, prefix_limit)
    }

    // ------------------------------------------------------------------
    // Triple iteration
    // ------------------------------------------------------------------

    pub fn iter_f_a_a(
        &self,
        source: Addr,
        connector: ElementType,
        target: ElementType,
    ) -> Result<TripleIter<'_>> {
        TripleIter::f_a_a(&self.store, source, connector, target)
    }

    pub fn iter_f_a_f(
        &self,
        source: Addr,
        connector: ElementType,
        target: Addr,
    ) -> Result<TripleIter<'_>> {
        TripleIter::f_a_f(&self.store, source, connector, target)
    }

    pub fn iter_a_a_f(
        &self,
        source: ElementType,
        connector: ElementType,
        target: Addr,
    ) -> Result<TripleIter<'_>> {
        TripleIter::a_a_f(&self.store, source, connector, target)
    }

    pub fn iter_a_f_a(
        &self,
        source: ElementType,
        connector: Addr,
        target: ElementType,
    ) -> Result<TripleIter<'_>> {
        TripleIter::a_f_a(&self.store, source, connector, target)
    }

    pub fn iter_f_f_a(
        &self,
        source: Addr,
        connector: Addr,
        target: ElementType,
    ) -> Result<TripleIter<'_>> {
        TripleIter::f_f_a(&self.store, source, connector, target)
    }

    pub fn iter_a_f_f(
        &self,
        source: ElementType,
        connector: Addr,
        target: Addr,
    ) -> Result<TripleIter<'_>> {
        TripleIter::a_f_f(&self.store, source, connector, target)
    }

    pub fn iter_f_f_f(&self, source: Addr, connector: Addr, target: Addr) -> Result<TripleIter<'_>> {
        TripleIter::f_f_f(&self.store, source, connector, target)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn subscribe(
        &self,
        element: Addr,
        kind: EventKind,
        callback: EventCallback,
    ) -> Option<EventId> {
        self.store.events.subscribe(element, kind, callback, None)
    }

    pub fn subscribe_with_delete(
        &self,
        element: Addr,
        kind: EventKind,
        callback: EventCallback,
        on_delete: EventDeleteCallback,
    ) -> Option<EventId> {
        self.store
            .events
            .subscribe(element, kind, callback, Some(on_delete))
    }

    pub fn unsubscribe(&self, id: EventId) -> bool {
        self.store.events.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Per-thread allocation state
    // ------------------------------------------------------------------

    pub fn begin_process(&self) {
        self.store.begin_process()
    }

    pub fn end_process(&self) {
        self.store.end_process()
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    pub fn stat(&self) -> Stat {
        self.store.stat()
    }

    pub fn save(&self) -> Result<()> {
        self.store.save()
    }

    // ------------------------------------------------------------------
    // Surface notation
    // ------------------------------------------------------------------

    /// Parses a text and materializes its triples into the store.
    ///
    /// Returns one address per parsed element, aligned with the parse
    /// result's element handles; elements never referenced by a triple are
    /// still created so aliases stay resolvable by the caller.
    pub fn generate_from_text(&self, text: &str) -> Result<Vec<Addr>> {
        let parsed = notation::parse(text)?;
        let mut addrs = vec![Addr::EMPTY; parsed.elements().len()];

        for triple in parsed.triples() {
            let source = self.materialize(&parsed, triple.source, &mut addrs)?;
            let target = self.materialize(&parsed, triple.target, &mut addrs)?;
            let index = triple.connector.0;
            if addrs[index].is_empty() {
                let ty = parsed.element(triple.connector).ty;
                addrs[index] = self.store.arc_new(ty, source, target)?;
            }
        }

        for index in 0..parsed.elements().len() {
            if addrs[index].is_empty() && !parsed.elements()[index].ty.is_connector() {
                self.materialize(&parsed, ElementHandle(index), &mut addrs)?;
            }
        }
        Ok(addrs)
    }

    fn materialize(
        &self,
        parsed: &ParseResult,
        handle: ElementHandle,
        addrs: &mut [Addr],
    ) -> Result<Addr> {
        if !addrs[handle.0].is_empty() {
            return Ok(addrs[handle.0]);
        }
        let element = parsed.element(handle);
        if element.ty.is_connector() {
            // A connector is created by its own triple; the parser emits
            // that triple before any reference to the connector.
            return Err(MemoryError::InvalidParams(
                "connector referenced before its defining triple",
            ));
        }
        let addr = if element.ty.is_link() {
            let addr = self.store.link_new(element.ty)?;
            if let Some(value) = &element.value {
                self.store.set_link_content(addr, value.as_bytes(), true)?;
            }
            addr
        } else {
            self.store.node_new(element.ty)?
        };
        addrs[handle.0] = addr;
        Ok(addr)
    }
}
