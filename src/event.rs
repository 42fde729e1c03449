//! Graph-change notification bus.
//!
//! Mutations emit notifications into a queue drained by one worker thread,
//! so subscriber callbacks never run under storage monitors. Emissions from
//! a single mutation keep their order; emissions from concurrent mutations
//! interleave arbitrarily.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::addr::Addr;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    AddOutputArc,
    AddInputArc,
    RemoveOutputArc,
    RemoveInputArc,
    RemoveElement,
    ContentChanged,
}

/// Payload delivered to a subscriber.
#[derive(Clone, Copy, Debug)]
pub struct EventNotification {
    /// The element the subscription is attached to.
    pub element: Addr,
    pub kind: EventKind,
    /// The connector involved, when the event concerns one.
    pub connector: Addr,
    /// The other endpoint of that connector.
    pub other: Addr,
}

/// Subscription handle returned by [`EventBus::subscribe`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EventId {
    element: Addr,
    serial: u64,
}

pub type EventCallback = Box<dyn Fn(EventNotification) + Send + Sync>;
pub type EventDeleteCallback = Box<dyn Fn(Addr) + Send + Sync>;

struct Subscription {
    serial: u64,
    kind: EventKind,
    callback: EventCallback,
    on_delete: Option<EventDeleteCallback>,
}

enum Job {
    Emit(EventNotification),
    Reap(Addr),
    Stop,
}

struct BusShared {
    table: RwLock<HashMap<Addr, Vec<Arc<Subscription>>>>,
    next_serial: AtomicU64,
}

pub struct EventBus {
    shared: Arc<BusShared>,
    tx: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    pub fn new() -> crate::error::Result<Self> {
        let shared = Arc::new(BusShared {
            table: RwLock::new(HashMap::new()),
            next_serial: AtomicU64::new(1),
        });
        let (tx, rx) = channel::<Job>();
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("noema-events".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    match job {
                        Job::Stop => break,
                        Job::Emit(notification) => {
                            let matching: Vec<Arc<Subscription>> = {
                                let table = worker_shared.table.read();
                                table
                                    .get(&notification.element)
                                    .map(|subs| {
                                        subs.iter()
                                            .filter(|s| s.kind == notification.kind)
                                            .cloned()
                                            .collect()
                                    })
                                    .unwrap_or_default()
                            };
                            for subscription in matching {
                                (subscription.callback)(notification);
                            }
                        }
                        Job::Reap(element) => {
                            let removed = worker_shared.table.write().remove(&element);
                            for subscription in removed.unwrap_or_default() {
                                if let Some(on_delete) = &subscription.on_delete {
                                    on_delete(element);
                                }
                            }
                        }
                    }
                }
            })?;
        Ok(Self {
            shared,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn subscribe(
        &self,
        element: Addr,
        kind: EventKind,
        callback: EventCallback,
        on_delete: Option<EventDeleteCallback>,
    ) -> Option<EventId> {
        if element.is_empty() {
            return None;
        }
        let serial = self.shared.next_serial.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription {
            serial,
            kind,
            callback,
            on_delete,
        });
        self.shared
            .table
            .write()
            .entry(element)
            .or_default()
            .push(subscription);
        Some(EventId { element, serial })
    }

    /// Removes one subscription; true if it was still registered.
    pub fn unsubscribe(&self, id: EventId) -> bool {
        let mut table = self.shared.table.write();
        let Some(subscriptions) = table.get_mut(&id.element) else {
            return false;
        };
        let before = subscriptions.len();
        subscriptions.retain(|s| s.serial != id.serial);
        let removed = subscriptions.len() < before;
        if subscriptions.is_empty() {
            table.remove(&id.element);
        }
        removed
    }

    pub(crate) fn emit(&self, element: Addr, kind: EventKind, connector: Addr, other: Addr) {
        if element.is_empty() {
            return;
        }
        self.send(Job::Emit(EventNotification {
            element,
            kind,
            connector,
            other,
        }));
    }

    /// Queues subscription teardown for a deleted address.
    pub(crate) fn notify_element_deleted(&self, element: Addr) {
        self.send(Job::Reap(element));
    }

    fn send(&self, job: Job) {
        if let Some(tx) = self.tx.lock().as_ref() {
            // A send failure means the worker is gone; nothing to notify.
            let _ = tx.send(job);
        }
    }

    /// Stops the worker after draining every queued notification.
    pub(crate) fn shutdown(&self) {
        let tx = self.tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(Job::Stop);
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                debug!("event worker panicked during shutdown");
            }
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}
