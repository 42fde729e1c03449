//! Sharded read/write monitors for element addresses.
//!
//! A fixed table of monitors is indexed by hashing an address; distinct
//! addresses may share a monitor, which is never incorrect, only a
//! contention trade. What matters to callers is the identity of the
//! returned lock: acquisition helpers sort by that identity and drop
//! duplicates so a colliding pair can be taken in one call without
//! self-deadlock.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use smallvec::SmallVec;

use crate::addr::Addr;

/// Monitor count; several times the expected mutation parallelism.
pub(crate) const MONITOR_TABLE_SIZE: usize = 1024;

pub(crate) type WriteGuards<'a> = SmallVec<[RwLockWriteGuard<'a, ()>; 6]>;

pub(crate) struct MonitorTable {
    monitors: Box<[RwLock<()>]>,
}

impl MonitorTable {
    pub fn new() -> Self {
        let monitors = (0..MONITOR_TABLE_SIZE)
            .map(|_| RwLock::new(()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { monitors }
    }

    #[inline]
    pub fn monitor(&self, addr: Addr) -> &RwLock<()> {
        &self.monitors[addr.hash() as usize % MONITOR_TABLE_SIZE]
    }

    #[inline]
    pub fn read(&self, addr: Addr) -> RwLockReadGuard<'_, ()> {
        self.monitor(addr).read()
    }

    #[inline]
    pub fn write(&self, addr: Addr) -> RwLockWriteGuard<'_, ()> {
        self.monitor(addr).write()
    }

    /// Write-acquires the monitors for `addrs`, ordered by lock identity and
    /// deduplicated, skipping empty addresses and any monitor listed in
    /// `held` (one the caller already owns).
    pub fn write_set<'a>(&'a self, addrs: &[Addr], held: &[*const RwLock<()>]) -> WriteGuards<'a> {
        let mut locks: SmallVec<[&RwLock<()>; 6]> = SmallVec::new();
        for &addr in addrs {
            if addr.is_empty() {
                continue;
            }
            let lock = self.monitor(addr);
            if held.iter().any(|&h| std::ptr::eq(h, lock)) {
                continue;
            }
            locks.push(lock);
        }
        locks.sort_by_key(|lock| *lock as *const RwLock<()> as usize);
        locks.dedup_by(|a, b| std::ptr::eq(*a, *b));
        locks.iter().map(|lock| lock.write()).collect()
    }

    /// Write-acquires the monitor pair for a connector's endpoints.
    pub fn write_pair<'a>(&'a self, a: Addr, b: Addr) -> WriteGuards<'a> {
        self.write_set(&[a, b], &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_monitor_taken_once() {
        let table = MonitorTable::new();
        // Find two addresses that collide on one monitor.
        let a = Addr::new(1, 1);
        let mut b = Addr::new(1, 2);
        for offset in 2..u16::MAX {
            b = Addr::new(1, offset);
            if std::ptr::eq(table.monitor(a), table.monitor(b)) {
                break;
            }
        }
        assert!(std::ptr::eq(table.monitor(a), table.monitor(b)));
        let guards = table.write_pair(a, b);
        assert_eq!(guards.len(), 1);
    }

    #[test]
    fn held_monitors_are_skipped() {
        let table = MonitorTable::new();
        let a = Addr::new(1, 1);
        let b = Addr::new(2, 9);
        let first = table.write(a);
        let held = [table.monitor(a) as *const RwLock<()>];
        let guards = table.write_set(&[a, b], &held);
        // Only b's monitor remains unless it collides with a's.
        assert!(guards.len() <= 1);
        drop(guards);
        drop(first);
    }

    #[test]
    fn empty_addresses_are_ignored() {
        let table = MonitorTable::new();
        let guards = table.write_set(&[Addr::EMPTY, Addr::new(3, 3)], &[]);
        assert_eq!(guards.len(), 1);
    }
}
