//! Template-shaped triple cursors.
//!
//! A cursor enumerates `(source, connector, target)` triples matching three
//! parameters, each either a fixed address (`f`) or a type mask (`a`). Seven
//! shapes exist; the three with a fixed endpoint and a masked connector
//! stream results off an incidence list, the four with a fixed connector
//! yield at most one triple.
//!
//! Iteration tolerates concurrent deletion: every candidate is read under
//! its monitor, a slot already returned to the free list fails the lookup
//! and cleanly finishes the cursor. The view is not a snapshot; concurrent
//! splices may or may not be observed.

use crate::addr::Addr;
use crate::error::Result;
use crate::store::Store;
use crate::types::ElementType;

/// One enumerated `(source, connector, target)` result.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Triple {
    pub source: Addr,
    pub connector: Addr,
    pub target: Addr,
}

#[derive(Clone, Copy, Debug)]
enum Param {
    Fixed(Addr),
    Mask(ElementType),
}

impl Param {
    fn addr(self) -> Addr {
        match self {
            Param::Fixed(addr) => addr,
            Param::Mask(_) => Addr::EMPTY,
        }
    }

    fn mask(self) -> ElementType {
        match self {
            Param::Fixed(_) => ElementType::EMPTY,
            Param::Mask(mask) => mask,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Shape {
    FAA,
    FAF,
    AAF,
    AFA,
    FFA,
    AFF,
    FFF,
}

pub struct TripleIter<'a> {
    store: &'a Store,
    shape: Shape,
    params: [Param; 3],
    /// Cursor state for the streaming shapes; `results[1]` is the last
    /// yielded connector and iteration resumes from its next pointer.
    results: [Addr; 3],
    finished: bool,
}

impl<'a> TripleIter<'a> {
    pub(crate) fn f_a_a(
        store: &'a Store,
        source: Addr,
        connector: ElementType,
        target: ElementType,
    ) -> Result<Self> {
        store.check_pinned(source)?;
        Ok(Self::new(
            store,
            Shape::FAA,
            [Param::Fixed(source), Param::Mask(connector), Param::Mask(target)],
        ))
    }

    pub(crate) fn f_a_f(
        store: &'a Store,
        source: Addr,
        connector: ElementType,
        target: Addr,
    ) -> Result<Self> {
        store.check_pinned(source)?;
        store.check_pinned(target)?;
        Ok(Self::new(
            store,
            Shape::FAF,
            [Param::Fixed(source), Param::Mask(connector), Param::Fixed(target)],
        ))
    }

    pub(crate) fn a_a_f(
        store: &'a Store,
        source: ElementType,
        connector: ElementType,
        target: Addr,
    ) -> Result<Self> {
        store.check_pinned(target)?;
        Ok(Self::new(
            store,
            Shape::AAF,
            [Param::Mask(source), Param::Mask(connector), Param::Fixed(target)],
        ))
    }

    pub(crate) fn a_f_a(
        store: &'a Store,
        source: ElementType,
        connector: Addr,
        target: ElementType,
    ) -> Result<Self> {
        store.check_pinned(connector)?;
        Ok(Self::new(
            store,
            Shape::AFA,
            [Param::Mask(source), Param::Fixed(connector), Param::Mask(target)],
        ))
    }

    pub(crate) fn f_f_a(
        store: &'a Store,
        source: Addr,
        connector: Addr,
        target: ElementType,
    ) -> Result<Self> {
        store.check_pinned(source)?;
        store.check_pinned(connector)?;
        Ok(Self::new(
            store,
            Shape::FFA,
            [Param::Fixed(source), Param::Fixed(connector), Param::Mask(target)],
        ))
    }

    pub(crate) fn a_f_f(
        store: &'a Store,
        source: ElementType,
        connector: Addr,
        target: Addr,
    ) -> Result<Self> {
        store.check_pinned(connector)?;
        store.check_pinned(target)?;
        Ok(Self::new(
            store,
            Shape::AFF,
            [Param::Mask(source), Param::Fixed(connector), Param::Fixed(target)],
        ))
    }

    pub(crate) fn f_f_f(
        store: &'a Store,
        source: Addr,
        connector: Addr,
        target: Addr,
    ) -> Result<Self> {
        store.check_pinned(source)?;
        store.check_pinned(connector)?;
        store.check_pinned(target)?;
        Ok(Self::new(
            store,
            Shape::FFF,
            [Param::Fixed(source), Param::Fixed(connector), Param::Fixed(target)],
        ))
    }

    fn new(store: &'a Store, shape: Shape, params: [Param; 3]) -> Self {
        Self {
            store,
            shape,
            params,
            results: [Addr::EMPTY; 3],
            finished: false,
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self) -> Option<Triple> {
        self.results = [Addr::EMPTY; 3];
        self.finished = true;
        None
    }

    /// First connector candidate of a streaming pass, or the successor of
    /// the previous result.
    fn resume_point(&mut self, pivot: Addr, outgoing: bool) -> Option<Addr> {
        if self.results[1].is_empty() {
            let (element, _) = self.store.element_snapshot(pivot).ok()?;
            Some(if outgoing {
                element.first_out_arc
            } else {
                element.first_in_arc
            })
        } else {
            let (element, _) = self.store.element_snapshot(self.results[1]).ok()?;
            Some(if outgoing {
                element.next_out_arc
            } else {
                element.next_in_arc
            })
        }
    }

    /// Walks the pivot's out-list matching connector and target masks.
    fn next_f_a_a(&mut self) -> Option<Triple> {
        let pivot = self.params[0].addr();
        self.results[0] = pivot;
        let Some(mut cursor) = self.resume_point(pivot, true) else {
            return self.finish();
        };

        while !cursor.is_empty() {
            let Ok((element, requested)) = self.store.element_snapshot(cursor) else {
                return self.finish();
            };
            let next = element.next_out_arc;
            if !requested {
                let target = if element.kind.is_edge() && element.begin != pivot {
                    element.begin
                } else {
                    element.end
                };
                let target_kind = self.store.element_type(target).unwrap_or_default();
                if element.kind.matches(self.params[1].mask())
                    && target_kind.matches(self.params[2].mask())
                {
                    self.results[1] = cursor;
                    self.results[2] = target;
                    return Some(Triple {
                        source: pivot,
                        connector: cursor,
                        target,
                    });
                }
            }
            cursor = next;
        }
        self.finish()
    }

    /// Walks the target's in-list looking for connectors from the fixed
    /// source.
    fn next_f_a_f(&mut self) -> Option<Triple> {
        let source = self.params[0].addr();
        let pivot = self.params[2].addr();
        self.results[0] = source;
        self.results[2] = pivot;
        let Some(mut cursor) = self.resume_point(pivot, false) else {
            return self.finish();
        };

        while !cursor.is_empty() {
            let Ok((element, requested)) = self.store.element_snapshot(cursor) else {
                return self.finish();
            };
            let next = element.next_in_arc;
            if !requested {
                let opposite = if element.kind.is_edge() && element.begin == pivot {
                    element.end
                } else {
                    element.begin
                };
                if opposite == source && element.kind.matches(self.params[1].mask()) {
                    self.results[1] = cursor;
                    return Some(Triple {
                        source,
                        connector: cursor,
                        target: pivot,
                    });
                }
            }
            cursor = next;
        }
        self.finish()
    }

    /// Walks the target's in-list matching connector and source masks.
    fn next_a_a_f(&mut self) -> Option<Triple> {
        let pivot = self.params[2].addr();
        self.results[2] = pivot;
        let Some(mut cursor) = self.resume_point(pivot, false) else {
            return self.finish();
        };

        while !cursor.is_empty() {
            let Ok((element, requested)) = self.store.element_snapshot(cursor) else {
                return self.finish();
            };
            let next = element.next_in_arc;
            if !requested {
                let source = if element.kind.is_edge() && element.begin == pivot {
                    element.end
                } else {
                    element.begin
                };
                let source_kind = self.store.element_type(source).unwrap_or_default();
                if element.kind.matches(self.params[1].mask())
                    && source_kind.matches(self.params[0].mask())
                {
                    self.results[1] = cursor;
                    self.results[0] = source;
                    return Some(Triple {
                        source,
                        connector: cursor,
                        target: pivot,
                    });
                }
            }
            cursor = next;
        }
        self.finish()
    }

    /// Single-shot shapes: the connector is fixed, its endpoints are read
    /// once and checked against the fixed parameters with undirected-edge
    /// symmetry.
    fn next_fixed_connector(&mut self) -> Option<Triple> {
        let connector = self.params[1].addr();
        let Ok((element, requested)) = self.store.element_snapshot(connector) else {
            return self.finish();
        };
        if requested || !element.kind.is_connector() {
            return self.finish();
        }
        let is_edge = element.kind.is_edge();
        let (begin, end) = (element.begin, element.end);

        let endpoints = match self.shape {
            Shape::AFA => Some((begin, end)),
            Shape::FFA => {
                let source = self.params[0].addr();
                if begin == source {
                    Some((begin, end))
                } else if is_edge && end == source {
                    Some((end, begin))
                } else {
                    None
                }
            }
            Shape::AFF => {
                let target = self.params[2].addr();
                if end == target {
                    Some((begin, end))
                } else if is_edge && begin == target {
                    Some((end, begin))
                } else {
                    None
                }
            }
            Shape::FFF => {
                let source = self.params[0].addr();
                let target = self.params[2].addr();
                if begin == source && end == target {
                    Some((begin, end))
                } else if is_edge && begin == target && end == source {
                    Some((end, begin))
                } else {
                    None
                }
            }
            _ => None,
        };

        match endpoints {
            None => self.finish(),
            Some((source, target)) => {
                self.results = [source, connector, target];
                self.finished = true;
                Some(Triple {
                    source,
                    connector,
                    target,
                })
            }
        }
    }
}

impl Iterator for TripleIter<'_> {
    type Item = Triple;

    fn next(&mut self) -> Option<Triple> {
        if self.finished {
            return None;
        }
        match self.shape {
            Shape::FAA => self.next_f_a_a(),
            Shape::FAF => self.next_f_a_f(),
            Shape::AAF => self.next_a_a_f(),
            Shape::AFA | Shape::FFA | Shape::AFF | Shape::FFF => self.next_fixed_connector(),
        }
    }
}
