use noema::{Addr, ElementType, Memory, MemoryParams, Triple};
use tempfile::tempdir;

fn open() -> Memory {
    let dir = tempdir().unwrap();
    Memory::initialize(MemoryParams::test(dir.path())).unwrap()
}

#[test]
fn f_a_a_streams_in_insertion_reverse_order() {
    let memory = open();
    let ctx = memory.context();

    let n1 = ctx.create_node(ElementType::CONST).unwrap();
    let n2 = ctx.create_node(ElementType::CONST).unwrap();
    let n3 = ctx.create_node(ElementType::CONST).unwrap();
    let a12 = ctx
        .create_arc(ElementType::ARC_ACCESS_CONST_POS_PERM, n1, n2)
        .unwrap();
    let a13 = ctx
        .create_arc(ElementType::ARC_ACCESS_CONST_POS_PERM, n1, n3)
        .unwrap();

    let found: Vec<Triple> = ctx
        .iter_f_a_a(n1, ElementType::ARC_ACCESS, ElementType::NODE)
        .unwrap()
        .collect();
    // Heads are prepended, so the later arc comes out first.
    assert_eq!(found.len(), 2);
    assert_eq!(found[0], Triple { source: n1, connector: a13, target: n3 });
    assert_eq!(found[1], Triple { source: n1, connector: a12, target: n2 });
}

#[test]
fn f_a_a_filters_by_masks() {
    let memory = open();
    let ctx = memory.context();

    let hub = ctx.create_node(ElementType::CONST).unwrap();
    let node = ctx.create_node(ElementType::CONST).unwrap();
    let link = ctx.create_link(ElementType::CONST).unwrap();
    ctx.create_arc(ElementType::ARC_ACCESS_CONST_POS_PERM, hub, node)
        .unwrap();
    let var_arc = ctx
        .create_arc(ElementType::ARC_ACCESS_VAR_POS_PERM, hub, link)
        .unwrap();

    // Connector mask: only the var arc passes.
    let found: Vec<Triple> = ctx
        .iter_f_a_a(
            hub,
            ElementType::ARC_ACCESS.with(ElementType::VAR),
            ElementType::EMPTY,
        )
        .unwrap()
        .collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].connector, var_arc);

    // Target mask: only the link target passes.
    let found: Vec<Triple> = ctx
        .iter_f_a_a(hub, ElementType::ARC_ACCESS, ElementType::LINK)
        .unwrap()
        .collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].target, link);
}

#[test]
fn f_a_f_and_a_a_f() {
    let memory = open();
    let ctx = memory.context();

    let a = ctx.create_node(ElementType::CONST).unwrap();
    let b = ctx.create_node(ElementType::CONST).unwrap();
    let c = ctx.create_node(ElementType::CONST).unwrap();
    let ab = ctx
        .create_arc(ElementType::ARC_ACCESS_CONST_POS_PERM, a, b)
        .unwrap();
    let cb = ctx
        .create_arc(ElementType::ARC_ACCESS_CONST_POS_PERM, c, b)
        .unwrap();

    let found: Vec<Triple> = ctx
        .iter_f_a_f(a, ElementType::ARC_ACCESS, b)
        .unwrap()
        .collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0], Triple { source: a, connector: ab, target: b });

    let found: Vec<Triple> = ctx
        .iter_a_a_f(ElementType::NODE, ElementType::ARC_ACCESS, b)
        .unwrap()
        .collect();
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].connector, cb);
    assert_eq!(found[1].connector, ab);
    assert!(found.iter().all(|t| t.target == b));
}

#[test]
fn single_shot_shapes() {
    let memory = open();
    let ctx = memory.context();

    let a = ctx.create_node(ElementType::CONST).unwrap();
    let b = ctx.create_node(ElementType::CONST).unwrap();
    let arc = ctx
        .create_arc(ElementType::ARC_ACCESS_CONST_POS_PERM, a, b)
        .unwrap();

    let expected = Triple { source: a, connector: arc, target: b };

    let found: Vec<Triple> = ctx
        .iter_a_f_a(ElementType::NODE, arc, ElementType::NODE)
        .unwrap()
        .collect();
    assert_eq!(found, vec![expected]);

    let found: Vec<Triple> = ctx.iter_f_f_a(a, arc, ElementType::NODE).unwrap().collect();
    assert_eq!(found, vec![expected]);

    let found: Vec<Triple> = ctx.iter_a_f_f(ElementType::NODE, arc, b).unwrap().collect();
    assert_eq!(found, vec![expected]);

    let found: Vec<Triple> = ctx.iter_f_f_f(a, arc, b).unwrap().collect();
    assert_eq!(found, vec![expected]);

    // Endpoint mismatches yield nothing.
    assert_eq!(ctx.iter_f_f_a(b, arc, ElementType::NODE).unwrap().count(), 0);
    assert_eq!(ctx.iter_a_f_f(ElementType::NODE, arc, a).unwrap().count(), 0);
    assert_eq!(ctx.iter_f_f_f(b, arc, a).unwrap().count(), 0);

    // A node in the connector position is not a connector.
    assert_eq!(
        ctx.iter_a_f_a(ElementType::NODE, a, ElementType::NODE)
            .unwrap()
            .count(),
        0
    );
}

#[test]
fn undirected_edges_are_seen_from_both_ends() {
    let memory = open();
    let ctx = memory.context();

    let a = ctx.create_node(ElementType::CONST).unwrap();
    let b = ctx.create_node(ElementType::CONST).unwrap();
    let edge = ctx
        .create_arc(ElementType::EDGE_COMMON_CONST, a, b)
        .unwrap();

    let from_a: Vec<Triple> = ctx
        .iter_f_a_a(a, ElementType::EDGE_COMMON, ElementType::NODE)
        .unwrap()
        .collect();
    assert_eq!(from_a, vec![Triple { source: a, connector: edge, target: b }]);

    // Walking from the other endpoint reports the opposite node, not the
    // stored begin.
    let from_b: Vec<Triple> = ctx
        .iter_f_a_a(b, ElementType::EDGE_COMMON, ElementType::NODE)
        .unwrap()
        .collect();
    assert_eq!(from_b, vec![Triple { source: b, connector: edge, target: a }]);

    // Fixed-endpoint shapes accept the swapped orientation.
    assert_eq!(ctx.iter_f_f_f(b, edge, a).unwrap().count(), 1);
    assert_eq!(ctx.iter_f_a_f(b, ElementType::EDGE_COMMON, a).unwrap().count(), 1);
}

#[test]
fn iterator_tolerates_concurrent_deletion() {
    let memory = open();
    let ctx = memory.context();

    let n1 = ctx.create_node(ElementType::CONST).unwrap();
    let n2 = ctx.create_node(ElementType::CONST).unwrap();
    let n3 = ctx.create_node(ElementType::CONST).unwrap();
    let a12 = ctx
        .create_arc(ElementType::ARC_ACCESS_CONST_POS_PERM, n1, n2)
        .unwrap();
    let a13 = ctx
        .create_arc(ElementType::ARC_ACCESS_CONST_POS_PERM, n1, n3)
        .unwrap();

    let mut iter = ctx
        .iter_f_a_a(n1, ElementType::ARC_ACCESS, ElementType::NODE)
        .unwrap();
    let first = iter.next().unwrap();
    assert_eq!(first.connector, a13);

    // The not-yet-visited arc disappears mid-iteration; the cursor stops
    // cleanly instead of chasing a freed slot.
    ctx.erase_element(a12).unwrap();
    assert_eq!(iter.next(), None);
    assert!(iter.finished());
}

#[test]
fn construction_rejects_missing_pins() {
    let memory = open();
    let ctx = memory.context();

    let node = ctx.create_node(ElementType::CONST).unwrap();
    let gone = ctx.create_node(ElementType::CONST).unwrap();
    ctx.erase_element(gone).unwrap();

    assert!(ctx
        .iter_f_a_a(gone, ElementType::ARC_ACCESS, ElementType::NODE)
        .is_err());
    assert!(ctx.iter_f_a_f(node, ElementType::ARC_ACCESS, gone).is_err());
    assert!(ctx
        .iter_a_f_a(ElementType::NODE, Addr::EMPTY, ElementType::NODE)
        .is_err());
}

#[test]
fn empty_store_iteration_finishes() {
    let memory = open();
    let ctx = memory.context();

    let node = ctx.create_node(ElementType::CONST).unwrap();
    let mut iter = ctx
        .iter_f_a_a(node, ElementType::ARC_ACCESS, ElementType::NODE)
        .unwrap();
    assert_eq!(iter.next(), None);
    assert!(iter.finished());
    assert_eq!(iter.next(), None);
}
