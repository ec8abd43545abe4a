use proptest::prelude::*;
use rsrcfix::heap::{
    self, Claim, DcoShape, IndexRange, RangeSet,
};
use rsrcfix::tree::Element;
use rsrcfix::typedesc::{TableRange, TdKind, TypeDesc, TypeDescTable};

// ── Interval algebra ──────────────────────────────────────────────────────────

#[test]
fn exclusions_compose() {
    let mut s = RangeSet::full(0, 19);
    s.exclude_below(2);
    s.exclude_one(10);
    s.exclude_between(14, 18);
    let left: Vec<usize> = s.iter_indices().collect();
    assert_eq!(left, vec![2, 3, 4, 5, 6, 7, 8, 9, 11, 12, 13, 14, 18, 19]);
}

#[test]
fn exclude_one_at_edges() {
    let mut s = RangeSet::full(3, 5);
    s.exclude_one(3);
    s.exclude_one(5);
    assert_eq!(s.ranges(), &[IndexRange::new(4, 4)]);
    s.exclude_one(4);
    assert!(s.is_empty());
}

proptest! {
    // Removing one index removes exactly that index and nothing else.
    #[test]
    fn exclude_one_law(max in 1usize..200, idx in 0usize..220) {
        let mut s = RangeSet::full(0, max);
        s.exclude_one(idx);
        prop_assert!(!s.contains(idx));
        for i in 0..=max {
            if i != idx {
                prop_assert!(s.contains(i), "index {i} vanished");
            }
        }
    }

    #[test]
    fn exclude_between_law(max in 2usize..200, lo in 0usize..100, width in 0usize..100) {
        let hi = lo + width;
        let mut s = RangeSet::full(0, max);
        s.exclude_between(lo, hi);
        for i in 0..=max {
            let interior = i > lo && i < hi;
            prop_assert_eq!(s.contains(i), !interior, "index {}", i);
        }
    }
}

// ── Claims ────────────────────────────────────────────────────────────────────

fn table_of(kinds: &[TdKind]) -> TypeDescTable {
    let mut table = TypeDescTable::new();
    for &kind in kinds {
        // No dedup: every top entry gets its own pool slot.
        let flat = table.append_flat(TypeDesc::simple(kind), false);
        table.add_top_level(flat);
    }
    table
}

#[test]
fn disabled_claim_leaves_indices_candidate() {
    let table = table_of(&[TdKind::Int32; 8]);
    let claim = |enabled| {
        let mut c = Claim::new("section", TableRange { shift: 2, count: 4 });
        c.enabled = enabled;
        c
    };
    assert_eq!(heap::unused_ranges(&table, &[claim(true)]).total_len(), 4);
    assert_eq!(heap::unused_ranges(&table, &[claim(false)]).total_len(), 8);
}

#[test]
fn unclaimed_space_starts_at_index_zero() {
    // The table has no reserved slot, so index 0 is a real candidate.
    let table = table_of(&[TdKind::Int32; 4]);
    let unused = heap::unused_ranges(&table, &[]);
    assert!(unused.contains(0));
    assert_eq!(unused.ranges(), &[IndexRange::new(0, 3)]);
}

#[test]
fn claim_sources_may_be_owned_strings() {
    let table = table_of(&[TdKind::Int32; 4]);
    let source = String::from("connector pane");
    let claim = Claim::new(source, TableRange { shift: 0, count: 2 });
    assert_eq!(heap::unused_ranges(&table, &[claim]).total_len(), 2);
}

// ── Shape matching ────────────────────────────────────────────────────────────

#[test]
fn boolean_pair_requires_same_pool_entry() {
    // Two tops sharing one flat entry match; two distinct booleans do not.
    let mut shared = TypeDescTable::new();
    let flat = shared.append_flat(TypeDesc::simple(TdKind::Boolean), true);
    shared.add_top_level(flat);
    shared.add_top_level(flat);
    let repair = heap::reconstruct(&shared, &[]);
    assert_eq!(repair.matches.len(), 1);
    assert_eq!(repair.matches[0].shape, DcoShape::Boolean);
    assert!(repair.leftovers.is_empty());

    let mut distinct = TypeDescTable::new();
    let a = distinct.append_flat(TypeDesc::simple(TdKind::Boolean), false);
    let b = distinct.append_flat(TypeDesc::simple(TdKind::Boolean), false);
    distinct.add_top_level(a);
    distinct.add_top_level(b);
    let repair = heap::reconstruct(&distinct, &[]);
    assert!(repair.matches.is_empty());
    assert_eq!(repair.leftovers, vec![0, 1]);
}

#[test]
fn boolean_then_cluster_both_match() {
    let mut table = TypeDescTable::new();
    let boolean = table.append_flat(TypeDesc::simple(TdKind::Boolean), true);
    table.add_top_level(boolean);
    table.add_top_level(boolean);

    let int32 = table.append_flat(TypeDesc::simple(TdKind::Int32), false);
    let float64 = table.append_flat(TypeDesc::simple(TdKind::Float64), false);
    let mut cluster_td = TypeDesc::simple(TdKind::Cluster);
    cluster_td.children = vec![int32, float64];
    let cluster = table.append_flat(cluster_td, false);
    // Cluster pair, then one slot per member in order.
    table.add_top_level(cluster);
    table.add_top_level(cluster);
    table.add_top_level(int32);
    table.add_top_level(float64);

    let repair = heap::reconstruct(&table, &[]);
    assert_eq!(repair.matches.len(), 2);
    assert_eq!(repair.matches[0].shape, DcoShape::Boolean);
    assert_eq!(repair.matches[0].range, IndexRange::new(0, 1));
    assert_eq!(repair.matches[1].shape, DcoShape::Cluster);
    assert_eq!(repair.matches[1].range, IndexRange::new(2, 5));
    assert_eq!(repair.matches[1].dco_type_index, 2);
    assert_eq!(repair.matches[1].ddo_type_index, 3);
    assert_eq!(repair.matches[1].sub_type_indices, vec![4, 5]);
    assert!(repair.leftovers.is_empty());
}

#[test]
fn graph_wins_over_array_with_index() {
    // Array, Array, then four numerics: one graph, not array+leftovers.
    let table = table_of(&[
        TdKind::Array, TdKind::Array,
        TdKind::Int32, TdKind::Int32, TdKind::Int32, TdKind::Int32,
    ]);
    let repair = heap::reconstruct(&table, &[]);
    assert_eq!(repair.matches.len(), 1);
    assert_eq!(repair.matches[0].shape, DcoShape::Graph);
    assert!(repair.leftovers.is_empty());
}

#[test]
fn array_with_index_when_graph_cannot_fit() {
    let table = table_of(&[TdKind::Array, TdKind::Array, TdKind::Int32, TdKind::Int32]);
    let repair = heap::reconstruct(&table, &[]);
    assert_eq!(repair.matches.len(), 1);
    assert_eq!(repair.matches[0].shape, DcoShape::ArrayWithIndex);
}

#[test]
fn unexplained_indices_are_reported_not_dropped() {
    let table = table_of(&[TdKind::String, TdKind::Int32, TdKind::Int32]);
    let repair = heap::reconstruct(&table, &[]);
    // Lone string slot cannot pair; the numeric pair behind it still matches.
    assert_eq!(repair.leftovers, vec![0]);
    assert_eq!(repair.matches.len(), 1);
    assert_eq!(repair.matches[0].shape, DcoShape::Numeric);
}

#[test]
fn matching_is_deterministic() {
    let table = table_of(&[
        TdKind::String, TdKind::String,
        TdKind::Path, TdKind::Path,
        TdKind::Refnum, TdKind::Refnum,
    ]);
    let first = heap::reconstruct(&table, &[]);
    let second = heap::reconstruct(&table, &[]);
    assert_eq!(first.matches, second.matches);
    assert_eq!(first.leftovers, second.leftovers);
    let shapes: Vec<DcoShape> = first.matches.iter().map(|m| m.shape).collect();
    assert_eq!(shapes, vec![DcoShape::String, DcoShape::Path, DcoShape::TypedRefnum]);
}

// ── Uid repair ────────────────────────────────────────────────────────────────

fn elem(tag: &str) -> Element {
    Element::new(tag)
}

fn with_uid(tag: &str, uid: u32) -> Element {
    let mut e = elem(tag);
    e.set_attr("uid", uid.to_string());
    e
}

fn with_ref(tag: &str, target: u32) -> Element {
    let mut e = elem(tag);
    e.set_attr("ref", target.to_string());
    e
}

#[test]
fn duplicate_uids_get_smallest_unused() {
    let mut root = elem("Heap");
    root.push(with_uid("Control", 1));
    root.push(with_uid("Control", 3));
    root.push(with_uid("Control", 3));

    let (reassigned, pruned) = heap::repair_uids(&mut root);
    assert_eq!(reassigned, 1);
    assert_eq!(pruned, 0);
    let uids: Vec<&str> = root.children.iter().filter_map(|c| c.attr("uid")).collect();
    assert_eq!(uids, vec!["1", "3", "2"]);
}

#[test]
fn connection_refs_keep_their_mirrored_uid() {
    let mut root = elem("Heap");
    root.push(with_uid("Control", 5));
    root.push(with_uid("ConnectionRef", 5));

    let (reassigned, _) = heap::repair_uids(&mut root);
    assert_eq!(reassigned, 0);
    assert_eq!(root.children[1].attr("uid"), Some("5"));
}

#[test]
fn dangling_refs_prune_the_list_member() {
    let mut root = elem("Heap");
    root.push(with_uid("Control", 1));
    let mut list = elem("WireList");
    let mut ok_member = elem("Wire");
    ok_member.push(with_ref("Terminal", 1));
    list.push(ok_member);
    let mut bad_member = elem("Wire");
    bad_member.push(with_ref("Terminal", 42)); // declared nowhere
    list.push(bad_member);
    root.push(list);

    let pruned = heap::prune_dangling_refs(&mut root);
    assert_eq!(pruned, 1);
    let list = root.children.iter().find(|c| c.tag == "WireList").unwrap();
    assert_eq!(list.children.len(), 1);
}

#[test]
fn nested_lists_prune_only_the_inner_member() {
    // The dangling reference sits inside an inner list, so only that
    // list's member goes; the node in the outer list keeps its valid ref.
    let mut root = elem("Heap");
    root.push(with_uid("Control", 1));
    let mut outer = elem("NodeList");
    let mut node = elem("Node");
    node.push(with_ref("Terminal", 1));
    let mut inner = elem("TermList");
    inner.push(with_ref("Term", 99)); // declared nowhere
    node.push(inner);
    outer.push(node);
    root.push(outer);

    let pruned = heap::prune_dangling_refs(&mut root);
    assert_eq!(pruned, 1);
    let outer = root.children.iter().find(|c| c.tag == "NodeList").unwrap();
    assert_eq!(outer.children.len(), 1);
    let node = &outer.children[0];
    assert_eq!(node.children.iter().filter(|c| c.tag == "Terminal").count(), 1);
    assert!(node.children.iter().find(|c| c.tag == "TermList").unwrap().children.is_empty());
}

#[test]
fn dangling_ref_outside_any_list_is_cleared() {
    // No list boundary above the reference, so there is no member to
    // drop; the attribute itself goes and the element stays.
    let mut root = elem("Heap");
    root.push(with_uid("Control", 1));
    root.push(with_ref("DefaultTarget", 77));

    let pruned = heap::prune_dangling_refs(&mut root);
    assert_eq!(pruned, 1);
    let target = root.children.iter().find(|c| c.tag == "DefaultTarget").unwrap();
    assert_eq!(target.attr("ref"), None);

    // A valid reference in the same position is untouched.
    let mut root = elem("Heap");
    root.push(with_uid("Control", 1));
    root.push(with_ref("DefaultTarget", 1));
    assert_eq!(heap::prune_dangling_refs(&mut root), 0);
    assert_eq!(root.children[1].attr("ref"), Some("1"));
}

#[test]
fn pruning_cascades_to_a_fixed_point() {
    // Removing the member declaring uid 2 leaves a second member dangling.
    let mut root = elem("Heap");
    root.push(with_uid("Control", 1));
    let mut list = elem("NodeList");
    let mut first = with_uid("Node", 2);
    first.push(with_ref("Terminal", 77));
    list.push(first);
    let mut second = elem("Node");
    second.push(with_ref("Terminal", 2));
    list.push(second);
    root.push(list);

    let pruned = heap::prune_dangling_refs(&mut root);
    assert_eq!(pruned, 2);
    assert!(root.children.iter().find(|c| c.tag == "NodeList").unwrap().children.is_empty());
}

#[test]
fn uid_repair_is_idempotent() {
    let mut root = elem("Heap");
    root.push(with_uid("Control", 2));
    root.push(with_uid("Control", 2));
    let mut list = elem("WireList");
    let mut member = elem("Wire");
    member.push(with_ref("Terminal", 9));
    list.push(member);
    root.push(list);

    heap::repair_uids(&mut root);
    let snapshot = root.clone();
    let (reassigned, pruned) = heap::repair_uids(&mut root);
    assert_eq!((reassigned, pruned), (0, 0));
    assert_eq!(root, snapshot);
}
