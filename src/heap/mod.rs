//! Heap reconstruction: recover front-panel structure that only survives
//! implicitly in the shared type table.
//!
//! The save format stores each panel object (DCO) as a small run of
//! consecutive top-level type entries, but never stores the runs
//! themselves.  Reconstruction works by elimination:
//!
//! 1. start from the full top-level index range,
//! 2. subtract every range claimed by a section that records its claims
//!    explicitly (the claim sources are named and individually toggleable
//!    for diagnosis),
//! 3. greedily match known DCO shapes against what is left, most specific
//!    shape first,
//! 4. report the indices no shape explains — they are diagnostic output,
//!    never an error.
//!
//! The matcher is deterministic: same table and claims, same matches.
//!
//! The second half of this module is uid repair on the mirror tree:
//! duplicate uids are reassigned to the smallest unused value and elements
//! referencing a uid that exists nowhere are pruned at the nearest
//! enclosing list-element boundary.  Both passes are idempotent.

use std::borrow::Cow;
use std::collections::BTreeSet;

use log::{debug, info, warn};

use crate::tree::Element;
use crate::typedesc::{TableRange, TdKind, TypeDescTable};

// ── Inclusive index ranges ────────────────────────────────────────────────────

/// Inclusive range of top-level type indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    pub min: usize,
    pub max: usize,
}

impl IndexRange {
    pub fn new(min: usize, max: usize) -> Self {
        IndexRange { min, max }
    }

    pub fn len(&self) -> usize {
        self.max - self.min + 1
    }

    pub fn is_empty(&self) -> bool {
        false // inclusive: min==max is a one-element range
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.min <= idx && idx <= self.max
    }
}

/// Sorted, disjoint, non-adjacent set of inclusive ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<IndexRange>,
}

impl RangeSet {
    pub fn full(min: usize, max: usize) -> Self {
        if min > max {
            return RangeSet::default();
        }
        RangeSet { ranges: vec![IndexRange::new(min, max)] }
    }

    pub fn ranges(&self) -> &[IndexRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn total_len(&self) -> usize {
        self.ranges.iter().map(IndexRange::len).sum()
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.ranges.iter().any(|r| r.contains(idx))
    }

    pub fn iter_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.ranges.iter().flat_map(|r| r.min..=r.max)
    }

    /// Remove a single index, splitting its range if it falls inside.
    pub fn exclude_one(&mut self, idx: usize) {
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        for r in &self.ranges {
            if !r.contains(idx) {
                out.push(*r);
                continue;
            }
            if r.min < idx {
                out.push(IndexRange::new(r.min, idx - 1));
            }
            if idx < r.max {
                out.push(IndexRange::new(idx + 1, r.max));
            }
        }
        self.ranges = out;
    }

    /// Remove every index strictly below `idx`.
    pub fn exclude_below(&mut self, idx: usize) {
        let mut out = Vec::with_capacity(self.ranges.len());
        for r in &self.ranges {
            if r.max < idx {
                continue;
            }
            out.push(IndexRange::new(r.min.max(idx), r.max));
        }
        self.ranges = out;
    }

    /// Remove every index strictly between `lo` and `hi` (endpoints stay).
    pub fn exclude_between(&mut self, lo: usize, hi: usize) {
        if hi <= lo + 1 {
            return;
        }
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        for r in &self.ranges {
            if r.max <= lo || r.min >= hi {
                out.push(*r);
                continue;
            }
            if r.min <= lo {
                out.push(IndexRange::new(r.min, r.max.min(lo)));
            }
            if r.max >= hi {
                out.push(IndexRange::new(r.min.max(hi), r.max));
            }
        }
        self.ranges = out;
    }

    /// Remove a whole inclusive span.
    pub fn exclude_span(&mut self, min: usize, max: usize) {
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        for r in &self.ranges {
            if r.max < min || r.min > max {
                out.push(*r);
                continue;
            }
            if r.min < min {
                out.push(IndexRange::new(r.min, min - 1));
            }
            if r.max > max {
                out.push(IndexRange::new(max + 1, r.max));
            }
        }
        self.ranges = out;
    }
}

// ── Claim sources ─────────────────────────────────────────────────────────────

/// One section's explicit claim over a run of top-level indices.
#[derive(Debug, Clone)]
pub struct Claim {
    pub source:  Cow<'static, str>,
    pub range:   TableRange,
    pub enabled: bool,
}

impl Claim {
    pub fn new(source: impl Into<Cow<'static, str>>, range: TableRange) -> Self {
        Claim { source: source.into(), range, enabled: true }
    }
}

/// Compute the indices no enabled claim covers.
pub fn unused_ranges(table: &TypeDescTable, claims: &[Claim]) -> RangeSet {
    if table.top_len() == 0 {
        return RangeSet::default();
    }
    let mut set = RangeSet::full(0, table.top_len() - 1);
    for claim in claims {
        if !claim.enabled {
            debug!("claim source {} disabled, {} indices stay candidate",
                claim.source, claim.range.count);
            continue;
        }
        if claim.range.count == 0 {
            continue;
        }
        set.exclude_span(claim.range.shift, claim.range.shift + claim.range.count - 1);
    }
    set
}

// ── DCO shape matching ────────────────────────────────────────────────────────

/// Known panel-object shapes, ordered most specific first.  Every shape
/// spans at least two slots (the control/indicator descriptor pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcoShape {
    /// Two array slots plus four numeric scale slots.
    Graph,
    /// Cluster pair followed by one slot per member.
    Cluster,
    /// Array pair plus a numeric index pair.
    ArrayWithIndex,
    TypedRefnum,
    Path,
    String,
    Boolean,
    Numeric,
}

impl DcoShape {
    pub fn name(self) -> &'static str {
        match self {
            DcoShape::Graph          => "Graph",
            DcoShape::Cluster        => "Cluster",
            DcoShape::ArrayWithIndex => "ArrayWithIndex",
            DcoShape::TypedRefnum    => "TypedRefnum",
            DcoShape::Path           => "Path",
            DcoShape::String         => "String",
            DcoShape::Boolean        => "Boolean",
            DcoShape::Numeric        => "Numeric",
        }
    }
}

/// Trial order.  Longer, more constrained shapes first so a graph is never
/// shredded into an array-with-index plus leftovers.
const SHAPE_ORDER: [DcoShape; 8] = [
    DcoShape::Graph,
    DcoShape::Cluster,
    DcoShape::ArrayWithIndex,
    DcoShape::TypedRefnum,
    DcoShape::Path,
    DcoShape::String,
    DcoShape::Boolean,
    DcoShape::Numeric,
];

/// One recognized panel object: the control descriptor slot, its data
/// display twin, and any trailing sub-object slots (array index pair,
/// cluster members, graph scales).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcoMatch {
    pub shape:            DcoShape,
    pub dco_type_index:   usize,
    pub ddo_type_index:   usize,
    pub sub_type_indices: Vec<usize>,
    pub range:            IndexRange,
}

fn kind_at(table: &TypeDescTable, idx: usize) -> Option<TdKind> {
    table.resolve_top(idx).ok().map(|td| td.kind)
}

/// Try one shape at `start` inside `range`; return the slot count on match.
fn try_shape(table: &TypeDescTable, range: &IndexRange, start: usize, shape: DcoShape) -> Option<usize> {
    let avail = range.max - start + 1;
    let k0 = kind_at(table, start)?;
    match shape {
        DcoShape::Boolean => {
            // Both slots point at the very same pool entry for booleans.
            (avail >= 2
                && k0 == TdKind::Boolean
                && table.flat_index_of_top(start).ok()? == table.flat_index_of_top(start + 1).ok()?)
            .then_some(2)
        }
        DcoShape::Numeric => {
            (avail >= 2 && k0.is_numeric() && kind_at(table, start + 1)? == k0).then_some(2)
        }
        DcoShape::String => {
            (avail >= 2 && k0 == TdKind::String && kind_at(table, start + 1)? == TdKind::String)
                .then_some(2)
        }
        DcoShape::Path => {
            (avail >= 2 && k0 == TdKind::Path && kind_at(table, start + 1)? == TdKind::Path)
                .then_some(2)
        }
        DcoShape::TypedRefnum => {
            (avail >= 2 && k0 == TdKind::Refnum && kind_at(table, start + 1)? == TdKind::Refnum)
                .then_some(2)
        }
        DcoShape::ArrayWithIndex => {
            (avail >= 4
                && k0 == TdKind::Array
                && kind_at(table, start + 1)? == TdKind::Array
                && kind_at(table, start + 2)?.is_numeric()
                && kind_at(table, start + 3)?.is_numeric())
            .then_some(4)
        }
        DcoShape::Graph => {
            if avail < 6 || k0 != TdKind::Array || kind_at(table, start + 1)? != TdKind::Array {
                return None;
            }
            for off in 2..6 {
                if !kind_at(table, start + off)?.is_numeric() {
                    return None;
                }
            }
            Some(6)
        }
        DcoShape::Cluster => {
            if avail < 3 || k0 != TdKind::Cluster || kind_at(table, start + 1)? != TdKind::Cluster {
                return None;
            }
            let members = table.resolve_top(start).ok()?.children.clone();
            if members.is_empty() || avail < 2 + members.len() {
                return None;
            }
            for (off, &member) in members.iter().enumerate() {
                let member_kind = table.resolve_flat(member).ok()?.kind;
                if kind_at(table, start + 2 + off)? != member_kind {
                    return None;
                }
            }
            Some(2 + members.len())
        }
    }
}

/// Result of one reconstruction pass.
#[derive(Debug, Clone, Default)]
pub struct HeapRepair {
    pub matches:   Vec<DcoMatch>,
    /// Indices no shape explains.  Diagnostic, not an error.
    pub leftovers: Vec<usize>,
}

/// Match DCO shapes over every index no claim covers.
///
/// Greedy left-to-right: at each candidate index the most specific shape
/// that fits wins, and its whole run is consumed before the scan resumes.
pub fn reconstruct(table: &TypeDescTable, claims: &[Claim]) -> HeapRepair {
    let unused = unused_ranges(table, claims);
    let mut repair = HeapRepair::default();
    for range in unused.ranges() {
        let mut idx = range.min;
        while idx <= range.max {
            let hit = SHAPE_ORDER
                .iter()
                .find_map(|&shape| try_shape(table, range, idx, shape).map(|n| (shape, n)));
            match hit {
                Some((shape, slots)) => {
                    repair.matches.push(DcoMatch {
                        shape,
                        dco_type_index:   idx,
                        ddo_type_index:   idx + 1,
                        sub_type_indices: (idx + 2..idx + slots).collect(),
                        range:            IndexRange::new(idx, idx + slots - 1),
                    });
                    idx += slots;
                }
                None => {
                    repair.leftovers.push(idx);
                    idx += 1;
                }
            }
        }
    }
    info!("heap reconstruction: {} objects matched, {} indices unexplained",
        repair.matches.len(), repair.leftovers.len());
    if !repair.leftovers.is_empty() {
        debug!("unexplained indices: {:?}", repair.leftovers);
    }
    repair
}

// ── Uid repair ────────────────────────────────────────────────────────────────

/// Elements whose uid mirrors another element's and must never be
/// reassigned: rewriting one side would silently break the pairing.
const UID_MIRROR_TAGS: [&str; 1] = ["ConnectionRef"];

fn is_mirror_tag(tag: &str) -> bool {
    UID_MIRROR_TAGS.contains(&tag)
}

fn collect_uids(elem: &Element, seen: &mut BTreeSet<u32>, dups: &mut Vec<u32>) {
    if let Some(uid) = uid_of(elem) {
        if !seen.insert(uid) {
            dups.push(uid);
        }
    }
    for child in &elem.children {
        collect_uids(child, seen, dups);
    }
}

fn uid_of(elem: &Element) -> Option<u32> {
    elem.attr("uid").and_then(|v| v.parse().ok())
}

fn smallest_unused(used: &BTreeSet<u32>) -> u32 {
    let mut candidate = 1u32;
    for &uid in used {
        if uid > candidate {
            break;
        }
        if uid == candidate {
            candidate += 1;
        }
    }
    candidate
}

fn reassign_duplicates(elem: &mut Element, seen: &mut BTreeSet<u32>, used: &mut BTreeSet<u32>) -> usize {
    let mut fixed = 0;
    if let Some(uid) = uid_of(elem) {
        if !seen.insert(uid) && !is_mirror_tag(&elem.tag) {
            let fresh = smallest_unused(used);
            used.insert(fresh);
            seen.insert(fresh);
            warn!("duplicate uid {uid} on <{}> reassigned to {fresh}", elem.tag);
            elem.set_attr("uid", fresh.to_string());
            fixed += 1;
        }
    }
    for child in &mut elem.children {
        fixed += reassign_duplicates(child, seen, used);
    }
    fixed
}

/// Reassign every duplicate uid (except on mirror tags) to the smallest
/// uid not used anywhere in the tree.  First declaration wins; references
/// keep pointing at it.
pub fn repair_duplicate_uids(root: &mut Element) -> usize {
    let mut used = BTreeSet::new();
    let mut dups = Vec::new();
    collect_uids(root, &mut used, &mut dups);
    if dups.is_empty() {
        return 0;
    }
    let mut seen = BTreeSet::new();
    reassign_duplicates(root, &mut seen, &mut used)
}

fn subtree_has_dangling(elem: &Element, declared: &BTreeSet<u32>) -> bool {
    if let Some(raw) = elem.attr("ref") {
        if let Ok(uid) = raw.parse::<u32>() {
            if !declared.contains(&uid) {
                return true;
            }
        }
    }
    elem.children.iter().any(|c| subtree_has_dangling(c, declared))
}

fn prune_list_members(elem: &mut Element, declared: &BTreeSet<u32>) -> usize {
    // Children first: a dangling reference inside a nested list must prune
    // that list's member, not the whole member of an enclosing list.
    let mut removed = 0;
    for child in &mut elem.children {
        removed += prune_list_members(child, declared);
    }
    if elem.tag.ends_with("List") {
        let before = elem.children.len();
        elem.children.retain(|c| {
            let drop = subtree_has_dangling(c, declared);
            if drop {
                warn!("pruning <{}> from <{}>: dangling uid reference", c.tag, elem.tag);
            }
            !drop
        });
        removed += before - elem.children.len();
    }
    removed
}

fn clear_unlisted_refs(elem: &mut Element, declared: &BTreeSet<u32>, under_list: bool) -> usize {
    let mut cleared = 0;
    if !under_list {
        if let Some(raw) = elem.attr("ref") {
            if raw.parse::<u32>().map_or(false, |uid| !declared.contains(&uid)) {
                warn!("clearing dangling ref {raw} on <{}>: no list boundary above", elem.tag);
                elem.remove_attr("ref");
                cleared += 1;
            }
        }
    }
    let child_under = under_list || elem.tag.ends_with("List");
    for child in &mut elem.children {
        cleared += clear_unlisted_refs(child, declared, child_under);
    }
    cleared
}

/// Remove list members whose subtree references a uid declared nowhere;
/// pruning stops at the nearest enclosing list, so siblings in outer lists
/// survive.  A dangling reference with no list boundary above it has its
/// `ref` attribute cleared instead, since there is no member to drop.
///
/// Pruning a member can delete declarations other members reference, so
/// the pass loops to a fixed point.  On a tree with no dangling references
/// it removes nothing, which also makes it idempotent.
pub fn prune_dangling_refs(root: &mut Element) -> usize {
    let mut total = 0;
    let declared = loop {
        let mut declared = BTreeSet::new();
        let mut dups = Vec::new();
        collect_uids(root, &mut declared, &mut dups);
        let removed = prune_list_members(root, &declared);
        total += removed;
        if removed == 0 {
            break declared;
        }
    };
    // Clearing an attribute never removes a declaration, so one pass is
    // enough once pruning has converged.
    total + clear_unlisted_refs(root, &declared, false)
}

/// Full uid repair: duplicate reassignment, then dangling-reference
/// pruning.  Returns (reassigned, pruned).
pub fn repair_uids(root: &mut Element) -> (usize, usize) {
    let reassigned = repair_duplicate_uids(root);
    let pruned = prune_dangling_refs(root);
    (reassigned, pruned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclude_one_splits() {
        let mut s = RangeSet::full(0, 9);
        s.exclude_one(4);
        assert_eq!(s.ranges(), &[IndexRange::new(0, 3), IndexRange::new(5, 9)]);
        assert_eq!(s.total_len(), 9);
    }

    #[test]
    fn exclude_below_trims() {
        let mut s = RangeSet::full(0, 9);
        s.exclude_below(5);
        assert_eq!(s.ranges(), &[IndexRange::new(5, 9)]);
    }

    #[test]
    fn exclude_between_keeps_endpoints() {
        let mut s = RangeSet::full(0, 9);
        s.exclude_between(2, 7);
        assert!(s.contains(2));
        assert!(s.contains(7));
        assert!(!s.contains(3));
        assert!(!s.contains(6));
    }

    #[test]
    fn exclude_between_adjacent_is_noop() {
        let mut s = RangeSet::full(0, 9);
        s.exclude_between(3, 4);
        assert_eq!(s.total_len(), 10);
    }

    #[test]
    fn smallest_unused_skips_taken() {
        let used: BTreeSet<u32> = [1, 2, 3, 5].into_iter().collect();
        assert_eq!(smallest_unused(&used), 4);
        let empty = BTreeSet::new();
        assert_eq!(smallest_unused(&empty), 1);
    }
}
