//! Bounding-box spatial indexes
//!
//! The index is the filter step of every spatial query: it maps record ids
//! to bounding boxes and answers box-overlap and proximity questions with a
//! superset of the true answer. It never owns geometries.
//!
//! Two implementations sit behind [`SpatialIndex`]:
//! - [`RTree`], a Guttman R-tree with quadratic split and condense-on-delete
//! - [`RStarIndex`], an adapter over the `rstar` crate

use crate::error::{GeoStoreError, Result};
use crate::spatial::{BoundingBox, Point};
use crate::types::{Config, IndexBackend, RecordId};
use rstar::{Envelope, PointDistance, RTreeObject, AABB};
use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::trace;

/// A mutable mapping of record ids to bounding boxes.
///
/// Overlap is inclusive: boxes that share only an edge or a corner
/// intersect. Query results are deterministic for a fixed index state but
/// callers should not rely on any particular order from
/// [`SpatialIndex::query_intersecting`].
pub trait SpatialIndex: Send + Sync {
    /// Add an entry. Fails with `DuplicateId` if `id` is already indexed.
    fn insert(&mut self, id: RecordId, bbox: BoundingBox) -> Result<()>;

    /// Remove an entry, returning its box. Fails with `NotFound`.
    fn remove(&mut self, id: RecordId) -> Result<BoundingBox>;

    /// Replace the box of an existing entry, returning the old one.
    ///
    /// Fails with `NotFound` and leaves the index untouched when `id` is
    /// not indexed.
    fn update(&mut self, id: RecordId, bbox: BoundingBox) -> Result<BoundingBox> {
        let old = self.remove(id)?;
        self.insert(id, bbox)?;
        Ok(old)
    }

    /// The box currently indexed for `id`.
    fn get(&self, id: RecordId) -> Option<BoundingBox>;

    /// Every id whose box overlaps `bbox`.
    fn query_intersecting(&self, bbox: &BoundingBox) -> Vec<RecordId>;

    /// Every id whose box lies within `max_distance` (planar, coordinate
    /// units) of `point`, nearest first, ties by ascending id.
    fn query_nearest(&self, point: &Point, max_distance: f64) -> Vec<RecordId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All indexed ids in ascending order.
    fn ids(&self) -> Vec<RecordId>;
}

/// Create the index selected by `config`.
pub fn new_index(config: &Config) -> Result<Box<dyn SpatialIndex>> {
    config.validate()?;
    Ok(match config.index_backend {
        IndexBackend::RTree => Box::new(RTree::with_params(RTreeParams::from_config(config)?)),
        IndexBackend::RStar => Box::new(RStarIndex::new()),
    })
}

/// Branching parameters of the native R-tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RTreeParams {
    /// Nodes holding more than this many entries split
    pub max_entries: usize,
    /// Non-root nodes holding fewer than this many entries are dissolved
    pub min_entries: usize,
}

impl RTreeParams {
    pub fn new(min_entries: usize, max_entries: usize) -> Result<Self> {
        Config::default()
            .with_node_capacity(min_entries, max_entries)
            .validate()?;
        Ok(Self {
            max_entries,
            min_entries,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.min_node_entries, config.max_node_entries)
    }
}

impl Default for RTreeParams {
    fn default() -> Self {
        Self {
            max_entries: 8,
            min_entries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Entry {
    id: RecordId,
    bbox: BoundingBox,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        bbox: BoundingBox,
        entries: Vec<Entry>,
    },
    Internal {
        bbox: BoundingBox,
        children: Vec<Node>,
    },
}

trait Bounded {
    fn bounds(&self) -> BoundingBox;
}

impl Bounded for Entry {
    fn bounds(&self) -> BoundingBox {
        self.bbox
    }
}

impl Bounded for Node {
    fn bounds(&self) -> BoundingBox {
        match self {
            Node::Leaf { bbox, .. } | Node::Internal { bbox, .. } => *bbox,
        }
    }
}

/// Union of the boxes of a non-empty slice.
fn bounds_of<T: Bounded>(items: &[T]) -> BoundingBox {
    let first = items[0].bounds();
    items[1..]
        .iter()
        .fold(first, |acc, item| acc.union(&item.bounds()))
}

impl Node {
    fn leaf(entries: Vec<Entry>) -> Self {
        Node::Leaf {
            bbox: bounds_of(&entries),
            entries,
        }
    }

    fn internal(children: Vec<Node>) -> Self {
        Node::Internal {
            bbox: bounds_of(&children),
            children,
        }
    }

    fn len(&self) -> usize {
        match self {
            Node::Leaf { entries, .. } => entries.len(),
            Node::Internal { children, .. } => children.len(),
        }
    }

    fn collect_entries(self, out: &mut Vec<Entry>) {
        match self {
            Node::Leaf { entries, .. } => out.extend(entries),
            Node::Internal { children, .. } => {
                for child in children {
                    child.collect_entries(out);
                }
            }
        }
    }
}

/// Growth of `base` when `added` is merged in: area first, margin to break
/// ties between zero-area boxes.
fn enlargement(base: &BoundingBox, added: &BoundingBox) -> (f64, f64) {
    let merged = base.union(added);
    (
        merged.area() - base.area(),
        merged.margin() - base.margin(),
    )
}

fn cmp_pair(a: (f64, f64), b: (f64, f64)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1))
}

/// Index of the child needing the least enlargement to hold `bbox`.
fn choose_subtree(children: &[Node], bbox: &BoundingBox) -> usize {
    let mut best = 0;
    let mut best_cost = (f64::INFINITY, f64::INFINITY);
    let mut best_area = f64::INFINITY;

    for (i, child) in children.iter().enumerate() {
        let child_box = child.bounds();
        let cost = enlargement(&child_box, bbox);
        let area = child_box.area();
        let better = match cmp_pair(cost, best_cost) {
            Ordering::Less => true,
            Ordering::Equal => area < best_area,
            Ordering::Greater => false,
        };
        if better {
            best = i;
            best_cost = cost;
            best_area = area;
        }
    }

    best
}

/// Quadratic seed choice: the pair that would waste the most space if
/// grouped together.
fn pick_seeds<T: Bounded>(items: &[T]) -> (usize, usize) {
    let mut seeds = (0, 1);
    let mut worst = (f64::NEG_INFINITY, f64::NEG_INFINITY);

    for i in 0..items.len() {
        let a = items[i].bounds();
        for (j, item) in items.iter().enumerate().skip(i + 1) {
            let b = item.bounds();
            let merged = a.union(&b);
            let waste = (merged.area() - a.area() - b.area(), merged.margin());
            if cmp_pair(waste, worst) == Ordering::Greater {
                worst = waste;
                seeds = (i, j);
            }
        }
    }

    seeds
}

/// Guttman's quadratic split. Both halves end up with at least
/// `min_entries` items.
fn quadratic_split<T: Bounded>(mut items: Vec<T>, min_entries: usize) -> (Vec<T>, Vec<T>) {
    let (i, j) = pick_seeds(&items);
    let seed_b = items.swap_remove(j);
    let seed_a = items.swap_remove(i);

    let mut box_a = seed_a.bounds();
    let mut box_b = seed_b.bounds();
    let mut group_a = vec![seed_a];
    let mut group_b = vec![seed_b];

    while !items.is_empty() {
        if group_a.len() + items.len() <= min_entries {
            group_a.append(&mut items);
            break;
        }
        if group_b.len() + items.len() <= min_entries {
            group_b.append(&mut items);
            break;
        }

        // Pick the item with the strongest preference for one group.
        let mut next = 0;
        let mut strongest = f64::NEG_INFINITY;
        for (k, item) in items.iter().enumerate() {
            let bbox = item.bounds();
            let (da, _) = enlargement(&box_a, &bbox);
            let (db, _) = enlargement(&box_b, &bbox);
            let preference = (da - db).abs();
            if preference > strongest {
                strongest = preference;
                next = k;
            }
        }

        let item = items.swap_remove(next);
        let bbox = item.bounds();
        let to_a = match cmp_pair(enlargement(&box_a, &bbox), enlargement(&box_b, &bbox)) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => match box_a.area().total_cmp(&box_b.area()) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => group_a.len() <= group_b.len(),
            },
        };

        if to_a {
            box_a.expand(&bbox);
            group_a.push(item);
        } else {
            box_b.expand(&bbox);
            group_b.push(item);
        }
    }

    (group_a, group_b)
}

/// Insert below `node`; returns the new sibling when `node` split.
fn insert_into(node: &mut Node, entry: Entry, params: &RTreeParams) -> Option<Node> {
    match node {
        Node::Leaf { bbox, entries } => {
            bbox.expand(&entry.bbox);
            entries.push(entry);
            if entries.len() <= params.max_entries {
                return None;
            }

            let (keep, moved) = quadratic_split(std::mem::take(entries), params.min_entries);
            trace!(kept = keep.len(), moved = moved.len(), "split leaf node");
            *bbox = bounds_of(&keep);
            *entries = keep;
            Some(Node::leaf(moved))
        }
        Node::Internal { bbox, children } => {
            bbox.expand(&entry.bbox);
            let best = choose_subtree(children, &entry.bbox);
            if let Some(sibling) = insert_into(&mut children[best], entry, params) {
                children.push(sibling);
            }
            if children.len() <= params.max_entries {
                return None;
            }

            let (keep, moved) = quadratic_split(std::mem::take(children), params.min_entries);
            trace!(kept = keep.len(), moved = moved.len(), "split internal node");
            *bbox = bounds_of(&keep);
            *children = keep;
            Some(Node::internal(moved))
        }
    }
}

/// Remove `id` (indexed under `target`) below `node`. Underfull children are
/// dissolved and their entries pushed to `orphans` for reinsertion.
fn remove_from(
    node: &mut Node,
    id: RecordId,
    target: &BoundingBox,
    min_entries: usize,
    orphans: &mut Vec<Entry>,
) -> bool {
    match node {
        Node::Leaf { bbox, entries } => match entries.iter().position(|e| e.id == id) {
            Some(pos) => {
                entries.remove(pos);
                if !entries.is_empty() {
                    *bbox = bounds_of(entries);
                }
                true
            }
            None => false,
        },
        Node::Internal { bbox, children } => {
            for k in 0..children.len() {
                if !children[k].bounds().contains_box(target) {
                    continue;
                }
                if remove_from(&mut children[k], id, target, min_entries, orphans) {
                    if children[k].len() < min_entries {
                        let dissolved = children.remove(k);
                        trace!(entries = dissolved.len(), "condensing underfull node");
                        dissolved.collect_entries(orphans);
                    }
                    if !children.is_empty() {
                        *bbox = bounds_of(children);
                    }
                    return true;
                }
            }
            false
        }
    }
}

/// Shape summary of an [`RTree`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub depth: usize,
    pub node_count: usize,
    pub leaf_count: usize,
    pub entry_count: usize,
}

/// Guttman R-tree over record bounding boxes.
///
/// Inserts descend along least enlargement and split overflowing nodes with
/// the quadratic heuristic. Deletes locate the leaf through boxes that
/// contain the entry's box, then dissolve underfull nodes on the way back up
/// and reinsert their entries, so every leaf stays at the same depth.
///
/// # Examples
///
/// ```rust
/// use geostore::{BoundingBox, Point};
/// use geostore::index::{RTree, SpatialIndex};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut tree = RTree::new();
/// tree.insert(1, BoundingBox::new(0.0, 0.0, 1.0, 1.0))?;
/// tree.insert(2, BoundingBox::from_point(&Point::new(5.0, 5.0)))?;
///
/// let hits = tree.query_intersecting(&BoundingBox::new(0.5, 0.5, 2.0, 2.0));
/// assert_eq!(hits, vec![1]);
///
/// tree.remove(1)?;
/// assert!(tree.query_intersecting(&BoundingBox::new(0.0, 0.0, 1.0, 1.0)).is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RTree {
    root: Option<Node>,
    boxes: FxHashMap<RecordId, BoundingBox>,
    params: RTreeParams,
}

impl RTree {
    pub fn new() -> Self {
        Self::with_params(RTreeParams::default())
    }

    pub fn with_params(params: RTreeParams) -> Self {
        Self {
            root: None,
            boxes: FxHashMap::default(),
            params,
        }
    }

    pub fn params(&self) -> RTreeParams {
        self.params
    }

    fn insert_entry(&mut self, entry: Entry) {
        let sibling = match &mut self.root {
            Some(root) => insert_into(root, entry, &self.params),
            None => {
                self.root = Some(Node::leaf(vec![entry]));
                return;
            }
        };

        if let Some(sibling) = sibling {
            if let Some(old_root) = self.root.take() {
                trace!("root split, tree grows by one level");
                self.root = Some(Node::internal(vec![old_root, sibling]));
            }
        }
    }

    /// Drop empty roots and single-child internal roots.
    fn shorten_root(&mut self) {
        loop {
            match self.root.take() {
                Some(Node::Leaf { entries, .. }) if entries.is_empty() => return,
                Some(Node::Internal { children, .. }) if children.is_empty() => return,
                Some(Node::Internal { mut children, .. }) if children.len() == 1 => {
                    self.root = children.pop();
                }
                other => {
                    self.root = other;
                    return;
                }
            }
        }
    }

    pub fn stats(&self) -> TreeStats {
        fn walk(node: &Node, level: usize, stats: &mut TreeStats) {
            stats.node_count += 1;
            stats.depth = stats.depth.max(level);
            match node {
                Node::Leaf { entries, .. } => {
                    stats.leaf_count += 1;
                    stats.entry_count += entries.len();
                }
                Node::Internal { children, .. } => {
                    for child in children {
                        walk(child, level + 1, stats);
                    }
                }
            }
        }

        let mut stats = TreeStats::default();
        if let Some(root) = &self.root {
            walk(root, 1, &mut stats);
        }
        stats
    }

    /// Verify structural invariants: every node box is exactly the union of
    /// its children, all leaves sit at one depth, non-root fill stays within
    /// `[min_entries, max_entries]`, and the leaf entries match the id map.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        fn walk(
            node: &Node,
            level: usize,
            is_root: bool,
            params: &RTreeParams,
            leaf_depth: &mut Option<usize>,
            seen: &mut Vec<Entry>,
        ) -> std::result::Result<(), String> {
            let len = node.len();
            if len > params.max_entries {
                return Err(format!("node at level {} overflows with {}", level, len));
            }
            if !is_root && len < params.min_entries {
                return Err(format!("node at level {} underfull with {}", level, len));
            }
            if len == 0 {
                return Err(format!("empty node at level {}", level));
            }

            match node {
                Node::Leaf { bbox, entries } => {
                    if *bbox != bounds_of(entries) {
                        return Err(format!("stale leaf box at level {}", level));
                    }
                    match *leaf_depth {
                        Some(depth) if depth != level => {
                            return Err(format!("leaf at level {} but expected {}", level, depth));
                        }
                        Some(_) => {}
                        None => *leaf_depth = Some(level),
                    }
                    seen.extend(entries.iter().copied());
                }
                Node::Internal { bbox, children } => {
                    if *bbox != bounds_of(children) {
                        return Err(format!("stale internal box at level {}", level));
                    }
                    for child in children {
                        walk(child, level + 1, false, params, leaf_depth, seen)?;
                    }
                }
            }
            Ok(())
        }

        let mut seen = Vec::new();
        if let Some(root) = &self.root {
            walk(root, 1, true, &self.params, &mut None, &mut seen)?;
        }

        if seen.len() != self.boxes.len() {
            return Err(format!(
                "tree holds {} entries but {} ids are registered",
                seen.len(),
                self.boxes.len()
            ));
        }
        for entry in &seen {
            if self.boxes.get(&entry.id) != Some(&entry.bbox) {
                return Err(format!("entry {} does not match its registered box", entry.id));
            }
        }
        Ok(())
    }
}

impl Default for RTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-first search item; a min-heap on distance where subtrees pop before
/// entries at equal distance and entries pop in id order.
struct Candidate<'a> {
    distance: f64,
    item: Reached<'a>,
}

enum Reached<'a> {
    Node(&'a Node),
    Entry(RecordId),
}

impl Candidate<'_> {
    fn rank(&self) -> (u8, RecordId) {
        match self.item {
            Reached::Node(_) => (0, 0),
            Reached::Entry(id) => (1, id),
        }
    }
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the smallest first.
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.rank().cmp(&self.rank()))
    }
}

impl SpatialIndex for RTree {
    fn insert(&mut self, id: RecordId, bbox: BoundingBox) -> Result<()> {
        if self.boxes.contains_key(&id) {
            return Err(GeoStoreError::DuplicateId(id));
        }
        self.boxes.insert(id, bbox);
        self.insert_entry(Entry { id, bbox });
        Ok(())
    }

    fn remove(&mut self, id: RecordId) -> Result<BoundingBox> {
        let target = *self.boxes.get(&id).ok_or(GeoStoreError::NotFound(id))?;

        let mut orphans = Vec::new();
        let removed = match &mut self.root {
            Some(root) => remove_from(root, id, &target, self.params.min_entries, &mut orphans),
            None => false,
        };
        if !removed {
            return Err(GeoStoreError::NotFound(id));
        }

        self.boxes.remove(&id);
        self.shorten_root();
        for entry in orphans {
            self.insert_entry(entry);
        }
        Ok(target)
    }

    fn get(&self, id: RecordId) -> Option<BoundingBox> {
        self.boxes.get(&id).copied()
    }

    fn query_intersecting(&self, bbox: &BoundingBox) -> Vec<RecordId> {
        let mut results = Vec::new();
        let root = match &self.root {
            Some(root) if root.bounds().intersects(bbox) => root,
            _ => return results,
        };

        let mut stack: SmallVec<[&Node; 32]> = smallvec![root];
        while let Some(node) = stack.pop() {
            match node {
                Node::Leaf { entries, .. } => results.extend(
                    entries
                        .iter()
                        .filter(|e| e.bbox.intersects(bbox))
                        .map(|e| e.id),
                ),
                Node::Internal { children, .. } => stack.extend(
                    children
                        .iter()
                        .rev()
                        .filter(|child| child.bounds().intersects(bbox)),
                ),
            }
        }

        results
    }

    fn query_nearest(&self, point: &Point, max_distance: f64) -> Vec<RecordId> {
        let mut results = Vec::new();
        let Some(root) = &self.root else {
            return results;
        };

        let mut heap = BinaryHeap::new();
        let root_distance = root.bounds().distance_to_point(point);
        if root_distance <= max_distance {
            heap.push(Candidate {
                distance: root_distance,
                item: Reached::Node(root),
            });
        }

        while let Some(candidate) = heap.pop() {
            match candidate.item {
                Reached::Entry(id) => results.push(id),
                Reached::Node(Node::Leaf { entries, .. }) => {
                    for entry in entries {
                        let distance = entry.bbox.distance_to_point(point);
                        if distance <= max_distance {
                            heap.push(Candidate {
                                distance,
                                item: Reached::Entry(entry.id),
                            });
                        }
                    }
                }
                Reached::Node(Node::Internal { children, .. }) => {
                    for child in children {
                        let distance = child.bounds().distance_to_point(point);
                        if distance <= max_distance {
                            heap.push(Candidate {
                                distance,
                                item: Reached::Node(child),
                            });
                        }
                    }
                }
            }
        }

        results
    }

    fn len(&self) -> usize {
        self.boxes.len()
    }

    fn ids(&self) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self.boxes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// A record box stored in the `rstar` tree
#[derive(Debug, Clone, PartialEq)]
struct IndexedBox {
    id: RecordId,
    envelope: AABB<[f64; 2]>,
}

impl IndexedBox {
    fn new(id: RecordId, bbox: &BoundingBox) -> Self {
        Self {
            id,
            envelope: to_aabb(bbox),
        }
    }
}

fn to_aabb(bbox: &BoundingBox) -> AABB<[f64; 2]> {
    AABB::from_corners([bbox.min_x, bbox.min_y], [bbox.max_x, bbox.max_y])
}

impl RTreeObject for IndexedBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl PointDistance for IndexedBox {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        self.envelope.distance_2(point)
    }
}

/// [`SpatialIndex`] backed by the `rstar` crate's R*-tree.
pub struct RStarIndex {
    tree: rstar::RTree<IndexedBox>,
    boxes: FxHashMap<RecordId, BoundingBox>,
}

impl RStarIndex {
    pub fn new() -> Self {
        Self {
            tree: rstar::RTree::new(),
            boxes: FxHashMap::default(),
        }
    }
}

impl Default for RStarIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialIndex for RStarIndex {
    fn insert(&mut self, id: RecordId, bbox: BoundingBox) -> Result<()> {
        if self.boxes.contains_key(&id) {
            return Err(GeoStoreError::DuplicateId(id));
        }
        self.tree.insert(IndexedBox::new(id, &bbox));
        self.boxes.insert(id, bbox);
        Ok(())
    }

    fn remove(&mut self, id: RecordId) -> Result<BoundingBox> {
        let bbox = *self.boxes.get(&id).ok_or(GeoStoreError::NotFound(id))?;
        self.tree
            .remove(&IndexedBox::new(id, &bbox))
            .ok_or(GeoStoreError::NotFound(id))?;
        self.boxes.remove(&id);
        Ok(bbox)
    }

    fn get(&self, id: RecordId) -> Option<BoundingBox> {
        self.boxes.get(&id).copied()
    }

    fn query_intersecting(&self, bbox: &BoundingBox) -> Vec<RecordId> {
        self.tree
            .locate_in_envelope_intersecting(&to_aabb(bbox))
            .map(|item| item.id)
            .collect()
    }

    fn query_nearest(&self, point: &Point, max_distance: f64) -> Vec<RecordId> {
        let max_distance_2 = max_distance * max_distance;
        let mut hits: Vec<(RecordId, f64)> = self
            .tree
            .nearest_neighbor_iter_with_distance_2(&[point.x, point.y])
            .take_while(|(_, distance_2)| *distance_2 <= max_distance_2)
            .map(|(item, distance_2)| (item.id, distance_2))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits.into_iter().map(|(id, _)| id).collect()
    }

    fn len(&self) -> usize {
        self.boxes.len()
    }

    fn ids(&self) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self.boxes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
