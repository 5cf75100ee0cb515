//! Point quadtree over latitude/longitude, stored as a node arena.
//!
//! Nodes live in a `Vec` and refer to each other by `NodeId` handles. Freed
//! nodes go on a free list and are reused by the next split, so subdivision
//! and compaction are plain index bookkeeping.

use super::SpatialBackend;
use crate::compute::spatial::SearchCircle;
use crate::config::BackendKind;
use proxima_types::bbox::BoundingBox;
use proxima_types::entity::EntityId;
use proxima_types::geo::GeoPoint;

type NodeId = u32;

const ROOT: NodeId = 0;

#[derive(Debug)]
enum NodeKind {
    Leaf(Vec<(EntityId, GeoPoint)>),
    /// Children in quadrant order: south-west, south-east, north-west, north-east.
    Internal([NodeId; 4]),
}

#[derive(Debug)]
struct Node {
    bounds: BoundingBox,
    depth: usize,
    /// Entities stored anywhere in this subtree.
    count: usize,
    kind: NodeKind,
}

impl Node {
    fn leaf(bounds: BoundingBox, depth: usize) -> Self {
        Self {
            bounds,
            depth,
            count: 0,
            kind: NodeKind::Leaf(Vec::new()),
        }
    }
}

/// Quadrant of `point` inside `bounds`.
///
/// A point exactly on a split line belongs to the lower (south or west)
/// child, so every point has exactly one home.
#[inline]
fn quadrant_of(bounds: &BoundingBox, point: &GeoPoint) -> usize {
    let center = bounds.center();
    let north = point.lat() > center.lat();
    let east = point.lon() > center.lon();
    ((north as usize) << 1) | east as usize
}

fn quadrants(bounds: &BoundingBox) -> [BoundingBox; 4] {
    let c = bounds.center();
    let (mid_lat, mid_lon) = (c.lat(), c.lon());
    [
        BoundingBox::new(bounds.min_lat, bounds.min_lon, mid_lat, mid_lon),
        BoundingBox::new(bounds.min_lat, mid_lon, mid_lat, bounds.max_lon),
        BoundingBox::new(mid_lat, bounds.min_lon, bounds.max_lat, mid_lon),
        BoundingBox::new(mid_lat, mid_lon, bounds.max_lat, bounds.max_lon),
    ]
}

/// Region quadtree rooted at the whole globe.
#[derive(Debug)]
pub struct QuadTree {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    capacity: usize,
    max_depth: usize,
}

impl QuadTree {
    /// Creates an empty tree.
    ///
    /// A leaf holding more than `capacity` points splits into four, unless it
    /// is already `max_depth` levels deep; such leaves simply grow, which is
    /// what keeps many coincident points from recursing forever.
    pub fn new(capacity: usize, max_depth: usize) -> Self {
        Self {
            nodes: vec![Node::leaf(BoundingBox::world(), 0)],
            free: Vec::new(),
            capacity: capacity.max(1),
            max_depth,
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id as usize] = node;
                id
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as NodeId
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        let node = &mut self.nodes[id as usize];
        node.count = 0;
        node.kind = NodeKind::Leaf(Vec::new());
        self.free.push(id);
    }

    #[inline]
    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    /// Splits an overfull leaf and redistributes its points. Recurses only
    /// into children that are themselves overfull, so the work is bounded by
    /// the leaf size times the remaining depth.
    fn split(&mut self, id: NodeId) {
        let (bounds, depth) = {
            let node = self.node(id);
            (node.bounds, node.depth)
        };
        if depth >= self.max_depth {
            return;
        }
        let entries = match &mut self.node_mut(id).kind {
            NodeKind::Leaf(entries) => std::mem::take(entries),
            NodeKind::Internal(_) => return,
        };

        let children = quadrants(&bounds).map(|b| self.alloc(Node::leaf(b, depth + 1)));
        for (entity, point) in entries {
            let child = self.node_mut(children[quadrant_of(&bounds, &point)]);
            child.count += 1;
            if let NodeKind::Leaf(items) = &mut child.kind {
                items.push((entity, point));
            }
        }
        self.node_mut(id).kind = NodeKind::Internal(children);

        for child in children {
            if self.node(child).count > self.capacity {
                self.split(child);
            }
        }
    }

    /// Folds the children of `id` back into it when they are all leaves and
    /// together hold no more than `capacity` points.
    fn try_merge(&mut self, id: NodeId) -> bool {
        let node = self.node(id);
        let NodeKind::Internal(children) = node.kind else {
            return false;
        };
        if node.count > self.capacity {
            return false;
        }
        let all_leaves = children
            .iter()
            .all(|&c| matches!(self.node(c).kind, NodeKind::Leaf(_)));
        if !all_leaves {
            return false;
        }

        let mut merged = Vec::with_capacity(node.count);
        for child in children {
            if let NodeKind::Leaf(items) = &mut self.node_mut(child).kind {
                merged.append(items);
            }
            self.release(child);
        }
        self.node_mut(id).kind = NodeKind::Leaf(merged);
        true
    }

    /// Depth of the deepest live node.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            deepest = deepest.max(node.depth);
            if let NodeKind::Internal(children) = node.kind {
                stack.extend(children);
            }
        }
        deepest
    }

    fn leaf_count(&self) -> usize {
        let mut leaves = 0;
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            match self.node(id).kind {
                NodeKind::Leaf(_) => leaves += 1,
                NodeKind::Internal(children) => stack.extend(children),
            }
        }
        leaves
    }
}

impl SpatialBackend for QuadTree {
    fn kind(&self) -> BackendKind {
        BackendKind::Quadtree
    }

    fn insert(&mut self, id: EntityId, point: GeoPoint) -> crate::error::Result<()> {
        let mut current = ROOT;
        loop {
            let node = self.node_mut(current);
            node.count += 1;
            match &mut node.kind {
                NodeKind::Internal(children) => {
                    current = children[quadrant_of(&node.bounds, &point)];
                }
                NodeKind::Leaf(items) => {
                    items.push((id, point));
                    break;
                }
            }
        }
        if self.node(current).count > self.capacity {
            self.split(current);
        }
        Ok(())
    }

    fn remove(&mut self, id: &EntityId, point: &GeoPoint) -> bool {
        let mut path = Vec::with_capacity(self.max_depth + 1);
        let mut current = ROOT;
        loop {
            path.push(current);
            let node = self.node(current);
            match &node.kind {
                NodeKind::Internal(children) => {
                    current = children[quadrant_of(&node.bounds, point)];
                }
                NodeKind::Leaf(_) => break,
            }
        }

        let removed = match &mut self.node_mut(current).kind {
            NodeKind::Leaf(items) => match items.iter().position(|(e, _)| e == id) {
                Some(pos) => {
                    items.swap_remove(pos);
                    true
                }
                None => false,
            },
            NodeKind::Internal(_) => false,
        };
        if !removed {
            return false;
        }

        for &node in &path {
            self.node_mut(node).count -= 1;
        }
        // Compact bottom-up; each merge may enable one at the parent.
        for &node in path.iter().rev().skip(1) {
            if !self.try_merge(node) {
                break;
            }
        }
        true
    }

    fn query_circle(&self, circle: &SearchCircle, out: &mut Vec<EntityId>) {
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.count == 0 || !circle.intersects_box(&node.bounds) {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf(items) => out.extend(items.iter().map(|(e, _)| e.clone())),
                NodeKind::Internal(children) => stack.extend(children),
            }
        }
    }

    fn query_bbox(&self, bbox: &BoundingBox, out: &mut Vec<EntityId>) {
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.count == 0 || !node.bounds.intersects(bbox) {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf(items) => out.extend(
                    items
                        .iter()
                        .filter(|(_, p)| bbox.contains(p))
                        .map(|(e, _)| e.clone()),
                ),
                NodeKind::Internal(children) => stack.extend(children),
            }
        }
    }

    fn len(&self) -> usize {
        self.node(ROOT).count
    }

    fn cell_count(&self) -> usize {
        self.leaf_count()
    }

    fn max_depth(&self) -> usize {
        self.depth()
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.nodes.push(Node::leaf(BoundingBox::world(), 0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EntityId {
        EntityId::new(s)
    }

    fn circle(lat: f64, lon: f64, radius_m: f64) -> SearchCircle {
        SearchCircle::new(GeoPoint::new(lat, lon), radius_m)
    }

    #[test]
    fn test_split_on_overflow() {
        let mut tree = QuadTree::new(4, 20);
        for i in 0..5 {
            tree.insert(id(&format!("e{i}")), GeoPoint::new(10.0 + i as f64, 10.0 + i as f64))
                .unwrap();
        }
        assert_eq!(tree.len(), 5);
        assert!(tree.depth() >= 1);
        assert!(tree.cell_count() >= 4);
    }

    #[test]
    fn test_boundary_point_goes_to_lower_child() {
        let bounds = BoundingBox::world();
        // Exactly on both split lines of the root.
        assert_eq!(quadrant_of(&bounds, &GeoPoint::new(0.0, 0.0)), 0);
        assert_eq!(quadrant_of(&bounds, &GeoPoint::new(0.0, 1.0)), 1);
        assert_eq!(quadrant_of(&bounds, &GeoPoint::new(1.0, 0.0)), 2);
        assert_eq!(quadrant_of(&bounds, &GeoPoint::new(1.0, 1.0)), 3);
    }

    #[test]
    fn test_boundary_points_not_duplicated() {
        let mut tree = QuadTree::new(1, 20);
        tree.insert(id("on-line"), GeoPoint::new(0.0, 0.0)).unwrap();
        tree.insert(id("ne"), GeoPoint::new(1.0, 1.0)).unwrap();
        tree.insert(id("sw"), GeoPoint::new(-1.0, -1.0)).unwrap();

        let mut out = Vec::new();
        tree.query_circle(&circle(0.0, 0.0, 500_000.0), &mut out);
        out.sort();
        assert_eq!(out, vec![id("ne"), id("on-line"), id("sw")]);
    }

    #[test]
    fn test_coincident_points_stop_at_max_depth() {
        let mut tree = QuadTree::new(2, 6);
        for i in 0..50 {
            tree.insert(id(&format!("same-{i}")), GeoPoint::new(37.0, -122.0))
                .unwrap();
        }
        assert_eq!(tree.len(), 50);
        assert_eq!(tree.depth(), 6);

        let mut out = Vec::new();
        tree.query_circle(&circle(37.0, -122.0, 100.0), &mut out);
        assert_eq!(out.len(), 50);
    }

    #[test]
    fn test_remove_compacts() {
        let mut tree = QuadTree::new(2, 20);
        let points: Vec<(EntityId, GeoPoint)> = (0..8)
            .map(|i| (id(&format!("p{i}")), GeoPoint::new(-40.0 + 10.0 * i as f64, 5.0 * i as f64)))
            .collect();
        for (e, p) in &points {
            tree.insert(e.clone(), *p).unwrap();
        }
        let cells_before = tree.cell_count();
        assert!(cells_before > 1);

        for (e, p) in points.iter().skip(1) {
            assert!(tree.remove(e, p));
        }
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.cell_count(), 1);
        assert_eq!(tree.depth(), 0);

        // Freed nodes are reused by the next split.
        let arena = tree.nodes.len();
        for (e, p) in points.iter().skip(1) {
            tree.insert(e.clone(), *p).unwrap();
        }
        assert_eq!(tree.nodes.len(), arena);
    }

    #[test]
    fn test_remove_missing() {
        let mut tree = QuadTree::new(4, 20);
        tree.insert(id("a"), GeoPoint::new(1.0, 1.0)).unwrap();
        assert!(!tree.remove(&id("b"), &GeoPoint::new(1.0, 1.0)));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_query_prunes_far_cells() {
        let mut tree = QuadTree::new(1, 20);
        tree.insert(id("sf"), GeoPoint::new(37.7764, -122.4172)).unwrap();
        tree.insert(id("nyc"), GeoPoint::new(40.7128, -74.0060)).unwrap();
        tree.insert(id("tokyo"), GeoPoint::new(35.6762, 139.6503)).unwrap();

        let mut out = Vec::new();
        tree.query_circle(&circle(37.7749, -122.4194, 2_000.0), &mut out);
        assert_eq!(out, vec![id("sf")]);
    }

    #[test]
    fn test_query_across_antimeridian() {
        let mut tree = QuadTree::new(1, 20);
        tree.insert(id("east"), GeoPoint::new(30.0, 179.9)).unwrap();
        tree.insert(id("west"), GeoPoint::new(30.0, -179.95)).unwrap();
        tree.insert(id("far"), GeoPoint::new(30.0, 0.0)).unwrap();

        let mut out = Vec::new();
        tree.query_circle(&circle(30.0, 179.99, 10_000.0), &mut out);
        out.sort();
        assert_eq!(out, vec![id("east"), id("west")]);
    }

    #[test]
    fn test_query_bbox() {
        let mut tree = QuadTree::new(2, 20);
        tree.insert(id("in"), GeoPoint::new(5.0, 5.0)).unwrap();
        tree.insert(id("edge"), GeoPoint::new(10.0, 10.0)).unwrap();
        tree.insert(id("out"), GeoPoint::new(20.0, 20.0)).unwrap();

        let mut out = Vec::new();
        tree.query_bbox(&BoundingBox::new(0.0, 0.0, 10.0, 10.0), &mut out);
        out.sort();
        assert_eq!(out, vec![id("edge"), id("in")]);
    }

    #[test]
    fn test_clear() {
        let mut tree = QuadTree::new(1, 20);
        tree.insert(id("a"), GeoPoint::new(1.0, 1.0)).unwrap();
        tree.insert(id("b"), GeoPoint::new(-1.0, -1.0)).unwrap();
        tree.clear();
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.cell_count(), 1);
    }
}
