//! Broadphase spatial index: a fixed-bounds region quadtree.

use std::collections::HashMap;

use glam::vec2;
use hecs::Entity;

use crate::collider::Aabb;

/// Maximum tree depth; items at this depth nest no further.
const MAX_DEPTH: u32 = 4;

type NodeIndex = u32;

#[derive(Debug)]
struct Node {
    bounds: Aabb,
    /// Precomputed child bounds, one per quadrant.
    quadrants: [Aabb; 4],
    children: [Option<NodeIndex>; 4],
    items: Vec<(Entity, Aabb)>,
    /// Owning node and the quadrant slot this node occupies in it.
    parent: Option<(NodeIndex, usize)>,
    depth: u32,
}

impl Node {
    fn new(bounds: Aabb, parent: Option<(NodeIndex, usize)>, depth: u32) -> Self {
        let center = bounds.center();
        let quadrants = [
            Aabb::new(bounds.min, center),
            Aabb::new(vec2(center.x, bounds.min.y), vec2(bounds.max.x, center.y)),
            Aabb::new(vec2(bounds.min.x, center.y), vec2(center.x, bounds.max.y)),
            Aabb::new(center, bounds.max),
        ];
        Self {
            bounds,
            quadrants,
            children: [None; 4],
            items: Vec::new(),
            parent,
            depth,
        }
    }
}

/// Region quadtree over a fixed world box.
///
/// Items descend to the deepest node whose bounds fully contain them and are
/// tracked in a location map for O(1) removal. Empty leaf chains are pruned
/// bottom-up after removals.
pub struct QuadTree {
    nodes: Vec<Node>,
    free: Vec<NodeIndex>,
    locations: HashMap<Entity, (NodeIndex, usize)>,
}

impl QuadTree {
    pub fn new(bounds: Aabb) -> Self {
        Self {
            nodes: vec![Node::new(bounds, None, 0)],
            free: Vec::new(),
            locations: HashMap::new(),
        }
    }

    /// World box covered by the tree.
    pub fn bounds(&self) -> Aabb {
        self.nodes[0].bounds
    }

    /// Number of tracked items.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Whether `item` currently has a broadphase entry.
    pub fn contains(&self, item: Entity) -> bool {
        self.locations.contains_key(&item)
    }

    /// Insert an item keyed by its AABB. Returns false when the AABB is not
    /// contained by the tree bounds; the item is then not tracked at all.
    pub fn insert(&mut self, item: Entity, aabb: Aabb) -> bool {
        if !self.nodes[0].bounds.contains(&aabb) {
            return false;
        }

        let mut index: NodeIndex = 0;
        loop {
            let node = &self.nodes[index as usize];
            if node.depth >= MAX_DEPTH {
                break;
            }
            let Some(quadrant) = node.quadrants.iter().position(|q| q.contains(&aabb)) else {
                break;
            };
            index = match self.nodes[index as usize].children[quadrant] {
                Some(child) => child,
                None => self.alloc_child(index, quadrant),
            };
        }

        let node = &mut self.nodes[index as usize];
        self.locations.insert(item, (index, node.items.len()));
        node.items.push((item, aabb));
        true
    }

    /// Remove an item. Returns false if it was not tracked.
    pub fn remove(&mut self, item: Entity) -> bool {
        let Some((index, slot)) = self.locations.remove(&item) else {
            return false;
        };

        let items = &mut self.nodes[index as usize].items;
        items.swap_remove(slot);
        if slot < items.len() {
            let moved = items[slot].0;
            self.locations.insert(moved, (index, slot));
        }

        self.prune(index);
        true
    }

    /// Re-key an item after its AABB changed. Returns false when the new AABB
    /// falls outside the tree bounds (the item is dropped from the index).
    pub fn update(&mut self, item: Entity, aabb: Aabb) -> bool {
        self.remove(item);
        self.insert(item, aabb)
    }

    /// All items whose AABB intersects `aabb`.
    pub fn query(&self, aabb: &Aabb) -> Vec<Entity> {
        let mut out = Vec::new();
        self.query_node(0, aabb, &mut out);
        out
    }

    fn query_node(&self, index: NodeIndex, aabb: &Aabb, out: &mut Vec<Entity>) {
        let node = &self.nodes[index as usize];
        for (item, item_aabb) in &node.items {
            if item_aabb.intersects(aabb) {
                out.push(*item);
            }
        }
        for child in node.children.iter().flatten() {
            let child_bounds = self.nodes[*child as usize].bounds;
            if aabb.contains(&child_bounds) {
                self.collect_subtree(*child, out);
            } else if aabb.intersects(&child_bounds) {
                self.query_node(*child, aabb, out);
            }
        }
    }

    fn collect_subtree(&self, index: NodeIndex, out: &mut Vec<Entity>) {
        let node = &self.nodes[index as usize];
        out.extend(node.items.iter().map(|(item, _)| *item));
        for child in node.children.iter().flatten() {
            self.collect_subtree(*child, out);
        }
    }

    fn alloc_child(&mut self, parent: NodeIndex, quadrant: usize) -> NodeIndex {
        let bounds = self.nodes[parent as usize].quadrants[quadrant];
        let depth = self.nodes[parent as usize].depth + 1;
        let node = Node::new(bounds, Some((parent, quadrant)), depth);

        let index = match self.free.pop() {
            Some(index) => {
                self.nodes[index as usize] = node;
                index
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as NodeIndex
            }
        };
        self.nodes[parent as usize].children[quadrant] = Some(index);
        index
    }

    /// Release empty childless nodes, walking toward the root.
    fn prune(&mut self, mut index: NodeIndex) {
        loop {
            let node = &self.nodes[index as usize];
            if !node.items.is_empty() || node.children.iter().any(Option::is_some) {
                return;
            }
            let Some((parent, quadrant)) = node.parent else {
                return;
            };
            self.nodes[parent as usize].children[quadrant] = None;
            self.free.push(index);
            index = parent;
        }
    }

    #[cfg(test)]
    fn live_node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }
}
