// id.rs — Stable identifiers for taps and accumulation-tree nodes
//
// IDs are allocated in declaration order (taps) and construction order
// (nodes), so every pass and every backend sees the same numbering and
// rendered temporaries are stable across runs.

use serde::Serialize;

/// Index of a tap within its stage (declared order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TapId(pub u32);

/// Index of a node in a stage's accumulation-tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

impl TapId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Allocator for stable IDs. Produces monotonically increasing IDs in
/// allocation order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_tap: u32,
    next_node: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_tap(&mut self) -> TapId {
        let id = TapId(self.next_tap);
        self.next_tap += 1;
        id
    }

    pub fn alloc_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_ordered() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.alloc_tap(), TapId(0));
        assert_eq!(alloc.alloc_tap(), TapId(1));
        assert_eq!(alloc.alloc_node(), NodeId(0));
        assert_eq!(alloc.alloc_node().index(), 1);
    }
}
