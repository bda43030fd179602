//! Core handle types for circuit representation.

use std::fmt;

/// A unique identifier for a node in the circuit.
/// Node 0 is always ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    /// The ground node (always index 0).
    pub const GROUND: NodeId = NodeId(0);

    /// Check if this is the ground node.
    pub fn is_ground(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ground() {
            write!(f, "GND")
        } else {
            write!(f, "N{}", self.0)
        }
    }
}

/// Index of an element in the circuit's element list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub usize);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Voltage-source slot: an extra branch-current unknown in the MNA system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub usize);

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.0)
    }
}

/// Variable index in the full (unreduced) MNA unknown vector.
/// Can be either a node voltage or a branch current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarIndex {
    /// Node voltage variable
    Voltage(NodeId),
    /// Branch current variable (voltage sources)
    Current(BranchId),
}

impl VarIndex {
    /// Get the raw index into the full unknown vector, or `None` for ground.
    /// Node voltages come first (excluding ground), then branch currents.
    pub fn to_index(&self, num_nodes: usize) -> Option<usize> {
        match self {
            // Node 0 (ground) is not in the matrix
            VarIndex::Voltage(node) if node.is_ground() => None,
            VarIndex::Voltage(NodeId(n)) => Some(n - 1),
            VarIndex::Current(BranchId(b)) => Some((num_nodes - 1) + b),
        }
    }
}

impl From<NodeId> for VarIndex {
    fn from(node: NodeId) -> Self {
        VarIndex::Voltage(node)
    }
}

impl From<BranchId> for VarIndex {
    fn from(branch: BranchId) -> Self {
        VarIndex::Current(branch)
    }
}
