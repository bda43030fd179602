//! Circuit validation.

use log::warn;

use super::types::{ElementId, NodeId};
use crate::devices::Element;
use crate::error::{Result, SimError};

/// Disjoint sets over node indices.
struct NodeSets {
    parent: Vec<usize>,
}

impl NodeSets {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    /// Merge two sets. Returns false if they were already joined.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        self.parent[rb] = ra;
        true
    }
}

/// Reject a loop made only of ideal voltage sources.
///
/// The element reported is the one that closes the loop.
pub fn check_voltage_source_loops(elements: &[Element]) -> Result<()> {
    let size = elements
        .iter()
        .flat_map(|e| e.as_device().terminals().iter().map(|n| n.0 + 1))
        .max()
        .unwrap_or(1);
    let mut sets = NodeSets::new(size);

    for (idx, element) in elements.iter().enumerate() {
        let device = element.as_device();
        if !device.is_voltage_source() {
            continue;
        }
        let [a, b] = match device.terminals() {
            [a, b] => [*a, *b],
            _ => continue,
        };
        if !sets.union(a.0, b.0) {
            return Err(SimError::VoltageSourceLoop {
                element: ElementId(idx),
                name: device.name().to_string(),
            });
        }
    }
    Ok(())
}

/// Find terminal nodes with no conduction path to ground.
///
/// One node of each floating group is returned; tying it to ground
/// anchors the whole group. Internal nodes are never considered.
pub fn find_floating_nodes(elements: &[Element], num_terminal_nodes: usize) -> Vec<NodeId> {
    let mut sets = NodeSets::new(num_terminal_nodes);

    for element in elements {
        let device = element.as_device();
        let terminals = device.terminals();
        for (i, a) in terminals.iter().enumerate() {
            if device.has_ground_connection(i) {
                sets.union(NodeId::GROUND.0, a.0);
            }
            for (j, b) in terminals.iter().enumerate().skip(i + 1) {
                if device.connects(i, j) {
                    sets.union(a.0, b.0);
                }
            }
        }
    }

    let mut ties = Vec::new();
    for node in 1..num_terminal_nodes {
        if sets.union(NodeId::GROUND.0, node) {
            warn!("node {} is not connected to ground, tying it with a 1e8 ohm resistor", NodeId(node));
            ties.push(NodeId(node));
        }
    }
    ties
}
