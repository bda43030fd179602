//! Committed node voltages and branch currents.

use crate::circuit::{BranchId, NodeId};

/// The values distributed by the last successful solve.
///
/// Voltages are indexed by node, ground included and always 0 V. Devices read
/// from here during sub-iterations and the host reads from here between steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Solution {
    voltages: Vec<f64>,
    branch_currents: Vec<f64>,
}

impl Solution {
    /// Create a zeroed solution.
    pub fn new(num_nodes: usize, num_branches: usize) -> Self {
        Self {
            voltages: vec![0.0; num_nodes],
            branch_currents: vec![0.0; num_branches],
        }
    }

    /// Voltage at a node (ground and unknown nodes read 0 V).
    pub fn voltage(&self, node: NodeId) -> f64 {
        self.voltages.get(node.0).copied().unwrap_or(0.0)
    }

    /// Current through a voltage-source slot.
    pub fn branch_current(&self, branch: BranchId) -> f64 {
        self.branch_currents.get(branch.0).copied().unwrap_or(0.0)
    }

    pub(crate) fn set_voltage(&mut self, node: NodeId, value: f64) {
        if !node.is_ground() {
            self.voltages[node.0] = value;
        }
    }

    pub(crate) fn set_branch_current(&mut self, branch: BranchId, value: f64) {
        self.branch_currents[branch.0] = value;
    }

    /// All node voltages, index 0 is ground.
    pub fn voltages(&self) -> &[f64] {
        &self.voltages
    }

    /// All branch currents.
    pub fn branch_currents(&self) -> &[f64] {
        &self.branch_currents
    }

    pub fn num_nodes(&self) -> usize {
        self.voltages.len()
    }

    /// Resize after re-analysis, keeping existing values when the layout is unchanged.
    pub(crate) fn resize(&mut self, num_nodes: usize, num_branches: usize) {
        if self.voltages.len() != num_nodes || self.branch_currents.len() != num_branches {
            *self = Self::new(num_nodes, num_branches);
        }
    }

    /// Zero every value.
    pub fn clear(&mut self) {
        self.voltages.iter_mut().for_each(|v| *v = 0.0);
        self.branch_currents.iter_mut().for_each(|i| *i = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ground_stays_zero() {
        let mut s = Solution::new(3, 1);
        s.set_voltage(NodeId::GROUND, 5.0);
        s.set_voltage(NodeId(2), 1.5);
        assert_eq!(s.voltage(NodeId::GROUND), 0.0);
        assert_eq!(s.voltage(NodeId(2)), 1.5);
        assert_eq!(s.voltage(NodeId(9)), 0.0);
    }

    #[test]
    fn test_resize_keeps_matching_layout() {
        let mut s = Solution::new(3, 1);
        s.set_branch_current(BranchId(0), 2.0);
        s.resize(3, 1);
        assert_eq!(s.branch_current(BranchId(0)), 2.0);
        s.resize(4, 1);
        assert_eq!(s.branch_current(BranchId(0)), 0.0);
        assert_eq!(s.num_nodes(), 4);
    }
}
