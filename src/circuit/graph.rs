//! Circuit graph structure.

use std::collections::HashMap;

use log::debug;

use super::types::{BranchId, ElementId, NodeId};
use super::validate;
use crate::devices::{Element, ModelLibrary};
use crate::error::{Result, SimError};
use crate::solver::{MnaMatrix, SolverContext};

/// Resistance used to tie a floating node to ground.
pub const GROUND_TIE_RESISTANCE: f64 = 1e8;

/// Unknown allocation produced by [`Circuit::analyze`].
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    /// Nodes reachable through element terminals (including ground)
    pub num_terminal_nodes: usize,
    /// All nodes, internal nodes included
    pub num_nodes: usize,
    /// Number of branch current variables
    pub num_branches: usize,
    /// Internal nodes per element, in element order
    pub internal_nodes: Vec<Vec<NodeId>>,
    /// Branches per element, in element order
    pub branches: Vec<Vec<BranchId>>,
    /// Floating nodes tied to ground with [`GROUND_TIE_RESISTANCE`]
    pub ground_ties: Vec<NodeId>,
}

/// A circuit: elements connected through numbered nodes.
#[derive(Debug, Clone)]
pub struct Circuit {
    /// All elements in the circuit, in stamping order
    elements: Vec<Element>,

    /// Mapping from node names to node IDs
    node_map: HashMap<String, NodeId>,

    /// Reverse mapping from node IDs to names
    node_names: Vec<String>,

    /// Diode models available to elements by name
    models: ModelLibrary,

    /// Result of the last analysis
    layout: Option<Layout>,

    /// Topology or parameters changed since the last analysis
    needs_analysis: bool,
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

impl Circuit {
    /// Create an empty circuit holding only the ground node.
    pub fn new() -> Self {
        let mut node_map = HashMap::new();
        node_map.insert("0".to_string(), NodeId::GROUND);
        node_map.insert("GND".to_string(), NodeId::GROUND);
        Self {
            elements: Vec::new(),
            node_map,
            node_names: vec!["0".to_string()],
            models: ModelLibrary::new(),
            layout: None,
            needs_analysis: true,
        }
    }

    /// Get or create the node with the given name.
    pub fn add_node(&mut self, name: &str) -> NodeId {
        if let Some(&id) = self.node_map.get(name) {
            return id;
        }
        let id = NodeId(self.node_names.len());
        self.node_map.insert(name.to_string(), id);
        self.node_names.push(name.to_string());
        self.needs_analysis = true;
        id
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<NodeId> {
        self.node_map.get(name).copied()
    }

    /// Name of a named node.
    pub fn node_name(&self, node: NodeId) -> Option<&str> {
        self.node_names.get(node.0).map(String::as_str)
    }

    /// Number of named nodes, ground included.
    pub fn num_named_nodes(&self) -> usize {
        self.node_names.len()
    }

    /// Append an element. It is stamped after every element added before it.
    pub fn add(&mut self, element: impl Into<Element>) -> ElementId {
        let id = ElementId(self.elements.len());
        self.elements.push(element.into());
        self.needs_analysis = true;
        id
    }

    /// Remove an element. Ids of later elements shift down by one.
    pub fn remove(&mut self, id: ElementId) -> Result<Element> {
        if id.0 >= self.elements.len() {
            return Err(SimError::UnknownElement { element: id });
        }
        self.needs_analysis = true;
        Ok(self.elements.remove(id.0))
    }

    pub fn element(&self, id: ElementId) -> Result<&Element> {
        self.elements
            .get(id.0)
            .ok_or(SimError::UnknownElement { element: id })
    }

    /// Mutable access to an element. The circuit is re-analyzed before the
    /// next step.
    pub fn element_mut(&mut self, id: ElementId) -> Result<&mut Element> {
        let element = self
            .elements
            .get_mut(id.0)
            .ok_or(SimError::UnknownElement { element: id })?;
        self.needs_analysis = true;
        Ok(element)
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub(crate) fn elements_mut(&mut self) -> &mut [Element] {
        &mut self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn models(&self) -> &ModelLibrary {
        &self.models
    }

    pub fn models_mut(&mut self) -> &mut ModelLibrary {
        &mut self.models
    }

    pub fn needs_analysis(&self) -> bool {
        self.needs_analysis || self.layout.is_none()
    }

    /// Force re-analysis before the next step.
    pub fn invalidate(&mut self) {
        self.needs_analysis = true;
    }

    /// The layout of the last analysis.
    pub fn layout(&self) -> Result<&Layout> {
        self.layout.as_ref().ok_or(SimError::NotAnalyzed)
    }

    /// Allocate internal nodes and branches, bind them to the elements and
    /// run the topology checks.
    pub fn analyze(&mut self) -> Result<&Layout> {
        if self.elements.is_empty() {
            return Err(SimError::EmptyCircuit);
        }

        // Terminal nodes come first so internal nodes never collide with them
        let num_terminal_nodes = self
            .elements
            .iter()
            .flat_map(|e| e.as_device().terminals().iter().map(|n| n.0 + 1))
            .fold(self.node_names.len(), usize::max);

        let mut next_node = num_terminal_nodes;
        let mut next_branch = 0usize;
        let mut internal_nodes = Vec::with_capacity(self.elements.len());
        let mut branches = Vec::with_capacity(self.elements.len());
        for element in &mut self.elements {
            let device = element.as_device_mut();
            let internal: Vec<NodeId> = (0..device.internal_node_count())
                .map(|i| NodeId(next_node + i))
                .collect();
            let slots: Vec<BranchId> = (0..device.voltage_source_count())
                .map(|i| BranchId(next_branch + i))
                .collect();
            next_node += internal.len();
            next_branch += slots.len();
            device.bind(&internal, &slots);
            internal_nodes.push(internal);
            branches.push(slots);
        }

        validate::check_voltage_source_loops(&self.elements)?;
        let ground_ties = validate::find_floating_nodes(&self.elements, num_terminal_nodes);

        debug!(
            "analysis: {} elements, {} nodes ({} internal), {} voltage sources",
            self.elements.len(),
            next_node,
            next_node - num_terminal_nodes,
            next_branch
        );

        self.needs_analysis = false;
        Ok(self.layout.insert(Layout {
            num_terminal_nodes,
            num_nodes: next_node,
            num_branches: next_branch,
            internal_nodes,
            branches,
            ground_ties,
        }))
    }

    /// Build the full MNA system from the analysis stamps.
    pub(crate) fn stamp(&mut self, ctx: &SolverContext) -> Result<MnaMatrix> {
        let layout = self.layout.as_ref().ok_or(SimError::NotAnalyzed)?;
        let mut matrix = MnaMatrix::new(layout.num_nodes, layout.num_branches);
        for &node in &layout.ground_ties {
            matrix.stamp_resistor(node, NodeId::GROUND, GROUND_TIE_RESISTANCE);
        }
        for element in &mut self.elements {
            element.as_device_mut().stamp(&mut matrix, ctx);
        }
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{Diode, DiodeModel, OpAmp, Resistor, Varactor, VoltageSource};

    #[test]
    fn test_node_naming() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("in");
        assert_eq!(a, NodeId(1));
        assert_eq!(circuit.add_node("in"), a);
        assert_eq!(circuit.node("GND"), Some(NodeId::GROUND));
        assert_eq!(circuit.node_name(a), Some("in"));
        assert_eq!(circuit.node("missing"), None);
    }

    #[test]
    fn test_empty_circuit_rejected() {
        let mut circuit = Circuit::new();
        assert_eq!(circuit.analyze().unwrap_err(), SimError::EmptyCircuit);
    }

    #[test]
    fn test_internal_nodes_follow_terminals() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let k = circuit.add_node("k");
        circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 1.0).unwrap());
        circuit.add(Varactor::new("D1", [a, k], DiodeModel::default_model()));
        circuit.add(Resistor::new("R1", [k, NodeId::GROUND], 1e3).unwrap());
        circuit.add(OpAmp::new("U1", [a, k, NodeId::GROUND]));

        let layout = circuit.analyze().unwrap();
        assert_eq!(layout.num_terminal_nodes, 3);
        assert_eq!(layout.num_nodes, 4);
        assert_eq!(layout.internal_nodes[1], vec![NodeId(3)]);
        assert_eq!(layout.num_branches, 3);
        assert_eq!(layout.branches[3], vec![BranchId(2)]);
        assert!(layout.ground_ties.is_empty());
    }

    #[test]
    fn test_element_mut_marks_analysis() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let id = circuit.add(Resistor::new("R1", [a, NodeId::GROUND], 1e3).unwrap());
        circuit.analyze().unwrap();
        assert!(!circuit.needs_analysis());

        if let Element::Resistor(r) = circuit.element_mut(id).unwrap() {
            r.set_resistance(2e3).unwrap();
        }
        assert!(circuit.needs_analysis());
        assert!(circuit.element(ElementId(9)).is_err());
    }

    #[test]
    fn test_remove_element() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let d = circuit.add(Diode::new("D1", [a, NodeId::GROUND], DiodeModel::default_model()));
        let removed = circuit.remove(d).unwrap();
        assert_eq!(removed.name(), "D1");
        assert!(circuit.is_empty());
        assert!(circuit.remove(d).is_err());
    }
}
