//! Newton-Raphson iteration for nonlinear devices.
//!
//! Every sub-iteration restores the simplified linear system, lets each
//! element stamp its linearization around the latest solution and solves.
//! The loop ends on the first sub-iteration after the first solve in which
//! no element cleared `converged`. That sub-iteration's stamps are
//! discarded; the committed solution is the one already distributed.

use log::debug;

use crate::circuit::ElementId;
use crate::devices::Element;
use crate::error::{Result, SimError};

use super::context::StopInfo;
use super::{MnaMatrix, Solution, SolverContext};

/// Default sub-iteration budget per timestep.
pub const DEFAULT_MAX_SUB_ITERATIONS: usize = 1000;

/// Newton-Raphson controller for one timestep.
#[derive(Debug, Clone)]
pub struct NewtonRaphson {
    /// Maximum sub-iterations per timestep
    pub max_sub_iterations: usize,
}

impl Default for NewtonRaphson {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SUB_ITERATIONS)
    }
}

impl NewtonRaphson {
    pub fn new(max_sub_iterations: usize) -> Self {
        Self { max_sub_iterations }
    }

    /// Iterate until the elements agree with the solution, then commit it.
    ///
    /// Returns the number of sub-iterations used. `solution` holds the
    /// previous step's values on entry and the committed values on success.
    pub fn solve(
        &self,
        elements: &mut [Element],
        matrix: &mut MnaMatrix,
        solution: &mut Solution,
        ctx: &mut SolverContext,
    ) -> Result<usize> {
        let nonlinear = elements.iter().any(Element::is_nonlinear);
        let mut converged = false;
        let mut sub = 0;

        while sub < self.max_sub_iterations {
            ctx.sub_iterations = sub;
            ctx.converged = true;
            matrix.restore();

            for (idx, element) in elements.iter_mut().enumerate() {
                ctx.set_current_element(Some(ElementId(idx)));
                element.as_device_mut().do_iteration(matrix, solution, ctx);
            }
            ctx.set_current_element(None);

            if let Some(stop) = ctx.take_stop() {
                return Err(stopped(stop, elements));
            }
            matrix.check_finite()?;

            if ctx.converged && sub > 0 {
                converged = true;
                break;
            }

            matrix.factor()?;
            matrix.solve();
            matrix.write_solution(solution)?;
            sub += 1;

            if !nonlinear {
                converged = true;
                break;
            }
        }

        if !converged {
            return Err(SimError::IterationLimit {
                sub_iterations: self.max_sub_iterations,
            });
        }
        debug!("converged after {sub} sub-iterations");

        for (idx, element) in elements.iter_mut().enumerate() {
            ctx.set_current_element(Some(ElementId(idx)));
            element.as_device_mut().iteration_finished(solution, ctx);
        }
        ctx.set_current_element(None);

        if let Some(stop) = ctx.take_stop() {
            return Err(stopped(stop, elements));
        }
        Ok(sub)
    }
}

/// Convert a device stop into an error, keeping the attribution.
fn stopped(stop: StopInfo, elements: &[Element]) -> SimError {
    let name = stop
        .element
        .and_then(|id| elements.get(id.0))
        .map_or_else(|| "solver".to_string(), |e| e.name().to_string());
    SimError::Stopped {
        element: stop.element,
        name,
        message: stop.message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Circuit, NodeId};
    use crate::devices::{Diode, DiodeModel, Resistor, VoltageSource};
    use approx::assert_relative_eq;

    fn prepared(circuit: &mut Circuit, ctx: &SolverContext) -> (MnaMatrix, Solution) {
        let layout = circuit.analyze().unwrap().clone();
        let mut matrix = circuit.stamp(ctx).unwrap();
        matrix.simplify().unwrap();
        (matrix, Solution::new(layout.num_nodes, layout.num_branches))
    }

    #[test]
    fn test_linear_circuit_single_solve() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let b = circuit.add_node("b");
        circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 10.0).unwrap());
        circuit.add(Resistor::new("R1", [a, b], 1e3).unwrap());
        circuit.add(Resistor::new("R2", [b, NodeId::GROUND], 1e3).unwrap());

        let mut ctx = SolverContext::new(1e-6, 0);
        let (mut matrix, mut solution) = prepared(&mut circuit, &ctx);
        let subs = NewtonRaphson::default()
            .solve(circuit.elements_mut(), &mut matrix, &mut solution, &mut ctx)
            .unwrap();
        assert_eq!(subs, 1);
        assert_relative_eq!(solution.voltage(b), 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_diode_loop_converges() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let k = circuit.add_node("k");
        circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 5.0).unwrap());
        circuit.add(Resistor::new("R1", [a, k], 1e3).unwrap());
        circuit.add(Diode::new("D1", [k, NodeId::GROUND], DiodeModel::default_model()));

        let mut ctx = SolverContext::new(1e-6, 0);
        let (mut matrix, mut solution) = prepared(&mut circuit, &ctx);
        let subs = NewtonRaphson::default()
            .solve(circuit.elements_mut(), &mut matrix, &mut solution, &mut ctx)
            .unwrap();
        assert!(subs > 1 && subs < 50, "took {subs} sub-iterations");
        assert!(solution.voltage(k) > 0.0 && solution.voltage(k) < 5.0);
    }

    #[test]
    fn test_iteration_limit() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let k = circuit.add_node("k");
        circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 5.0).unwrap());
        circuit.add(Resistor::new("R1", [a, k], 1e3).unwrap());
        circuit.add(Diode::new("D1", [k, NodeId::GROUND], DiodeModel::default_model()));

        let mut ctx = SolverContext::new(1e-6, 0);
        let (mut matrix, mut solution) = prepared(&mut circuit, &ctx);
        let err = NewtonRaphson::new(2)
            .solve(circuit.elements_mut(), &mut matrix, &mut solution, &mut ctx)
            .unwrap_err();
        assert_eq!(err, SimError::IterationLimit { sub_iterations: 2 });
    }
}
