//! Main simulator interface.

use log::{debug, error};

use crate::circuit::{BranchId, Circuit, ElementId, NodeId};
use crate::error::{require_positive, Result, SimError};

use super::newton::DEFAULT_MAX_SUB_ITERATIONS;
use super::{MnaMatrix, NewtonRaphson, Solution, SolverContext, StopInfo};

/// Default timestep (seconds).
pub const DEFAULT_TIMESTEP: f64 = 5e-6;

/// Configuration for the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Timestep in seconds.
    pub timestep: f64,
    /// Maximum Newton-Raphson sub-iterations per timestep.
    pub max_sub_iterations: usize,
    /// Seed of the dither generator used by saturating op-amps.
    pub dither_seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            timestep: DEFAULT_TIMESTEP,
            max_sub_iterations: DEFAULT_MAX_SUB_ITERATIONS,
            dither_seed: 0,
        }
    }
}

impl SolverConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timestep (in seconds).
    pub fn with_timestep(mut self, timestep: f64) -> Self {
        self.timestep = timestep;
        self
    }

    /// Set the maximum Newton-Raphson sub-iterations.
    pub fn with_max_sub_iterations(mut self, max_sub_iterations: usize) -> Self {
        self.max_sub_iterations = max_sub_iterations;
        self
    }

    /// Set the dither seed.
    pub fn with_dither_seed(mut self, seed: u64) -> Self {
        self.dither_seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        require_positive("solver", "timestep", self.timestep)?;
        if self.max_sub_iterations == 0 {
            return Err(SimError::invalid_parameter(
                "solver",
                "max_sub_iterations",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Outcome of one solved timestep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Time the step was solved at (seconds)
    pub time: f64,
    /// Newton-Raphson sub-iterations used
    pub sub_iterations: usize,
}

/// The main circuit simulator.
#[derive(Debug)]
pub struct Simulator {
    /// The circuit being simulated
    circuit: Circuit,
    config: SolverConfig,
    /// Newton-Raphson controller
    newton: NewtonRaphson,
    ctx: SolverContext,
    /// Simplified MNA system, `None` until analyzed
    matrix: Option<MnaMatrix>,
    /// Node voltages and branch currents of the last committed step
    solution: Solution,
    /// Time of the next step
    time: f64,
    running: bool,
    stop_info: Option<StopInfo>,
}

impl Simulator {
    /// Create a new simulator for the given circuit with default configuration.
    pub fn new(circuit: Circuit) -> Result<Self> {
        Self::with_config(circuit, SolverConfig::default())
    }

    /// Create a new simulator for the given circuit with custom configuration.
    pub fn with_config(circuit: Circuit, config: SolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            circuit,
            newton: NewtonRaphson::new(config.max_sub_iterations),
            ctx: SolverContext::new(config.timestep, config.dither_seed),
            config,
            matrix: None,
            solution: Solution::default(),
            time: 0.0,
            running: true,
            stop_info: None,
        })
    }

    /// Analyze the circuit and build the simplified linear system.
    ///
    /// Runs automatically before a step whenever the circuit changed.
    pub fn analyze(&mut self) -> Result<()> {
        self.matrix = None;
        let layout = self.circuit.analyze()?;
        let (num_nodes, num_branches) = (layout.num_nodes, layout.num_branches);

        self.ctx.timestep = self.config.timestep;
        let mut matrix = self.circuit.stamp(&self.ctx)?;
        matrix.simplify()?;
        debug!(
            "matrix size {} reduced to {}",
            matrix.full_size(),
            matrix.size()
        );

        self.solution.resize(num_nodes, num_branches);
        self.matrix = Some(matrix);
        Ok(())
    }

    /// Advance the simulation by one timestep.
    ///
    /// A fatal failure halts the simulator until [`reset`](Self::reset).
    pub fn step(&mut self) -> Result<StepReport> {
        if !self.running {
            return Err(SimError::Halted);
        }
        match self.try_step() {
            Ok(report) => Ok(report),
            Err(err) => {
                if err.is_fatal() {
                    self.halt(&err);
                }
                Err(err)
            }
        }
    }

    fn try_step(&mut self) -> Result<StepReport> {
        if self.circuit.needs_analysis() || self.matrix.is_none() {
            self.analyze()?;
        }
        let matrix = self.matrix.as_mut().ok_or(SimError::NotAnalyzed)?;

        self.ctx.time = self.time;
        for element in self.circuit.elements_mut() {
            element.as_device_mut().start_iteration(&self.solution, &self.ctx);
        }

        let sub_iterations = self.newton.solve(
            self.circuit.elements_mut(),
            matrix,
            &mut self.solution,
            &mut self.ctx,
        )?;

        let report = StepReport {
            time: self.time,
            sub_iterations,
        };
        self.time += self.config.timestep;
        Ok(report)
    }

    fn halt(&mut self, err: &SimError) {
        error!("simulation stopped at t={:.6e}: {err}", self.time);
        let info = match err {
            SimError::Stopped {
                element, message, ..
            } => StopInfo {
                message: message.clone(),
                element: *element,
            },
            other => StopInfo {
                message: other.to_string(),
                element: None,
            },
        };
        self.stop_info = Some(info);
        self.running = false;
    }

    /// Run `steps` timesteps, returning the report of the last one.
    pub fn run(&mut self, steps: usize) -> Result<Option<StepReport>> {
        let mut last = None;
        for _ in 0..steps {
            last = Some(self.step()?);
        }
        Ok(last)
    }

    /// Rewind to time zero with all transient state cleared.
    ///
    /// Parameters and analysis are kept, so a rerun repeats the same steps.
    pub fn reset(&mut self) {
        for element in self.circuit.elements_mut() {
            element.as_device_mut().reset();
        }
        self.ctx.reset();
        self.solution.clear();
        self.time = 0.0;
        self.running = true;
        self.stop_info = None;
    }

    /// Change the timestep. The circuit is re-stamped before the next step.
    pub fn set_timestep(&mut self, timestep: f64) -> Result<()> {
        self.config.timestep = require_positive("solver", "timestep", timestep)?;
        self.circuit.invalidate();
        Ok(())
    }

    /// Get the voltage at a node after the last step.
    pub fn node_voltage(&self, node: NodeId) -> f64 {
        self.solution.voltage(node)
    }

    /// Get the voltage at a named node after the last step.
    pub fn named_voltage(&self, name: &str) -> Option<f64> {
        self.circuit.node(name).map(|node| self.node_voltage(node))
    }

    /// Get a branch current after the last step.
    pub fn branch_current(&self, branch: BranchId) -> f64 {
        self.solution.branch_current(branch)
    }

    /// Current flowing from an element into the node at one of its terminals.
    pub fn current_into_node(&self, element: ElementId, terminal: usize) -> Result<f64> {
        Ok(self.circuit.element(element)?.current_into_node(terminal))
    }

    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    /// Time of the next step.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Why the simulator halted, if it did.
    pub fn stop_info(&self) -> Option<&StopInfo> {
        self.stop_info.as_ref()
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Get a reference to the circuit.
    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    /// Mutable access to the circuit. Element changes made through
    /// [`Circuit::element_mut`] trigger re-analysis.
    pub fn circuit_mut(&mut self) -> &mut Circuit {
        &mut self.circuit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{
        AnalogSwitch, Bjt, BjtType, Capacitor, Channel, CurrentSource, Diode, DiodeModel, Element,
        Fet, Inductor, OpAmp, Optocoupler, Resistor, Varactor, VoltageSource,
    };
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    /// Sum of element currents into every terminal node.
    fn assert_kcl(sim: &Simulator) {
        let layout = sim.circuit().layout().unwrap();
        let mut sums = vec![0.0; layout.num_nodes];
        for element in sim.circuit().elements() {
            for (t, node) in element.as_device().terminals().iter().enumerate() {
                sums[node.0] += element.current_into_node(t);
            }
        }
        for &node in &layout.ground_ties {
            sums[node.0] -= sim.node_voltage(node) / crate::circuit::GROUND_TIE_RESISTANCE;
        }
        for (node, sum) in sums.iter().enumerate().skip(1).take(layout.num_terminal_nodes - 1) {
            assert!(sum.abs() < 1e-6, "KCL violated at node {node}: {sum}");
        }
    }

    fn spice_default() -> DiodeModel {
        DiodeModel::new("spice-default", 1e-14, 0.0, 1.0, 0.0).unwrap()
    }

    fn diode_circuit(model: DiodeModel) -> (Circuit, NodeId, ElementId) {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let k = circuit.add_node("k");
        circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 5.0).unwrap());
        circuit.add(Resistor::new("R1", [a, k], 1e3).unwrap());
        let d = circuit.add(Diode::new("D1", [k, NodeId::GROUND], model));
        (circuit, k, d)
    }

    #[test]
    fn test_diode_operating_point() {
        let (circuit, k, d) = diode_circuit(spice_default());
        let mut sim = Simulator::new(circuit).unwrap();
        let report = sim.step().unwrap();
        assert!(report.sub_iterations < 50);

        let vd = sim.node_voltage(k);
        assert!((0.6..0.7).contains(&vd), "diode voltage {vd}");
        let id = sim.circuit().element(d).unwrap().current();
        assert!((4.3e-3..4.4e-3).contains(&id), "diode current {id}");
        assert_kcl(&sim);
    }

    #[test]
    fn test_reset_is_bit_identical() {
        let (circuit, k, _) = diode_circuit(spice_default());
        let mut sim = Simulator::new(circuit).unwrap();
        let first: Vec<f64> = (0..5)
            .map(|_| {
                sim.step().unwrap();
                sim.node_voltage(k)
            })
            .collect();

        sim.reset();
        assert_eq!(sim.time(), 0.0);
        let second: Vec<f64> = (0..5)
            .map(|_| {
                sim.step().unwrap();
                sim.node_voltage(k)
            })
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zener_clamps_reverse_voltage() {
        let mut library = crate::devices::ModelLibrary::new();
        let model = library.zener_model(5.6).unwrap();
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let k = circuit.add_node("k");
        circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 12.0).unwrap());
        circuit.add(Resistor::new("R1", [a, k], 1e3).unwrap());
        // Reverse biased: cathode at the driven node
        circuit.add(Diode::new("Z1", [NodeId::GROUND, k], model));

        let mut sim = Simulator::new(circuit).unwrap();
        sim.step().unwrap();
        let vz = sim.node_voltage(k);
        assert!((5.4..5.8).contains(&vz), "zener voltage {vz}");
        assert_kcl(&sim);
    }

    #[test]
    fn test_rc_charging() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let b = circuit.add_node("b");
        circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 1.0).unwrap());
        circuit.add(Resistor::new("R1", [a, b], 1e3).unwrap());
        circuit.add(Capacitor::new("C1", [b, NodeId::GROUND], 1e-6).unwrap());

        // tau = 1 ms, run for one tau
        let config = SolverConfig::default().with_timestep(1e-6);
        let mut sim = Simulator::with_config(circuit, config).unwrap();
        sim.run(1000).unwrap();
        assert_abs_diff_eq!(sim.node_voltage(b), 1.0 - (-1.0f64).exp(), epsilon = 2e-3);
        assert_kcl(&sim);
    }

    #[test]
    fn test_inverting_amplifier() {
        let mut circuit = Circuit::new();
        let vin = circuit.add_node("in");
        let inv = circuit.add_node("inv");
        let out = circuit.add_node("out");
        circuit.add(VoltageSource::dc("V1", [vin, NodeId::GROUND], 0.5).unwrap());
        circuit.add(Resistor::new("R1", [vin, inv], 1e3).unwrap());
        circuit.add(Resistor::new("R2", [inv, out], 10e3).unwrap());
        circuit.add(OpAmp::new("U1", [inv, NodeId::GROUND, out]));

        let mut sim = Simulator::new(circuit).unwrap();
        sim.run(3).unwrap();
        assert_relative_eq!(sim.node_voltage(out), -5.0, epsilon = 1e-3);
        assert_kcl(&sim);
    }

    #[test]
    fn test_opamp_saturates_at_rail() {
        let mut circuit = Circuit::new();
        let vin = circuit.add_node("in");
        let inv = circuit.add_node("inv");
        let out = circuit.add_node("out");
        circuit.add(VoltageSource::dc("V1", [vin, NodeId::GROUND], 5.0).unwrap());
        circuit.add(Resistor::new("R1", [vin, inv], 1e3).unwrap());
        circuit.add(Resistor::new("R2", [inv, out], 10e3).unwrap());
        circuit.add(OpAmp::new("U1", [inv, NodeId::GROUND, out]));

        let mut sim = Simulator::new(circuit).unwrap();
        sim.run(5).unwrap();
        assert_abs_diff_eq!(sim.node_voltage(out), -15.0, epsilon = 0.1);
    }

    #[test]
    fn test_optocoupler_transfers_current() {
        let mut circuit = Circuit::new();
        let vin = circuit.add_node("in");
        let anode = circuit.add_node("anode");
        let vcc = circuit.add_node("vcc");
        let col = circuit.add_node("col");
        circuit.add(VoltageSource::dc("V1", [vin, NodeId::GROUND], 5.0).unwrap());
        circuit.add(Resistor::new("R1", [vin, anode], 470.0).unwrap());
        let u = circuit.add(Optocoupler::new("U1", [anode, NodeId::GROUND, col, NodeId::GROUND]));
        circuit.add(VoltageSource::dc("V2", [vcc, NodeId::GROUND], 5.0).unwrap());
        circuit.add(Resistor::new("R2", [vcc, col], 10e3).unwrap());

        let mut sim = Simulator::new(circuit).unwrap();
        sim.run(5).unwrap();
        let Element::Optocoupler(opto) = sim.circuit().element(u).unwrap() else {
            panic!("element U1 is not an optocoupler");
        };
        assert!(opto.led_current() > 1e-3);
        assert!(opto.drive_current() > 0.0);
        // The output transistor pulls the collector down
        assert!(sim.node_voltage(col) < 4.0);
        assert_kcl(&sim);
    }

    #[test]
    fn test_fatal_error_halts() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let k = circuit.add_node("k");
        circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 5.0).unwrap());
        circuit.add(Resistor::new("R1", [a, k], 1e3).unwrap());
        circuit.add(Diode::new("D1", [k, NodeId::GROUND], spice_default()));

        let config = SolverConfig::default().with_max_sub_iterations(2);
        let mut sim = Simulator::with_config(circuit, config).unwrap();
        assert!(matches!(sim.step(), Err(SimError::IterationLimit { .. })));
        assert!(!sim.is_running());
        assert!(sim.stop_info().is_some());
        assert_eq!(sim.step().unwrap_err(), SimError::Halted);

        sim.reset();
        assert!(sim.is_running());
        assert!(sim.stop_info().is_none());
    }

    #[test]
    fn test_voltage_loop_reported() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 5.0).unwrap());
        circuit.add(VoltageSource::dc("V2", [a, NodeId::GROUND], 3.0).unwrap());
        let mut sim = Simulator::new(circuit).unwrap();
        assert!(matches!(sim.step(), Err(SimError::VoltageSourceLoop { .. })));
        // Topology errors do not halt the run
        assert!(sim.is_running());
    }

    #[test]
    fn test_parameter_change_reanalyzes() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let b = circuit.add_node("b");
        circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 10.0).unwrap());
        let r1 = circuit.add(Resistor::new("R1", [a, b], 1e3).unwrap());
        circuit.add(Resistor::new("R2", [b, NodeId::GROUND], 1e3).unwrap());

        let mut sim = Simulator::new(circuit).unwrap();
        sim.step().unwrap();
        assert_relative_eq!(sim.node_voltage(b), 5.0, epsilon = 1e-9);

        if let Element::Resistor(r) = sim.circuit_mut().element_mut(r1).unwrap() {
            r.set_resistance(3e3).unwrap();
        }
        sim.step().unwrap();
        assert_relative_eq!(sim.node_voltage(b), 2.5, epsilon = 1e-9);
    }

    #[test]
    fn test_floating_node_is_tied() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let f = circuit.add_node("floating");
        circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 1.0).unwrap());
        circuit.add(Resistor::new("R1", [a, NodeId::GROUND], 1e3).unwrap());
        circuit.add(Resistor::new("R2", [f, f], 1e3).unwrap());

        let mut sim = Simulator::new(circuit).unwrap();
        sim.step().unwrap();
        assert_eq!(sim.circuit().layout().unwrap().ground_ties, vec![f]);
        assert_eq!(sim.node_voltage(f), 0.0);
    }

    #[test]
    fn test_config_validation() {
        let bad = SolverConfig::default().with_timestep(0.0);
        assert!(Simulator::with_config(Circuit::new(), bad).is_err());
        let bad = SolverConfig::default().with_max_sub_iterations(0);
        assert!(Simulator::with_config(Circuit::new(), bad).is_err());
    }

    #[test]
    fn test_diode_model_switched_by_name() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let k = circuit.add_node("k");
        circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 12.0).unwrap());
        circuit.add(Resistor::new("R1", [a, k], 1e3).unwrap());
        let d = circuit.add(Diode::new("D1", [NodeId::GROUND, k], DiodeModel::default_model()));

        let mut sim = Simulator::new(circuit).unwrap();
        sim.step().unwrap();
        assert!(sim.node_voltage(k) > 11.9);

        let library = sim.circuit().models().clone();
        let Element::Diode(diode) = sim.circuit_mut().element_mut(d).unwrap() else {
            panic!("element D1 is not a diode");
        };
        assert!(matches!(
            diode.set_model_name(&library, "no-such-model"),
            Err(SimError::UnknownModel { .. })
        ));
        diode.set_model_name(&library, "default-zener").unwrap();

        sim.step().unwrap();
        let vz = sim.node_voltage(k);
        assert!((5.4..5.8).contains(&vz), "zener voltage {vz}");
        assert_kcl(&sim);
    }

    #[test]
    fn test_common_emitter_bjt() {
        let mut circuit = Circuit::new();
        let vcc = circuit.add_node("vcc");
        let b = circuit.add_node("b");
        let c = circuit.add_node("c");
        circuit.add(VoltageSource::dc("VCC", [vcc, NodeId::GROUND], 10.0).unwrap());
        circuit.add(Resistor::new("RB", [vcc, b], 470e3).unwrap());
        circuit.add(Resistor::new("RC", [vcc, c], 1e3).unwrap());
        let q = circuit.add(Bjt::new("Q1", [b, c, NodeId::GROUND], BjtType::Npn));

        let mut sim = Simulator::new(circuit).unwrap();
        sim.step().unwrap();
        let vc = sim.node_voltage(c);
        assert!((7.9..8.1).contains(&vc), "collector voltage {vc}");
        let Element::Bjt(q) = sim.circuit().element(q).unwrap() else {
            panic!("element Q1 is not a BJT");
        };
        assert_relative_eq!(q.ic() / q.ib(), 100.0, max_relative = 0.02);
        assert_kcl(&sim);
    }

    /// N-channel MOSFET with a 1k drain load, optionally wired source/drain reversed.
    fn nmos_circuit(reversed: bool, body_diodes: bool) -> (Circuit, NodeId, ElementId) {
        let mut circuit = Circuit::new();
        let vdd = circuit.add_node("vdd");
        let g = circuit.add_node("g");
        let d = circuit.add_node("d");
        circuit.add(VoltageSource::dc("VDD", [vdd, NodeId::GROUND], 10.0).unwrap());
        circuit.add(VoltageSource::dc("VG", [g, NodeId::GROUND], 3.0).unwrap());
        circuit.add(Resistor::new("RD", [vdd, d], 1e3).unwrap());
        let nodes = if reversed { [g, d, NodeId::GROUND] } else { [g, NodeId::GROUND, d] };
        let m = circuit.add(Fet::mosfet("M1", nodes, Channel::N).with_body_diodes(body_diodes));
        (circuit, d, m)
    }

    /// P-channel MOSFET sourcing into a 1k load, optionally wired source/drain reversed.
    fn pmos_circuit(reversed: bool, body_diodes: bool) -> (Circuit, NodeId, ElementId) {
        let mut circuit = Circuit::new();
        let vdd = circuit.add_node("vdd");
        let g = circuit.add_node("g");
        let d = circuit.add_node("d");
        circuit.add(VoltageSource::dc("VDD", [vdd, NodeId::GROUND], 10.0).unwrap());
        circuit.add(VoltageSource::dc("VG", [g, NodeId::GROUND], 7.0).unwrap());
        circuit.add(Resistor::new("RD", [d, NodeId::GROUND], 1e3).unwrap());
        let nodes = if reversed { [g, d, vdd] } else { [g, vdd, d] };
        let m = circuit.add(Fet::mosfet("M1", nodes, Channel::P).with_body_diodes(body_diodes));
        (circuit, d, m)
    }

    fn solve_fet(circuit: Circuit, id: ElementId) -> (Simulator, f64) {
        let mut sim = Simulator::new(circuit).unwrap();
        sim.step().unwrap();
        assert_kcl(&sim);
        let Element::Fet(m) = sim.circuit().element(id).unwrap() else {
            panic!("element M1 is not a FET");
        };
        let ids = m.ids();
        (sim, ids)
    }

    #[test]
    fn test_nmos_source_drain_swap() {
        let (circuit, d, m) = nmos_circuit(false, false);
        let (sim, ids) = solve_fet(circuit, m);
        // Linear region: -10 Vd^2 + 31 Vd - 10 = 0
        assert_abs_diff_eq!(sim.node_voltage(d), 0.36573, epsilon = 1e-3);

        let (circuit, d, m) = nmos_circuit(true, false);
        let (sim, swapped) = solve_fet(circuit, m);
        assert_relative_eq!(ids.abs(), swapped.abs(), epsilon = 1e-5);
        assert_abs_diff_eq!(sim.node_voltage(d), 0.36573, epsilon = 1e-3);

        for reversed in [false, true] {
            let (circuit, _, m) = nmos_circuit(reversed, true);
            solve_fet(circuit, m);
        }
    }

    #[test]
    fn test_pmos_source_drain_swap() {
        let (circuit, d, m) = pmos_circuit(false, false);
        let (sim, ids) = solve_fet(circuit, m);
        assert_abs_diff_eq!(sim.node_voltage(d), 10.0 - 0.36573, epsilon = 1e-3);

        let (circuit, _, m) = pmos_circuit(true, false);
        let (_, swapped) = solve_fet(circuit, m);
        assert_relative_eq!(ids.abs(), swapped.abs(), epsilon = 1e-5);

        for reversed in [false, true] {
            let (circuit, _, m) = pmos_circuit(reversed, true);
            solve_fet(circuit, m);
        }
    }

    #[test]
    fn test_jfet_gate_junction_conducts() {
        let mut circuit = Circuit::new();
        let vdd = circuit.add_node("vdd");
        let vin = circuit.add_node("in");
        let g = circuit.add_node("g");
        let d = circuit.add_node("d");
        circuit.add(VoltageSource::dc("VDD", [vdd, NodeId::GROUND], 10.0).unwrap());
        circuit.add(VoltageSource::dc("VG", [vin, NodeId::GROUND], 5.0).unwrap());
        circuit.add(Resistor::new("RG", [vin, g], 10e3).unwrap());
        circuit.add(Resistor::new("RD", [vdd, d], 1e3).unwrap());
        let j = circuit.add(Fet::jfet("J1", [g, NodeId::GROUND, d], Channel::N));

        let mut sim = Simulator::new(circuit).unwrap();
        sim.step().unwrap();
        let vg = sim.node_voltage(g);
        assert!((0.2..0.8).contains(&vg), "gate voltage {vg}");
        // Gate current flows from the gate node into the device
        let into_gate = sim.current_into_node(j, 0).unwrap();
        assert!(into_gate < -4e-4, "gate current {into_gate}");
        assert_kcl(&sim);
    }

    #[test]
    fn test_varactor_with_sine_drive() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let k = circuit.add_node("k");
        circuit.add(VoltageSource::sine("V1", [a, NodeId::GROUND], 2.0, 1e3).unwrap());
        circuit.add(Resistor::new("R1", [a, k], 1e3).unwrap());
        circuit.add(Varactor::new("D1", [k, NodeId::GROUND], DiodeModel::default_model()));

        let mut sim = Simulator::new(circuit).unwrap();
        let (mut lowest, mut highest) = (0.0f64, 0.0f64);
        for _ in 0..200 {
            sim.step().unwrap();
            assert_kcl(&sim);
            lowest = lowest.min(sim.node_voltage(k));
            highest = highest.max(sim.node_voltage(k));
        }
        // Forward half clamps at the junction, reverse half follows the source
        assert!(highest > 0.2 && highest < 1.0, "peak {highest}");
        assert!(lowest < -1.5, "trough {lowest}");
    }

    #[test]
    fn test_analog_switch_follows_square_control() {
        let mut circuit = Circuit::new();
        let vin = circuit.add_node("in");
        let out = circuit.add_node("out");
        let ctrl = circuit.add_node("ctrl");
        circuit.add(VoltageSource::dc("V1", [vin, NodeId::GROUND], 5.0).unwrap());
        circuit.add(VoltageSource::square("VC", [ctrl, NodeId::GROUND], 5.0, 1e3).unwrap());
        circuit.add(AnalogSwitch::new("S1", [vin, out, ctrl]));
        circuit.add(Resistor::new("RL", [out, NodeId::GROUND], 1e3).unwrap());

        // 200 steps per control period, high for the first half
        let mut sim = Simulator::new(circuit).unwrap();
        for step in 0..200 {
            sim.step().unwrap();
            if step == 50 {
                assert_abs_diff_eq!(sim.node_voltage(out), 5.0 * 1e3 / 1.1e3, epsilon = 1e-6);
                assert_kcl(&sim);
            } else if step == 150 {
                assert!(sim.node_voltage(out) < 1e-3);
                assert_kcl(&sim);
            }
        }
    }

    #[test]
    fn test_rl_step() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        let b = circuit.add_node("b");
        circuit.add(VoltageSource::dc("V1", [a, NodeId::GROUND], 1.0).unwrap());
        circuit.add(Resistor::new("R1", [a, b], 1e3).unwrap());
        let l = circuit.add(Inductor::new("L1", [b, NodeId::GROUND], 1.0).unwrap());

        // tau = L / R = 1 ms, run for one tau
        let config = SolverConfig::default().with_timestep(1e-6);
        let mut sim = Simulator::with_config(circuit, config).unwrap();
        sim.run(1000).unwrap();
        let i = sim.circuit().element(l).unwrap().current();
        assert_abs_diff_eq!(i, 1e-3 * (1.0 - (-1.0f64).exp()), epsilon = 1e-6);
        assert_kcl(&sim);
    }

    #[test]
    fn test_current_source_into_resistor() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node("a");
        circuit.add(CurrentSource::new("I1", [NodeId::GROUND, a], 1e-3).unwrap());
        circuit.add(Resistor::new("R1", [a, NodeId::GROUND], 1e3).unwrap());

        let mut sim = Simulator::new(circuit).unwrap();
        sim.step().unwrap();
        assert_relative_eq!(sim.node_voltage(a), 1.0, epsilon = 1e-9);
        assert_kcl(&sim);
    }
}
