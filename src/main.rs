//! mnasim - run the built-in reference circuits through the MNA core
//!
//! # Usage
//!
//! ```bash
//! mnasim --steps 1000 --timestep 1e-6 rc
//! mnasim -vv zener-sweep --from -8 --to 2 --points 41
//! ```

use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use mna_core::{
    circuit::{ElementId, NodeId},
    devices::{
        Capacitor, Channel, Diode, DiodeModel, Element, Fet, OpAmp, Optocoupler, Resistor,
        VoltageSource,
    },
    error::{Result, SimError},
    solver::DEFAULT_TIMESTEP,
    Circuit, Simulator, SolverConfig,
};

/// Transient MNA circuit simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Timestep in seconds
    #[arg(short, long, default_value_t = DEFAULT_TIMESTEP)]
    timestep: f64,

    /// Number of timesteps for transient demos
    #[arg(short, long, default_value_t = 1)]
    steps: usize,

    /// Newton-Raphson sub-iteration budget per timestep
    #[arg(long, default_value_t = mna_core::solver::DEFAULT_MAX_SUB_ITERATIONS)]
    max_sub_iterations: usize,

    /// Print a row every N steps
    #[arg(long, default_value_t = 1)]
    every: usize,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    demo: Demo,
}

#[derive(Subcommand, Debug)]
enum Demo {
    /// 5 V source, 1 kOhm resistor and a diode to ground
    Diode,
    /// Sweep the source feeding a 1 kOhm resistor and a Zener diode
    ZenerSweep {
        /// Zener breakdown voltage
        #[arg(long, default_value_t = 5.6)]
        zener: f64,
        #[arg(long, default_value_t = -10.0, allow_hyphen_values = true)]
        from: f64,
        #[arg(long, default_value_t = 2.0, allow_hyphen_values = true)]
        to: f64,
        #[arg(long, default_value_t = 25)]
        points: usize,
    },
    /// Sweep the gate of an N-channel MOSFET with a 1 kOhm drain load
    MosfetSweep {
        /// Drain supply voltage
        #[arg(long, default_value_t = 10.0)]
        supply: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        from: f64,
        #[arg(long, default_value_t = 5.0, allow_hyphen_values = true)]
        to: f64,
        #[arg(long, default_value_t = 21)]
        points: usize,
    },
    /// 1 V step into a 1 kOhm / 1 uF low-pass
    Rc,
    /// Inverting amplifier with a gain of -10
    Opamp {
        /// Input voltage
        #[arg(long, default_value_t = 0.5, allow_hyphen_values = true)]
        input: f64,
    },
    /// LED driven through 470 Ohm, transistor pulling a 10 kOhm load
    Optocoupler {
        /// LED drive voltage
        #[arg(long, default_value_t = 5.0)]
        drive: f64,
    },
}

/// A value printed in each output row.
enum Probe {
    Voltage(NodeId),
    Current(ElementId, usize),
}

struct Bench {
    circuit: Circuit,
    probes: Vec<(String, Probe)>,
    /// Source whose amplitude is swept, with the sweep points
    sweep: Option<(ElementId, Vec<f64>)>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    let bench = build(&args.demo)?;
    let config = SolverConfig::new()
        .with_timestep(args.timestep)
        .with_max_sub_iterations(args.max_sub_iterations);
    let mut simulator = Simulator::with_config(bench.circuit, config)?;

    let header: Vec<&str> = bench.probes.iter().map(|(label, _)| label.as_str()).collect();
    match &bench.sweep {
        Some(_) => println!("sweep\t{}", header.join("\t")),
        None => println!("time\t{}", header.join("\t")),
    }

    match bench.sweep {
        Some((source, points)) => {
            for value in points {
                set_source(&mut simulator, source, value)?;
                simulator.step()?;
                print_row(&simulator, value, &bench.probes)?;
            }
        }
        None => {
            let every = args.every.max(1);
            for step in 0..args.steps {
                let report = simulator.step()?;
                if (step + 1) % every == 0 || step + 1 == args.steps {
                    print_row(&simulator, report.time, &bench.probes)?;
                }
            }
        }
    }

    info!("finished at t = {:e}", simulator.time());
    Ok(())
}

fn build(demo: &Demo) -> Result<Bench> {
    let mut circuit = Circuit::new();
    let gnd = NodeId::GROUND;

    let bench = match *demo {
        Demo::Diode => {
            let a = circuit.add_node("a");
            let k = circuit.add_node("k");
            circuit.add(VoltageSource::dc("V1", [a, gnd], 5.0)?);
            circuit.add(Resistor::new("R1", [a, k], 1e3)?);
            let d = circuit.add(Diode::new("D1", [k, gnd], DiodeModel::default_model()));
            Bench {
                circuit,
                probes: vec![
                    ("V(k)".into(), Probe::Voltage(k)),
                    ("I(D1)".into(), Probe::Current(d, 1)),
                ],
                sweep: None,
            }
        }
        Demo::ZenerSweep {
            zener,
            from,
            to,
            points,
        } => {
            let a = circuit.add_node("a");
            let k = circuit.add_node("k");
            let model = circuit.models_mut().zener_model(zener)?;
            let source = circuit.add(VoltageSource::dc("V1", [a, gnd], from)?);
            circuit.add(Resistor::new("R1", [a, k], 1e3)?);
            let d = circuit.add(Diode::new("Z1", [k, gnd], model));
            Bench {
                circuit,
                probes: vec![
                    ("V(k)".into(), Probe::Voltage(k)),
                    ("I(Z1)".into(), Probe::Current(d, 1)),
                ],
                sweep: Some((source, linspace(from, to, points))),
            }
        }
        Demo::MosfetSweep {
            supply,
            from,
            to,
            points,
        } => {
            let vdd = circuit.add_node("vdd");
            let g = circuit.add_node("g");
            let d = circuit.add_node("d");
            circuit.add(VoltageSource::dc("VDD", [vdd, gnd], supply)?);
            let source = circuit.add(VoltageSource::dc("VG", [g, gnd], from)?);
            circuit.add(Resistor::new("RD", [vdd, d], 1e3)?);
            let m = circuit.add(Fet::mosfet("M1", [g, gnd, d], Channel::N));
            Bench {
                circuit,
                probes: vec![
                    ("V(d)".into(), Probe::Voltage(d)),
                    ("I(M1)".into(), Probe::Current(m, 2)),
                ],
                sweep: Some((source, linspace(from, to, points))),
            }
        }
        Demo::Rc => {
            let a = circuit.add_node("a");
            let out = circuit.add_node("out");
            circuit.add(VoltageSource::dc("V1", [a, gnd], 1.0)?);
            circuit.add(Resistor::new("R1", [a, out], 1e3)?);
            let c = circuit.add(Capacitor::new("C1", [out, gnd], 1e-6)?);
            Bench {
                circuit,
                probes: vec![
                    ("V(out)".into(), Probe::Voltage(out)),
                    ("I(C1)".into(), Probe::Current(c, 1)),
                ],
                sweep: None,
            }
        }
        Demo::Opamp { input } => {
            let vin = circuit.add_node("in");
            let inv = circuit.add_node("inv");
            let out = circuit.add_node("out");
            circuit.add(VoltageSource::dc("VIN", [vin, gnd], input)?);
            circuit.add(Resistor::new("RIN", [vin, inv], 1e3)?);
            circuit.add(Resistor::new("RF", [inv, out], 10e3)?);
            circuit.add(Resistor::new("RL", [out, gnd], 10e3)?);
            let u = circuit.add(OpAmp::new("U1", [inv, gnd, out]));
            Bench {
                circuit,
                probes: vec![
                    ("V(out)".into(), Probe::Voltage(out)),
                    ("V(inv)".into(), Probe::Voltage(inv)),
                    ("I(U1.out)".into(), Probe::Current(u, 2)),
                ],
                sweep: None,
            }
        }
        Demo::Optocoupler { drive } => {
            let a = circuit.add_node("a");
            let led = circuit.add_node("led");
            let vcc = circuit.add_node("vcc");
            let col = circuit.add_node("col");
            circuit.add(VoltageSource::dc("VIN", [a, gnd], drive)?);
            circuit.add(Resistor::new("RLED", [a, led], 470.0)?);
            circuit.add(VoltageSource::dc("VCC", [vcc, gnd], 5.0)?);
            circuit.add(Resistor::new("RC", [vcc, col], 10e3)?);
            let u = circuit.add(Optocoupler::new("U1", [led, gnd, col, gnd]));
            Bench {
                circuit,
                probes: vec![
                    ("V(col)".into(), Probe::Voltage(col)),
                    ("I(led)".into(), Probe::Current(u, 1)),
                    ("I(col)".into(), Probe::Current(u, 2)),
                ],
                sweep: None,
            }
        }
    };
    Ok(bench)
}

fn set_source(simulator: &mut Simulator, id: ElementId, value: f64) -> Result<()> {
    match simulator.circuit_mut().element_mut(id)? {
        Element::VoltageSource(source) => source.set_amplitude(value),
        other => Err(SimError::invalid_parameter(
            other.name(),
            "amplitude",
            "swept element is not a voltage source",
        )),
    }
}

fn print_row(simulator: &Simulator, x: f64, probes: &[(String, Probe)]) -> Result<()> {
    let mut row = format!("{x:.6e}");
    for (_, probe) in probes {
        let value = match *probe {
            Probe::Voltage(node) => simulator.node_voltage(node),
            Probe::Current(element, terminal) => simulator.current_into_node(element, terminal)?,
        };
        row.push_str(&format!("\t{value:.6e}"));
    }
    println!("{row}");
    Ok(())
}

fn linspace(from: f64, to: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![from],
        n => (0..n)
            .map(|i| from + (to - from) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}
