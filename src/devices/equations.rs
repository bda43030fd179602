//! Shared semiconductor constants and Newton helpers.
//!
//! Junction devices share the thermal voltage, the logarithmic step limiter
//! and the gmin ramp used when a step is slow to converge.

use crate::solver::SolverContext;

/// Thermal voltage at SPICE's default temperature of 27 °C (volts).
pub const THERMAL_VOLTAGE: f64 = 0.025865;

/// Reciprocal of [`THERMAL_VOLTAGE`], the exponent scale of the Zener curve.
pub const VZ_COEF: f64 = 1.0 / THERMAL_VOLTAGE;

/// Current magnitude above which a junction device stops the run (amperes).
pub const MAX_JUNCTION_CURRENT: f64 = 1e12;

/// Sub-iteration after which gmin starts ramping up.
pub const GMIN_RAMP_START: usize = 100;

/// Largest conductance the gmin ramp reaches (siemens).
pub const GMIN_MAX: f64 = 0.1;

/// Critical voltage of a junction: the current there is `vscale / sqrt(2)`.
pub fn critical_voltage(vscale: f64, saturation_current: f64) -> f64 {
    vscale * (vscale / (std::f64::consts::SQRT_2 * saturation_current)).ln()
}

/// Limit a junction voltage update on the exponential part of the curve.
///
/// Once `vnew` is past `vcrit` and moved more than `2 * vscale`, the step is
/// pulled back to where the previous linearization predicts the same current.
/// Returns the limited voltage and whether limiting occurred.
pub fn limit_junction_step(vnew: f64, vold: f64, vscale: f64, vcrit: f64) -> (f64, bool) {
    if vnew > vcrit && (vnew - vold).abs() > vscale + vscale {
        let limited = if vold > 0.0 {
            let arg = 1.0 + (vnew - vold) / vscale;
            if arg > 0.0 {
                vold + vscale * arg.ln()
            } else {
                vcrit
            }
        } else {
            vscale * (vnew / vscale).ln()
        };
        (limited, true)
    } else {
        (vnew, false)
    }
}

/// Minimum parallel conductance for a junction at the current sub-iteration.
///
/// Below [`GMIN_RAMP_START`] this is `base`. Past it the conductance grows
/// geometrically, reaching 1 S at `ramp` sub-iterations, and is capped at
/// [`GMIN_MAX`].
pub fn gmin(base: f64, sub_iterations: usize, ramp: f64) -> f64 {
    if sub_iterations <= GMIN_RAMP_START {
        return base;
    }
    let g = (-9.0 * std::f64::consts::LN_10 * (1.0 - sub_iterations as f64 / ramp)).exp();
    let g = g.min(GMIN_MAX);
    log::trace!("gmin stepped to {g:e} at sub-iteration {sub_iterations}");
    g
}

/// Clear the convergence flag when a voltage moved more than `limit`.
pub fn check_step(ctx: &mut SolverContext, new: f64, old: f64, limit: f64) {
    if (new - old).abs() > limit {
        ctx.converged = false;
    }
}
