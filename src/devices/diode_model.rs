//! Diode models and the named model library.

use std::collections::BTreeMap;

use super::equations::THERMAL_VOLTAGE;
use crate::error::{require_positive, Result, SimError};

/// Name of the model used by body diodes and new diodes.
pub const DEFAULT_MODEL: &str = "default";

/// Parameters for a diode model.
#[derive(Debug, Clone, PartialEq)]
pub struct DiodeModel {
    pub name: String,
    /// Short description shown next to the name, e.g. "Schottky"
    pub description: Option<String>,
    /// Saturation current (Is), amperes
    pub saturation_current: f64,
    /// Series resistance (Rs), ohms; zero means no internal node
    pub series_resistance: f64,
    /// Emission coefficient (N)
    pub emission_coefficient: f64,
    /// Zener breakdown voltage (BV); zero means no breakdown
    pub breakdown_voltage: f64,
    vscale: f64,
    vdcoef: f64,
    fwdrop: f64,
}

impl DiodeModel {
    /// Create a model and derive its scale constants.
    ///
    /// Rejects a non-positive saturation current or emission coefficient and
    /// a negative series resistance.
    pub fn new(
        name: impl Into<String>,
        saturation_current: f64,
        series_resistance: f64,
        emission_coefficient: f64,
        breakdown_voltage: f64,
    ) -> Result<Self> {
        let name = name.into();
        require_positive(&name, "saturation_current", saturation_current)?;
        require_positive(&name, "emission_coefficient", emission_coefficient)?;
        if !(series_resistance.is_finite() && series_resistance >= 0.0) {
            return Err(SimError::invalid_parameter(
                &name,
                "series_resistance",
                format!("must be non-negative, got {series_resistance}"),
            ));
        }
        if !breakdown_voltage.is_finite() || breakdown_voltage < 0.0 {
            return Err(SimError::invalid_parameter(
                &name,
                "breakdown_voltage",
                format!("must be non-negative, got {breakdown_voltage}"),
            ));
        }
        Ok(Self::derived(
            name,
            saturation_current,
            series_resistance,
            emission_coefficient,
            breakdown_voltage,
        ))
    }

    fn derived(name: String, is: f64, rs: f64, n: f64, bv: f64) -> Self {
        let vscale = n * THERMAL_VOLTAGE;
        Self {
            name,
            description: None,
            saturation_current: is,
            series_resistance: rs,
            emission_coefficient: n,
            breakdown_voltage: bv,
            vscale,
            vdcoef: 1.0 / vscale,
            fwdrop: (1.0 / is + 1.0).ln() * vscale,
        }
    }

    fn builtin(name: &str, is: f64, rs: f64, n: f64, bv: f64, description: Option<&str>) -> Self {
        let mut model = Self::derived(name.to_string(), is, rs, n, bv);
        model.description = description.map(str::to_string);
        model
    }

    /// The "default" model: N = 2, 0.805904783 V drop at 1 A.
    pub fn default_model() -> Self {
        Self::builtin(DEFAULT_MODEL, 1.7143528192808883e-7, 0.0, 2.0, 0.0, None)
    }

    /// Model with a given forward drop at 1 A and emission coefficient 2.
    pub fn with_forward_drop(fwdrop: f64, zvoltage: f64) -> Result<Self> {
        require_positive("diode", "forward_drop", fwdrop)?;
        let emcoef = 2.0;
        let vdcoef = 1.0 / (emcoef * THERMAL_VOLTAGE);
        let leakage = 1.0 / ((fwdrop * vdcoef).exp() - 1.0);
        let mut name = format!("fwdrop={fwdrop}");
        if zvoltage != 0.0 {
            name.push_str(&format!(" zvoltage={zvoltage}"));
        }
        Self::new(name, leakage, 0.0, emcoef, zvoltage)
    }

    /// The default model with a Zener breakdown voltage.
    pub fn zener(zvoltage: f64) -> Result<Self> {
        let base = Self::default_model();
        Self::new(
            format!("zvoltage={zvoltage}"),
            base.saturation_current,
            0.0,
            base.emission_coefficient,
            zvoltage,
        )
    }

    /// Voltage increase that raises the current by a factor of e.
    pub fn vscale(&self) -> f64 {
        self.vscale
    }

    /// Reciprocal of [`vscale`](Self::vscale).
    pub fn vdcoef(&self) -> f64 {
        self.vdcoef
    }

    /// Forward drop at 1 A.
    pub fn fwdrop(&self) -> f64 {
        self.fwdrop
    }

    /// True if the model needs an internal node for its series resistance.
    pub fn has_series_resistance(&self) -> bool {
        self.series_resistance > 0.0
    }
}

impl Default for DiodeModel {
    fn default() -> Self {
        Self::default_model()
    }
}

/// Named diode models, seeded with the built-in set.
#[derive(Debug, Clone)]
pub struct ModelLibrary {
    models: BTreeMap<String, DiodeModel>,
}

impl Default for ModelLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLibrary {
    /// Create a library holding the built-in models.
    pub fn new() -> Self {
        let builtins = [
            DiodeModel::builtin("spice-default", 1e-14, 0.0, 1.0, 0.0, None),
            DiodeModel::default_model(),
            DiodeModel::builtin("default-zener", 1.7143528192808883e-7, 0.0, 2.0, 5.6, None),
            DiodeModel::builtin("old-default-led", 2.2349907006671927e-18, 0.0, 2.0, 0.0, None),
            DiodeModel::builtin("default-led", 93.2e-12, 0.042, 3.73, 0.0, None),
            DiodeModel::builtin("1N5711", 315e-9, 2.8, 2.03, 70.0, Some("Schottky")),
            DiodeModel::builtin("1N5712", 680e-12, 12.0, 1.003, 20.0, Some("Schottky")),
            DiodeModel::builtin("1N34", 200e-12, 84e-3, 2.19, 60.0, Some("germanium")),
            DiodeModel::builtin("1N4004", 18.8e-9, 28.6e-3, 2.0, 400.0, Some("general purpose")),
            DiodeModel::builtin("1N4148", 4.352e-9, 0.6458, 1.906, 75.0, Some("switching")),
        ];
        Self {
            models: builtins.into_iter().map(|m| (m.name.clone(), m)).collect(),
        }
    }

    /// Look up a model by name.
    pub fn get(&self, name: &str) -> Result<&DiodeModel> {
        self.models.get(name).ok_or_else(|| SimError::unknown_model(name))
    }

    /// Add or replace a model.
    pub fn insert(&mut self, model: DiodeModel) {
        self.models.insert(model.name.clone(), model);
    }

    /// Model with a forward drop at 1 A, reusing an existing match.
    pub fn forward_drop_model(&mut self, fwdrop: f64, zvoltage: f64) -> Result<DiodeModel> {
        let existing = self.models.values().find(|m| {
            (m.fwdrop - fwdrop).abs() < 1e-8
                && m.series_resistance == 0.0
                && (m.breakdown_voltage - zvoltage).abs() < 1e-8
                && m.emission_coefficient == 2.0
        });
        if let Some(model) = existing {
            return Ok(model.clone());
        }
        let model = DiodeModel::with_forward_drop(fwdrop, zvoltage)?;
        self.insert(model.clone());
        Ok(model)
    }

    /// Zener model with the given breakdown voltage, reusing an existing match.
    pub fn zener_model(&mut self, zvoltage: f64) -> Result<DiodeModel> {
        if let Some(model) = self
            .models
            .values()
            .find(|m| (m.breakdown_voltage - zvoltage).abs() < 1e-8)
        {
            return Ok(model.clone());
        }
        let model = DiodeModel::zener(zvoltage)?;
        self.insert(model.clone());
        Ok(model)
    }

    /// Iterate over models in name order, optionally only those with breakdown.
    pub fn models(&self, zener_only: bool) -> impl Iterator<Item = &DiodeModel> {
        self.models
            .values()
            .filter(move |m| !zener_only || m.breakdown_voltage != 0.0)
    }
}
