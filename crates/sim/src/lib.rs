//! Two-heater / two-sensor thermal plant.
//!
//! Each heater exchanges heat with the ambient air and with the other heater by
//! convection and radiation, and gains heat in proportion to its command. Each
//! sensor is a first-order lag of its heater. All temperatures are Kelvin.

mod noise;
mod ode;

pub use noise::Noise;
pub use ode::{rk4, substeps_for};

use thiserror::Error;

pub const KELVIN_OFFSET: f64 = 273.15;

/// Temperature every zone is reset to on a mode switch (20 °C).
pub const INITIAL_TEMP_K: f64 = 293.15;

/// Stefan-Boltzmann constant, W/m²K⁴.
pub const STEFAN_BOLTZMANN: f64 = 5.67e-8;

/// Longest RK4 substep used by [`Plant::integrate`].
const MAX_SUBSTEP_S: f64 = 0.5;

pub fn to_celsius(k: f64) -> f64 {
    k - KELVIN_OFFSET
}

pub fn to_kelvin(c: f64) -> f64 {
    c + KELVIN_OFFSET
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("plant integration diverged: heaters {heater_k:?} K, sensors {sensor_k:?} K")]
    Diverged {
        heater_k: [f64; 2],
        sensor_k: [f64; 2],
    },
    #[error("invalid integration step {0} s")]
    InvalidStep(f64),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlantParams {
    /// Nominal convection coefficient, W/m²K.
    pub convection: f64,
    /// Heater gain per percent of command, W/%.
    pub alpha: [f64; 2],
    pub ambient_k: f64,
    pub mass_kg: f64,
    /// Specific heat, J/kg·K.
    pub heat_capacity: f64,
    /// Surface exposed to ambient, m².
    pub area: f64,
    /// Surface shared between the two heaters, m².
    pub shared_area: f64,
    pub emissivity: f64,
    /// Sensor lag time constant, s.
    pub sensor_tau_s: f64,
}

impl Default for PlantParams {
    fn default() -> Self {
        Self {
            convection: 4.87519009,
            alpha: [0.00640897365, 0.00310952441],
            ambient_k: to_kelvin(23.0),
            mass_kg: 4.0 / 1000.0,
            heat_capacity: 0.5 * 1000.0,
            area: 10.0 / 100.0_f64.powi(2),
            shared_area: 2.0 / 100.0_f64.powi(2),
            emissivity: 0.9,
            sensor_tau_s: 17.7176964,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlantState {
    pub heater_k: [f64; 2],
    /// Lags `heater_k` by the sensor time constant.
    pub sensor_k: [f64; 2],
}

impl Default for PlantState {
    fn default() -> Self {
        Self::uniform(INITIAL_TEMP_K)
    }
}

impl PlantState {
    pub fn uniform(temp_k: f64) -> Self {
        Self {
            heater_k: [temp_k; 2],
            sensor_k: [temp_k; 2],
        }
    }

    pub fn is_finite(&self) -> bool {
        self.heater_k.iter().chain(&self.sensor_k).all(|v| v.is_finite())
    }

    pub fn sensor_c(&self) -> [f64; 2] {
        [to_celsius(self.sensor_k[0]), to_celsius(self.sensor_k[1])]
    }

    pub fn heater_c(&self) -> [f64; 2] {
        [to_celsius(self.heater_k[0]), to_celsius(self.heater_k[1])]
    }
}

/// Heater energy balances for a given convection coefficient.
///
/// `command` is in percent. Returns dT/dt in K/s.
pub fn heater_dynamics(
    p: &PlantParams,
    heater_k: [f64; 2],
    command: [f64; 2],
    convection: f64,
) -> [f64; 2] {
    let [th1, th2] = heater_k;
    let ta = p.ambient_k;
    let eps_sigma = p.emissivity * STEFAN_BOLTZMANN;

    let conv12 = convection * p.shared_area * (th2 - th1);
    let rad12 = eps_sigma * p.shared_area * (th2.powi(4) - th1.powi(4));

    let gain = 1.0 / (p.mass_kg * p.heat_capacity);
    let d1 = gain
        * (convection * p.area * (ta - th1)
            + eps_sigma * p.area * (ta.powi(4) - th1.powi(4))
            + conv12
            + rad12
            + p.alpha[0] * command[0]);
    let d2 = gain
        * (convection * p.area * (ta - th2)
            + eps_sigma * p.area * (ta.powi(4) - th2.powi(4))
            - conv12
            - rad12
            + p.alpha[1] * command[1]);
    [d1, d2]
}

/// First-order sensor lag towards the heater temperatures.
pub fn sensor_dynamics(p: &PlantParams, sensor_k: [f64; 2], heater_k: [f64; 2]) -> [f64; 2] {
    [
        (heater_k[0] - sensor_k[0]) / p.sensor_tau_s,
        (heater_k[1] - sensor_k[1]) / p.sensor_tau_s,
    ]
}

/// The simulated plant: physical parameters plus the convection disturbance.
#[derive(Clone, Debug)]
pub struct Plant {
    pub params: PlantParams,
    /// Added to the convection coefficient on every derivative evaluation.
    pub disturbance: Noise,
}

impl Plant {
    pub fn new(params: PlantParams, disturbance: Noise) -> Self {
        Self {
            params,
            disturbance,
        }
    }

    /// Plant with no process noise.
    pub fn deterministic(params: PlantParams) -> Self {
        Self::new(params, Noise::off())
    }

    /// Advance `state` by `dt_s` seconds with `command` held constant.
    ///
    /// The heater system is integrated first; the sensor system then uses the
    /// new heater temperatures as its constant input over the same step.
    pub fn integrate(
        &mut self,
        state: &PlantState,
        command: [f64; 2],
        dt_s: f64,
    ) -> Result<PlantState, SimError> {
        if !dt_s.is_finite() || dt_s <= 0.0 {
            return Err(SimError::InvalidStep(dt_s));
        }
        let n = substeps_for(dt_s, MAX_SUBSTEP_S);
        let params = self.params;
        let noise = &mut self.disturbance;

        let heater_k = rk4(
            |th: &[f64; 2]| {
                let u = params.convection + noise.sample();
                heater_dynamics(&params, *th, command, u)
            },
            state.heater_k,
            dt_s,
            n,
        );
        let sensor_k = rk4(
            |tc: &[f64; 2]| sensor_dynamics(&params, *tc, heater_k),
            state.sensor_k,
            dt_s,
            n,
        );

        let next = PlantState { heater_k, sensor_k };
        if !next.is_finite() {
            return Err(SimError::Diverged { heater_k, sensor_k });
        }
        Ok(next)
    }
}
