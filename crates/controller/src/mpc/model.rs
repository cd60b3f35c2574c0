//! Prediction model and horizon used by the MPC controller.

use sim::{heater_dynamics, rk4, sensor_dynamics, substeps_for, PlantParams};

/// Horizon points as multiples of the cycle time: dense near now, wider later.
pub const HORIZON_STEPS: [f64; 15] = [
    0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 10.0, 12.0, 15.0, 18.0, 20.0, 25.0,
];

/// Number of control intervals in the horizon.
pub const INTERVALS: usize = HORIZON_STEPS.len() - 1;

pub fn horizon(dt_s: f64) -> [f64; 15] {
    HORIZON_STEPS.map(|k| k * dt_s)
}

/// The controller's own idea of the plant. Coarser than the simulation on
/// purpose: larger convection, faster sensor, different heater gains.
pub fn prediction_params() -> PlantParams {
    PlantParams {
        convection: 10.0,
        alpha: [0.01, 0.0075],
        sensor_tau_s: 5.0,
        ..PlantParams::default()
    }
}

/// Heater and sensor temperatures (K) integrated as one system.
pub type ModelState = [f64; 4];

pub fn model_state(heater_k: [f64; 2], sensor_k: [f64; 2]) -> ModelState {
    [heater_k[0], heater_k[1], sensor_k[0], sensor_k[1]]
}

pub fn derivative(p: &PlantParams, y: &ModelState, command: [f64; 2]) -> ModelState {
    let th = [y[0], y[1]];
    let dh = heater_dynamics(p, th, command, p.convection);
    let ds = sensor_dynamics(p, [y[2], y[3]], th);
    [dh[0], dh[1], ds[0], ds[1]]
}

/// Advance the model over one interval with the command held.
pub fn advance(
    p: &PlantParams,
    y: ModelState,
    command: [f64; 2],
    duration_s: f64,
    max_substep_s: f64,
) -> ModelState {
    let n = substeps_for(duration_s, max_substep_s);
    rk4(|s: &ModelState| derivative(p, s, command), y, duration_s, n)
}

/// Model state at each horizon point after the first, one command per interval.
pub fn simulate(
    p: &PlantParams,
    y0: ModelState,
    grid: &[f64],
    commands: &[[f64; 2]],
    max_substep_s: f64,
) -> Vec<ModelState> {
    let mut y = y0;
    grid.windows(2)
        .zip(commands)
        .map(|(w, u)| {
            y = advance(p, y, *u, w[1] - w[0], max_substep_s);
            y
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizon_is_increasing_and_scaled() {
        let h = horizon(4.0);
        assert_eq!(h[0], 0.0);
        assert_eq!(h[1], 4.0);
        assert_eq!(h[14], 100.0);
        assert!(h.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn heating_raises_predicted_sensor() {
        let p = prediction_params();
        let y0 = model_state([300.0; 2], [300.0; 2]);
        let grid = horizon(4.0);
        let cold = simulate(&p, y0, &grid, &[[0.0, 0.0]; INTERVALS], 2.0);
        let hot = simulate(&p, y0, &grid, &[[100.0, 100.0]; INTERVALS], 2.0);
        assert_eq!(hot.len(), INTERVALS);
        let last = INTERVALS - 1;
        assert!(hot[last][2] > cold[last][2] + 5.0);
        assert!(hot[last][3] > cold[last][3]);
    }
}
