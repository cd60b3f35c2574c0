//! Fixed-step Runge-Kutta integration for small autonomous systems.

/// Advance `y0` by `dt_s` using classic RK4, split into `substeps` equal steps.
///
/// `f` is evaluated with the current state only; inputs that are held constant
/// over the step (heater commands, heater temperatures for the sensor lag) are
/// captured by the closure. `f` is `FnMut` so it may draw noise per evaluation.
pub fn rk4<const N: usize, F>(mut f: F, y0: [f64; N], dt_s: f64, substeps: usize) -> [f64; N]
where
    F: FnMut(&[f64; N]) -> [f64; N],
{
    let n = substeps.max(1);
    let h = dt_s / n as f64;
    let mut y = y0;

    for _ in 0..n {
        let k1 = f(&y);
        let k2 = f(&axpy(&y, &k1, 0.5 * h));
        let k3 = f(&axpy(&y, &k2, 0.5 * h));
        let k4 = f(&axpy(&y, &k3, h));
        for i in 0..N {
            y[i] += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
        }
    }

    y
}

/// Number of RK4 substeps needed so no substep is longer than `max_substep_s`.
pub fn substeps_for(dt_s: f64, max_substep_s: f64) -> usize {
    if !dt_s.is_finite() || dt_s <= 0.0 || max_substep_s <= 0.0 {
        return 1;
    }
    (dt_s / max_substep_s).ceil().max(1.0) as usize
}

fn axpy<const N: usize>(y: &[f64; N], k: &[f64; N], h: f64) -> [f64; N] {
    let mut out = *y;
    for i in 0..N {
        out[i] += h * k[i];
    }
    out
}
