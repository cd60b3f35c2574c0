//! Box-constrained minimisers used by the MPC controller.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("objective is not finite at the starting point")]
    NonFiniteCost,
    #[error("no convergence after {iterations} iterations")]
    NotConverged { iterations: usize },
    #[error("dimension mismatch: start point has {x0} entries, bounds have {lower}/{upper}")]
    DimensionMismatch {
        x0: usize,
        lower: usize,
        upper: usize,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    pub x: Vec<f64>,
    pub cost: f64,
    pub iterations: usize,
}

/// A minimiser over `lower <= x <= upper`.
///
/// Implementations must not return a point outside the bounds.
pub trait Optimizer: Send {
    fn name(&self) -> &'static str;

    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        x0: &[f64],
        lower: &[f64],
        upper: &[f64],
    ) -> Result<Solution, SolveError>;
}

fn check_dims(x0: &[f64], lower: &[f64], upper: &[f64]) -> Result<(), SolveError> {
    if x0.len() != lower.len() || x0.len() != upper.len() {
        return Err(SolveError::DimensionMismatch {
            x0: x0.len(),
            lower: lower.len(),
            upper: upper.len(),
        });
    }
    Ok(())
}

fn project(x: &mut [f64], lower: &[f64], upper: &[f64]) {
    for ((xi, lo), hi) in x.iter_mut().zip(lower).zip(upper) {
        *xi = xi.clamp(*lo, *hi);
    }
}

/// Steepest descent with projection onto the box and Armijo backtracking.
/// Gradients are forward differences, flipped to backward at an upper bound.
/// A coordinate that looks flat forward is retried backward, since the
/// objective may saturate on one side only.
#[derive(Clone, Debug)]
pub struct ProjectedGradient {
    pub max_iterations: usize,
    /// Stop once an accepted step improves the cost by less than this fraction.
    pub rel_tolerance: f64,
    /// Largest move of any coordinate on the first trial step.
    pub initial_step: f64,
}

impl Default for ProjectedGradient {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            rel_tolerance: 1e-4,
            initial_step: 10.0,
        }
    }
}

const ARMIJO: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 40;

impl ProjectedGradient {
    fn gradient(
        objective: &dyn Fn(&[f64]) -> f64,
        x: &[f64],
        f: f64,
        lower: &[f64],
        upper: &[f64],
    ) -> Vec<f64> {
        let mut shifted = x.to_vec();
        let mut slope = |i: usize, h: f64| {
            shifted[i] = x[i] + h;
            let fi = objective(&shifted);
            shifted[i] = x[i];
            if fi.is_finite() {
                (fi - f) / h
            } else {
                0.0
            }
        };

        let mut g = vec![0.0; x.len()];
        for i in 0..x.len() {
            let h = 1e-6 * (1.0 + x[i].abs());
            let h = if x[i] + h > upper[i] { -h } else { h };
            g[i] = slope(i, h);
            if g[i] == 0.0 && (lower[i]..=upper[i]).contains(&(x[i] - h)) {
                g[i] = slope(i, -h);
            }
        }
        g
    }
}

impl Optimizer for ProjectedGradient {
    fn name(&self) -> &'static str {
        "projected-gradient"
    }

    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        x0: &[f64],
        lower: &[f64],
        upper: &[f64],
    ) -> Result<Solution, SolveError> {
        check_dims(x0, lower, upper)?;
        let mut x = x0.to_vec();
        project(&mut x, lower, upper);
        let mut f = objective(&x);
        if !f.is_finite() {
            return Err(SolveError::NonFiniteCost);
        }

        let mut step = self.initial_step;
        for it in 0..self.max_iterations {
            let g = Self::gradient(objective, &x, f, lower, upper);
            let gmax = g.iter().fold(0.0_f64, |a, v| a.max(v.abs()));
            if gmax == 0.0 {
                return Ok(Solution {
                    x,
                    cost: f,
                    iterations: it,
                });
            }

            let mut accepted = None;
            let mut t = step;
            for _ in 0..MAX_BACKTRACKS {
                let mut trial: Vec<f64> = x
                    .iter()
                    .zip(&g)
                    .map(|(xi, gi)| xi - t * gi / gmax)
                    .collect();
                project(&mut trial, lower, upper);
                let decrease: f64 = g
                    .iter()
                    .zip(x.iter().zip(&trial))
                    .map(|(gi, (a, b))| gi * (a - b))
                    .sum();
                let ft = objective(&trial);
                if decrease > 0.0 && ft.is_finite() && ft <= f - ARMIJO * decrease {
                    accepted = Some((trial, ft));
                    break;
                }
                t *= 0.5;
            }

            // No descent left along the projected gradient.
            let Some((trial, ft)) = accepted else {
                return Ok(Solution {
                    x,
                    cost: f,
                    iterations: it,
                });
            };

            let improvement = f - ft;
            x = trial;
            f = ft;
            step = (t * 2.0).min(self.initial_step * 10.0);

            if improvement <= self.rel_tolerance * (1.0 + f.abs()) {
                return Ok(Solution {
                    x,
                    cost: f,
                    iterations: it + 1,
                });
            }
        }

        Err(SolveError::NotConverged {
            iterations: self.max_iterations,
        })
    }
}

/// Compass search: probe each coordinate in both directions, halve the
/// step when a full sweep finds nothing better.
#[derive(Clone, Debug)]
pub struct PatternSearch {
    pub initial_step: f64,
    pub min_step: f64,
    pub max_evaluations: usize,
}

impl Default for PatternSearch {
    fn default() -> Self {
        Self {
            initial_step: 10.0,
            min_step: 1e-2,
            max_evaluations: 50_000,
        }
    }
}

impl Optimizer for PatternSearch {
    fn name(&self) -> &'static str {
        "pattern-search"
    }

    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        x0: &[f64],
        lower: &[f64],
        upper: &[f64],
    ) -> Result<Solution, SolveError> {
        check_dims(x0, lower, upper)?;
        let mut x = x0.to_vec();
        project(&mut x, lower, upper);
        let mut f = objective(&x);
        if !f.is_finite() {
            return Err(SolveError::NonFiniteCost);
        }

        let mut step = self.initial_step;
        let mut evaluations = 1;
        let mut sweeps = 0;

        while step >= self.min_step {
            let mut improved = false;
            for i in 0..x.len() {
                for dir in [1.0, -1.0] {
                    if evaluations >= self.max_evaluations {
                        return Err(SolveError::NotConverged { iterations: sweeps });
                    }
                    let candidate = (x[i] + dir * step).clamp(lower[i], upper[i]);
                    if candidate == x[i] {
                        continue;
                    }
                    let old = x[i];
                    x[i] = candidate;
                    let ft = objective(&x);
                    evaluations += 1;
                    if ft.is_finite() && ft < f {
                        f = ft;
                        improved = true;
                        break;
                    }
                    x[i] = old;
                }
            }
            sweeps += 1;
            if !improved {
                step *= 0.5;
            }
        }

        Ok(Solution {
            x,
            cost: f,
            iterations: sweeps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bowl(x: &[f64]) -> f64 {
        (x[0] - 3.0).powi(2) + 2.0 * (x[1] + 2.0).powi(2)
    }

    fn solvers() -> Vec<Box<dyn Optimizer>> {
        vec![
            Box::new(ProjectedGradient {
                rel_tolerance: 1e-10,
                ..ProjectedGradient::default()
            }),
            Box::new(PatternSearch {
                min_step: 1e-4,
                ..PatternSearch::default()
            }),
        ]
    }

    #[test]
    fn finds_constrained_minimum() {
        for s in solvers() {
            let sol = s.minimize(&bowl, &[8.0, 5.0], &[0.0, 0.0], &[10.0, 10.0]).unwrap();
            assert!((sol.x[0] - 3.0).abs() < 1e-2, "{}: {:?}", s.name(), sol.x);
            assert!(sol.x[1].abs() < 1e-9, "{}: {:?}", s.name(), sol.x);
        }
    }

    #[test]
    fn start_point_is_projected() {
        for s in solvers() {
            let sol = s.minimize(&bowl, &[50.0, -50.0], &[-1.0, -1.0], &[1.0, 1.0]).unwrap();
            assert!(sol.x.iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn non_finite_start_is_an_error() {
        let nan = |_: &[f64]| f64::NAN;
        for s in solvers() {
            assert_eq!(
                s.minimize(&nan, &[0.0], &[-1.0], &[1.0]),
                Err(SolveError::NonFiniteCost)
            );
        }
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let s = ProjectedGradient::default();
        assert!(matches!(
            s.minimize(&bowl, &[0.0, 0.0], &[0.0], &[1.0, 1.0]),
            Err(SolveError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn one_sided_plateau_still_has_a_gradient() {
        // Flat for x > 1, rising to the left of it, like a command clamped at full output.
        let clamped = |x: &[f64]| {
            let u = x[0].min(1.0);
            (u - 0.2).powi(2)
        };
        let sol = ProjectedGradient::default()
            .minimize(&clamped, &[1.0], &[-5.0], &[5.0])
            .unwrap();
        assert!((sol.x[0] - 0.2).abs() < 1e-2, "{:?}", sol.x);
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let s = ProjectedGradient {
            max_iterations: 1,
            rel_tolerance: 0.0,
            initial_step: 1e-3,
        };
        assert_eq!(
            s.minimize(&bowl, &[8.0, 5.0], &[0.0, 0.0], &[10.0, 10.0]),
            Err(SolveError::NotConverged { iterations: 1 })
        );
    }
}
