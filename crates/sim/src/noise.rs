use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};

/// Symmetric uniform noise source in `[-half_width, half_width)`.
///
/// A zero half width turns the source off, which is how tests get a
/// deterministic plant.
#[derive(Clone, Debug)]
pub struct Noise {
    half_width: f64,
    dist: Option<Uniform<f64>>,
    rng: StdRng,
}

impl Noise {
    pub fn new(half_width: f64, seed: Option<u64>) -> Self {
        let half_width = if half_width.is_finite() { half_width.abs() } else { 0.0 };
        let dist = (half_width > 0.0).then(|| Uniform::new(-half_width, half_width));
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            half_width,
            dist,
            rng,
        }
    }

    pub fn off() -> Self {
        Self::new(0.0, Some(0))
    }

    pub fn half_width(&self) -> f64 {
        self.half_width
    }

    pub fn sample(&mut self) -> f64 {
        match &self.dist {
            Some(d) => d.sample(&mut self.rng),
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_inside_band() {
        let mut n = Noise::new(0.5, Some(7));
        for _ in 0..1000 {
            let v = n.sample();
            assert!((-0.5..0.5).contains(&v));
        }
    }

    #[test]
    fn off_is_silent() {
        let mut n = Noise::off();
        assert_eq!(n.sample(), 0.0);
        assert_eq!(n.half_width(), 0.0);
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Noise::new(0.5, Some(42));
        let mut b = Noise::new(0.5, Some(42));
        for _ in 0..10 {
            assert_eq!(a.sample(), b.sample());
        }
    }
}
