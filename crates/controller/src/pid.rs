use crate::{ControlInput, Controller, COMMAND_MAX, COMMAND_MIN};

/// Integral gain used when the reset time is zero.
const KI_NO_RESET: f64 = 1e5;

/// Gains in the controller-gain / reset-time / rate-time form.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PidConfig {
    /// Controller gain Kc, %/K.
    pub gain: f64,
    /// Integral (reset) time τI, s. Zero gives a very large integral gain.
    pub reset_s: f64,
    /// Derivative (rate) time τD, s.
    pub rate_s: f64,
    /// Output with zero error and empty integral.
    pub bias: f64,
    pub out_min: f64,
    pub out_max: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            gain: 10.0,
            reset_s: 50.0,
            rate_s: 1.0,
            bias: 0.0,
            out_min: COMMAND_MIN,
            out_max: COMMAND_MAX,
        }
    }
}

impl PidConfig {
    pub fn kp(&self) -> f64 {
        self.gain
    }

    pub fn ki(&self) -> f64 {
        if self.reset_s == 0.0 {
            KI_NO_RESET
        } else {
            self.gain / self.reset_s
        }
    }

    pub fn kd(&self) -> f64 {
        self.gain * self.rate_s
    }
}

/// One evaluation of the PID law, split into its terms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PidTerms {
    pub output: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub saturated: bool,
}

#[derive(Clone, Debug)]
pub struct Pid {
    cfg: PidConfig,
    integral: f64,
}

impl Pid {
    pub fn new(cfg: PidConfig) -> Self {
        Self { cfg, integral: 0.0 }
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
    }

    pub fn set_config(&mut self, cfg: PidConfig) {
        self.cfg = cfg;
    }

    pub fn config(&self) -> &PidConfig {
        &self.cfg
    }

    /// Accumulated integral contribution, already scaled by Ki.
    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Update PID given setpoint and the last two measurements.
    ///
    /// The derivative acts on the measurement, not the error, so setpoint
    /// steps do not kick the output. When the unclamped output leaves
    /// `[out_min, out_max]` this cycle's integral contribution is undone and
    /// the output is clamped.
    pub fn update(&mut self, setpoint: f64, measurement: f64, previous: f64, dt_s: f64) -> PidTerms {
        let error = setpoint - measurement;
        let ki = self.cfg.ki();

        let before = self.integral;
        self.integral += ki * error * dt_s;

        let dpv = if dt_s > 0.0 {
            (measurement - previous) / dt_s
        } else {
            0.0
        };

        let p = self.cfg.kp() * error;
        let d = -self.cfg.kd() * dpv;
        let mut output = self.cfg.bias + p + self.integral + d;

        let saturated = output < self.cfg.out_min || output > self.cfg.out_max;
        if saturated {
            self.integral = before;
            output = output.clamp(self.cfg.out_min, self.cfg.out_max);
        }

        PidTerms {
            output,
            p,
            i: self.integral,
            d,
            saturated,
        }
    }
}

/// Independent PID loops for the two zones.
#[derive(Clone, Debug)]
pub struct PidPair {
    loops: [Pid; 2],
}

impl PidPair {
    pub fn new(cfg: [PidConfig; 2]) -> Self {
        Self {
            loops: cfg.map(Pid::new),
        }
    }

    pub fn set_config(&mut self, cfg: [PidConfig; 2]) {
        for (pid, c) in self.loops.iter_mut().zip(cfg) {
            pid.set_config(c);
        }
    }

    pub fn zone(&self, i: usize) -> &Pid {
        &self.loops[i]
    }
}

impl Default for PidPair {
    fn default() -> Self {
        Self::new([PidConfig::default(); 2])
    }
}

impl Controller for PidPair {
    fn compute(&mut self, input: &ControlInput) -> [f64; 2] {
        let mut out = [0.0; 2];
        for (i, pid) in self.loops.iter_mut().enumerate() {
            let terms = pid.update(
                input.setpoint[i],
                input.measured[i],
                input.previous[i],
                input.dt_s,
            );
            log::debug!(
                "pid zone {}: P={:.2} I={:.2} D={:.2} out={:.2}",
                i + 1,
                terms.p,
                terms.i,
                terms.d,
                terms.output
            );
            out[i] = terms.output;
        }
        out
    }

    fn reset(&mut self) {
        for pid in &mut self.loops {
            pid.reset();
        }
    }
}
