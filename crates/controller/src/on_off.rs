use crate::{ControlInput, Controller, COMMAND_MAX, COMMAND_MIN};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OnOffConfig {
    /// Half width of the hysteresis band around each setpoint, K.
    pub deadband_k: [f64; 2],
}

impl Default for OnOffConfig {
    fn default() -> Self {
        Self {
            deadband_k: [0.1, 0.1],
        }
    }
}

/// Relay controller with hysteresis.
#[derive(Clone, Copy, Debug, Default)]
pub struct OnOff {
    cfg: OnOffConfig,
}

impl OnOff {
    pub fn new(cfg: OnOffConfig) -> Self {
        Self { cfg }
    }

    pub fn set_config(&mut self, cfg: OnOffConfig) {
        self.cfg = cfg;
    }

    /// Full on below the band, off above it, unchanged inside it.
    pub fn switch(deadband: f64, setpoint: f64, measured: f64, previous_command: f64) -> f64 {
        if measured < setpoint - deadband {
            COMMAND_MAX
        } else if measured > setpoint + deadband {
            COMMAND_MIN
        } else {
            previous_command
        }
    }
}

impl Controller for OnOff {
    fn compute(&mut self, input: &ControlInput) -> [f64; 2] {
        [0, 1].map(|i| {
            Self::switch(
                self.cfg.deadband_k[i],
                input.setpoint[i],
                input.measured[i],
                input.command[i],
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(measured: [f64; 2], command: [f64; 2]) -> ControlInput {
        ControlInput {
            setpoint: [30.0, 40.0],
            measured,
            previous: measured,
            dt_s: 4.0,
            command,
        }
    }

    #[test]
    fn switches_outside_band() {
        let mut c = OnOff::new(OnOffConfig {
            deadband_k: [0.5, 0.5],
        });
        assert_eq!(c.compute(&input([29.0, 41.0], [0.0, 100.0])), [100.0, 0.0]);
    }

    #[test]
    fn holds_inside_band() {
        let mut c = OnOff::default();
        for prev in [0.0, 37.5, 100.0] {
            for m in [29.95, 30.0, 30.05] {
                let out = c.compute(&input([m, 39.95], [prev, prev]));
                assert_eq!(out, [prev, prev]);
            }
        }
    }

    #[test]
    fn band_edges_hold() {
        // Strict comparisons: exactly on the edge is still inside.
        assert_eq!(OnOff::switch(1.0, 30.0, 29.0, 42.0), 42.0);
        assert_eq!(OnOff::switch(1.0, 30.0, 31.0, 42.0), 42.0);
    }

    #[test]
    fn zero_deadband_is_a_plain_threshold() {
        assert_eq!(OnOff::switch(0.0, 30.0, 29.99, 0.0), 100.0);
        assert_eq!(OnOff::switch(0.0, 30.0, 30.01, 100.0), 0.0);
    }
}
