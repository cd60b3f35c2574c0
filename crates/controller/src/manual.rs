use crate::{clamp_command, ControlInput, Controller};

/// Passes through the last command set by the user.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Manual {
    command: [f64; 2],
}

impl Manual {
    pub fn new(command: [f64; 2]) -> Self {
        let mut m = Self::default();
        m.set_command(command);
        m
    }

    pub fn set_command(&mut self, command: [f64; 2]) {
        self.command = [clamp_command(command[0]), clamp_command(command[1])];
    }

    pub fn command(&self) -> [f64; 2] {
        self.command
    }
}

impl Controller for Manual {
    fn compute(&mut self, _input: &ControlInput) -> [f64; 2] {
        self.command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_measurements() {
        let mut m = Manual::new([35.0, 120.0]);
        let input = ControlInput {
            setpoint: [30.0, 30.0],
            measured: [50.0, 10.0],
            previous: [50.0, 10.0],
            dt_s: 4.0,
            command: [0.0, 0.0],
        };
        assert_eq!(m.compute(&input), [35.0, 100.0]);
    }
}
