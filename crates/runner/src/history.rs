use std::collections::VecDeque;

use serde::Serialize;

/// Span of simulated time kept for display, s.
pub const WINDOW_S: f64 = 500.0;

/// Number of samples that cover [`WINDOW_S`] at the given step.
pub fn window_len(step_s: f64) -> usize {
    if !step_s.is_finite() || step_s <= 0.0 {
        return 1;
    }
    (WINDOW_S / step_s).round().max(1.0) as usize
}

/// One published cycle. Temperatures are the noisy sensor readings in °C.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Sample {
    pub t_s: f64,
    pub t1_c: f64,
    pub t2_c: f64,
    pub q1: f64,
    pub q2: f64,
    pub sp1_c: f64,
    pub sp2_c: f64,
}

impl Sample {
    pub fn new(t_s: f64, temp_c: [f64; 2], command: [f64; 2], setpoint_c: [f64; 2]) -> Self {
        Self {
            t_s,
            t1_c: temp_c[0],
            t2_c: temp_c[1],
            q1: command[0],
            q2: command[1],
            sp1_c: setpoint_c[0],
            sp2_c: setpoint_c[1],
        }
    }

    pub fn temps(&self) -> [f64; 2] {
        [self.t1_c, self.t2_c]
    }

    pub fn commands(&self) -> [f64; 2] {
        [self.q1, self.q2]
    }

    pub fn setpoints(&self) -> [f64; 2] {
        [self.sp1_c, self.sp2_c]
    }
}

/// Column view of the history, ready for plotting.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Series {
    pub t_s: Vec<f64>,
    pub temp_c: [Vec<f64>; 2],
    pub command: [Vec<f64>; 2],
    pub setpoint_c: [Vec<f64>; 2],
}

/// Sliding window of samples; the oldest is evicted once full.
#[derive(Clone, Debug)]
pub struct History {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the window size, dropping the oldest samples if it shrinks.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn push(&mut self, sample: Sample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// The sample before [`History::latest`].
    pub fn previous(&self) -> Option<&Sample> {
        self.samples.len().checked_sub(2).and_then(|i| self.samples.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn series(&self) -> Series {
        let mut s = Series::default();
        for x in &self.samples {
            s.t_s.push(x.t_s);
            let (temps, commands, setpoints) = (x.temps(), x.commands(), x.setpoints());
            for z in 0..2 {
                s.temp_c[z].push(temps[z]);
                s.command[z].push(commands[z]);
                s.setpoint_c[z].push(setpoints[z]);
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: usize) -> Sample {
        Sample::new(i as f64, [20.0, 21.0], [0.0, 100.0], [30.0, 30.0])
    }

    #[test]
    fn window_len_follows_step() {
        assert_eq!(window_len(4.0), 125);
        assert_eq!(window_len(3.0), 167);
        assert_eq!(window_len(10.0), 50);
        assert_eq!(window_len(0.0), 1);
    }

    #[test]
    fn evicts_oldest_first() {
        let maxtime = window_len(4.0);
        for k in [1, 2, 50, 300] {
            let mut h = History::new(maxtime);
            for i in 0..maxtime + k {
                h.push(sample(i));
            }
            assert_eq!(h.len(), maxtime);
            assert_eq!(h.iter().next().unwrap().t_s, k as f64);
            assert_eq!(h.latest().unwrap().t_s, (maxtime + k - 1) as f64);
        }
    }

    #[test]
    fn shrinking_drops_oldest() {
        let mut h = History::new(10);
        for i in 0..10 {
            h.push(sample(i));
        }
        h.set_capacity(4);
        assert_eq!(h.len(), 4);
        assert_eq!(h.iter().next().unwrap().t_s, 6.0);
    }

    #[test]
    fn latest_and_previous() {
        let mut h = History::new(5);
        assert!(h.latest().is_none());
        h.push(sample(0));
        assert!(h.previous().is_none());
        h.push(sample(1));
        assert_eq!(h.previous().unwrap().t_s, 0.0);
        assert_eq!(h.latest().unwrap().t_s, 1.0);
    }

    #[test]
    fn series_is_columnar() {
        let mut h = History::new(5);
        h.push(sample(0));
        h.push(sample(1));
        let s = h.series();
        assert_eq!(s.t_s, vec![0.0, 1.0]);
        assert_eq!(s.temp_c[1], vec![21.0, 21.0]);
        assert_eq!(s.command[1], vec![100.0, 100.0]);
        assert_eq!(s.setpoint_c[0], vec![30.0, 30.0]);
    }
}
