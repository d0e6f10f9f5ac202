use kurbo::Point;

use super::waypoint::Waypoint;

/// FIR low-pass over pointer samples: each output is the unweighted average
/// of a `2k+1` window of raw inputs (k = stabilizing level).  Output lags
/// the pen by k samples; `finish` flushes the tail with windows clamped to
/// the available samples so the stroke still reaches its true endpoint.
pub struct StabilizeFilter {
    level: usize,
    samples: Vec<Waypoint>,
}

impl StabilizeFilter {
    pub fn new(level: usize) -> Self {
        Self {
            level,
            samples: Vec::new(),
        }
    }

    fn averaged(&self, index: usize) -> Waypoint {
        let level = self.level as isize;
        let last = self.samples.len() as isize - 1;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_pressure = 0.0;
        for i in (index as isize - level)..=(index as isize + level) {
            let wp = &self.samples[i.clamp(0, last) as usize];
            sum_x += wp.pos.x;
            sum_y += wp.pos.y;
            sum_pressure += wp.pressure;
        }
        let count = (level * 2 + 1) as f64;
        Waypoint::new(Point::new(sum_x / count, sum_y / count), sum_pressure / count)
    }

    /// Feed one raw sample, collecting any stabilized outputs into `out`.
    pub fn next(&mut self, waypoint: Waypoint, out: &mut Vec<Waypoint>) {
        self.samples.push(waypoint);
        let window = self.level * 2 + 1;
        if self.samples.len() == window {
            // Window just filled: emit the clamped-window head first.
            for i in 0..self.level {
                out.push(self.averaged(i));
            }
        }
        if self.samples.len() >= window {
            out.push(self.averaged(self.samples.len() - 1 - self.level));
        }
    }

    /// Flush the trailing samples with shrinking windows and reset.
    pub fn finish(&mut self, out: &mut Vec<Waypoint>) {
        let window = self.level * 2 + 1;
        let first_unemitted = if self.samples.len() >= window {
            self.samples.len() - self.level
        } else {
            0
        };
        for i in first_unemitted..self.samples.len() {
            out.push(self.averaged(i));
        }
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(level: usize, inputs: &[(f64, f64)]) -> Vec<Waypoint> {
        let mut filter = StabilizeFilter::new(level);
        let mut out = Vec::new();
        for &(x, y) in inputs {
            filter.next(Waypoint::new(Point::new(x, y), 1.0), &mut out);
        }
        filter.finish(&mut out);
        out
    }

    #[test]
    fn level_zero_passes_samples_through() {
        let out = run(0, &[(0.0, 0.0), (1.0, 2.0), (3.0, 4.0)]);
        let xs: Vec<f64> = out.iter().map(|w| w.pos.x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 3.0]);
    }

    #[test]
    fn output_count_matches_input_count() {
        for n in 1..10 {
            let inputs: Vec<(f64, f64)> = (0..n).map(|i| (i as f64, 0.0)).collect();
            assert_eq!(run(2, &inputs).len(), n, "n = {n}");
        }
    }

    #[test]
    fn colinear_input_stays_colinear() {
        let inputs: Vec<(f64, f64)> = (0..20).map(|i| (i as f64, 5.0)).collect();
        for wp in run(2, &inputs) {
            assert!((wp.pos.y - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn averaging_pulls_in_a_jittered_sample() {
        // The middle sample spikes off the line; its stabilized position
        // must sit between the line and the spike.
        let out = run(1, &[(0.0, 0.0), (1.0, 3.0), (2.0, 0.0)]);
        assert_eq!(out.len(), 3);
        assert!((out[1].pos.y - 1.0).abs() < 1e-9);
        assert!(out[1].pos.y < 3.0);
    }

    #[test]
    fn endpoints_are_biased_toward_the_true_ends() {
        let inputs: Vec<(f64, f64)> = (0..30).map(|i| (i as f64, 0.0)).collect();
        let out = run(2, &inputs);
        // Clamped windows keep the first output near x=0 and the last near
        // x=29 instead of chopping k samples off each end.
        assert!(out[0].pos.x < 1.5);
        assert!(out[out.len() - 1].pos.x > 27.5);
    }
}
