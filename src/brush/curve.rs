use super::waypoint::{self, Waypoint};

/// Resamples stabilized waypoints into dab centers.  Keeps the last four
/// waypoints and, once at least three are buffered, fits a centripetal
/// Catmull-Rom segment through the middle pair, duplicating endpoints while
/// the buffer is still short.  The fractional dab offset is carried across
/// calls so spacing is continuous over the whole stroke.
pub struct CurveFilter {
    last: Vec<Waypoint>,
    next_offset: f64,
}

impl Default for CurveFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl CurveFilter {
    pub fn new() -> Self {
        Self {
            last: Vec::new(),
            next_offset: 0.0,
        }
    }

    /// Feed one stabilized waypoint, collecting emitted dab centers.
    pub fn next(
        &mut self,
        waypoint: Waypoint,
        spacing_for: &impl Fn(&Waypoint) -> f64,
        out: &mut Vec<Waypoint>,
    ) {
        if self.last.len() == 4 {
            self.last.remove(0);
        }
        self.last.push(waypoint);

        let (waypoints, next_offset) = match self.last.len() {
            // The stroke's first waypoint is always a dab.
            1 => (vec![waypoint], spacing_for(&waypoint).max(1.0)),
            2 => (Vec::new(), self.next_offset),
            3 => waypoint::subdivide_curve(
                self.last[0],
                self.last[0],
                self.last[1],
                self.last[2],
                spacing_for,
                self.next_offset,
            ),
            _ => waypoint::subdivide_curve(
                self.last[0],
                self.last[1],
                self.last[2],
                self.last[3],
                spacing_for,
                self.next_offset,
            ),
        };
        self.next_offset = next_offset;
        out.extend(waypoints);
    }

    /// Flush the curve tail with a duplicated final control point and reset.
    pub fn finish(&mut self, spacing_for: &impl Fn(&Waypoint) -> f64, out: &mut Vec<Waypoint>) {
        let (waypoints, _) = match self.last.len() {
            0 | 1 => (Vec::new(), 0.0),
            2 => waypoint::subdivide(self.last[0], self.last[1], spacing_for, self.next_offset),
            3 => waypoint::subdivide_curve(
                self.last[0],
                self.last[1],
                self.last[2],
                self.last[2],
                spacing_for,
                self.next_offset,
            ),
            _ => waypoint::subdivide_curve(
                self.last[1],
                self.last[2],
                self.last[3],
                self.last[3],
                spacing_for,
                self.next_offset,
            ),
        };
        out.extend(waypoints);
        self.last.clear();
        self.next_offset = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use kurbo::Point;

    use super::*;

    fn spacing(_: &Waypoint) -> f64 {
        2.0
    }

    fn run(inputs: &[(f64, f64)]) -> Vec<Waypoint> {
        let mut filter = CurveFilter::new();
        let mut out = Vec::new();
        for &(x, y) in inputs {
            filter.next(Waypoint::new(Point::new(x, y), 1.0), &spacing, &mut out);
        }
        filter.finish(&spacing, &mut out);
        out
    }

    #[test]
    fn single_waypoint_emits_one_dab() {
        let out = run(&[(10.0, 10.0)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pos, Point::new(10.0, 10.0));
    }

    #[test]
    fn two_waypoints_fall_back_to_a_straight_segment() {
        let out = run(&[(0.0, 0.0), (10.0, 0.0)]);
        assert!(out.len() >= 4);
        for wp in &out {
            assert!(wp.pos.y.abs() < 1e-9);
            assert!((-1e-9..=10.0 + 1e-9).contains(&wp.pos.x));
        }
    }

    #[test]
    fn colinear_stroke_keeps_constant_spacing_across_calls() {
        // Constant-velocity colinear input; dab gaps must stay at the
        // configured spacing regardless of where the call boundaries fall.
        let inputs: Vec<(f64, f64)> = (0..=20).map(|i| (i as f64 * 5.0, 0.0)).collect();
        let out = run(&inputs);
        assert!(out.len() > 10);
        for pair in out.windows(2) {
            let gap = (pair[1].pos - pair[0].pos).length();
            assert!(
                (gap - 2.0).abs() < 0.05,
                "gap {gap} deviates from dab spacing"
            );
        }
    }

    #[test]
    fn stroke_covers_the_full_input_span() {
        let inputs: Vec<(f64, f64)> = (0..=10).map(|i| (i as f64 * 3.0, 0.0)).collect();
        let out = run(&inputs);
        let max_x = out.iter().map(|w| w.pos.x).fold(f64::MIN, f64::max);
        // The flush brings the curve to (or very near) the final waypoint.
        assert!(max_x > 28.0);
    }

    #[test]
    fn filter_resets_between_strokes() {
        let mut filter = CurveFilter::new();
        let mut out = Vec::new();
        filter.next(Waypoint::new(Point::new(0.0, 0.0), 1.0), &spacing, &mut out);
        filter.finish(&spacing, &mut out);
        out.clear();
        filter.next(Waypoint::new(Point::new(50.0, 0.0), 1.0), &spacing, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pos, Point::new(50.0, 0.0));
    }
}
