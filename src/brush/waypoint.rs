use kurbo::Point;

// ============================================================================
// WAYPOINTS + CURVE SUBDIVISION
// ============================================================================

/// One pointer sample: position plus stylus pressure in [0, 1].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Waypoint {
    pub pos: Point,
    pub pressure: f64,
}

impl Waypoint {
    pub fn new(pos: Point, pressure: f64) -> Self {
        Self { pos, pressure }
    }
}

/// x(t) = c0 + c1*t + c2*t^2 + c3*t^3
#[derive(Clone, Copy, Debug)]
pub struct CubicPolynomial {
    c0: f64,
    c1: f64,
    c2: f64,
    c3: f64,
}

impl CubicPolynomial {
    pub fn eval(&self, t: f64) -> f64 {
        let t2 = t * t;
        self.c0 + self.c1 * t + self.c2 * t2 + self.c3 * t2 * t
    }

    /// The cubic with x(0) = x0, x(1) = x1, x'(0) = t0, x'(1) = t1.
    fn from_slopes(x0: f64, x1: f64, t0: f64, t1: f64) -> Self {
        Self {
            c0: x0,
            c1: t0,
            c2: -3.0 * x0 + 3.0 * x1 - 2.0 * t0 - t1,
            c3: 2.0 * x0 - 2.0 * x1 + t0 + t1,
        }
    }
}

/// Uniform Catmull-Rom through x1..x2 (used for pressure).
pub fn catmull_rom(x0: f64, x1: f64, x2: f64, x3: f64) -> CubicPolynomial {
    CubicPolynomial::from_slopes(x1, x2, (x2 - x0) * 0.5, (x3 - x1) * 0.5)
}

fn non_uniform_catmull_rom(
    x0: f64,
    x1: f64,
    x2: f64,
    x3: f64,
    dt0: f64,
    dt1: f64,
    dt2: f64,
) -> CubicPolynomial {
    let t1 = (x1 - x0) / dt0 - (x2 - x0) / (dt0 + dt1) + (x2 - x1) / dt1;
    let t2 = (x2 - x1) / dt1 - (x3 - x1) / (dt1 + dt2) + (x3 - x2) / dt2;
    CubicPolynomial::from_slopes(x1, x2, t1 * dt1, t2 * dt1)
}

/// Centripetal Catmull-Rom through p1..p2.  The knot intervals use
/// `dt = |Δp|^0.5` (distance to the 1/2 power), which avoids cusps and
/// self-intersections on sharp turns.  Degenerate intervals fall back to
/// their neighbor rather than erroring.
pub fn centripetal_catmull_rom(
    p0: Point,
    p1: Point,
    p2: Point,
    p3: Point,
) -> (CubicPolynomial, CubicPolynomial) {
    let mut dt0 = (p1 - p0).length_squared().powf(0.25);
    let mut dt1 = (p2 - p1).length_squared().powf(0.25);
    let mut dt2 = (p3 - p2).length_squared().powf(0.25);

    if dt1 < 1e-4 {
        dt1 = 1.0;
    }
    if dt0 < 1e-4 {
        dt0 = dt1;
    }
    if dt2 < 1e-4 {
        dt2 = dt1;
    }

    (
        non_uniform_catmull_rom(p0.x, p1.x, p2.x, p3.x, dt0, dt1, dt2),
        non_uniform_catmull_rom(p0.y, p1.y, p2.y, p3.y, dt0, dt1, dt2),
    )
}

/// Walk the straight segment start→end, emitting dab centers every spacing
/// unit.  `offset` is the distance still owed before the first dab; the
/// returned offset carries the remainder into the next segment so spacing
/// stays continuous across segment (and call) boundaries.
pub fn subdivide(
    start: Waypoint,
    end: Waypoint,
    spacing_for: &impl Fn(&Waypoint) -> f64,
    offset: f64,
) -> (Vec<Waypoint>, f64) {
    let diff = end.pos - start.pos;
    let len = diff.length();
    if len == 0.0 {
        return (Vec::new(), 0.0);
    }

    let mut waypoints = Vec::new();
    let dir = diff / len;
    let pressure_per_len = (end.pressure - start.pressure) / len;
    let mut remaining = len;
    let mut spacing = offset;

    loop {
        if remaining < spacing {
            return (waypoints, spacing - remaining);
        }
        remaining -= spacing;
        let current = len - remaining;
        let wp = Waypoint::new(
            start.pos + dir * current,
            start.pressure + pressure_per_len * current,
        );
        spacing = spacing_for(&wp).max(1.0);
        waypoints.push(wp);
    }
}

const CURVE_SAMPLES: usize = 100;

/// Fit a centripetal Catmull-Rom segment through start→end (with prev/next
/// as outer control points) and resample it at dab spacing.
pub fn subdivide_curve(
    prev: Waypoint,
    start: Waypoint,
    end: Waypoint,
    next: Waypoint,
    spacing_for: &impl Fn(&Waypoint) -> f64,
    offset: f64,
) -> (Vec<Waypoint>, f64) {
    let (cx, cy) = centripetal_catmull_rom(prev.pos, start.pos, end.pos, next.pos);
    let cp = catmull_rom(prev.pressure, start.pressure, end.pressure, next.pressure);

    let mut waypoints = Vec::new();
    let mut last = start;
    let mut next_offset = offset;

    for i in 1..=CURVE_SAMPLES {
        let t = i as f64 / CURVE_SAMPLES as f64;
        let wp = Waypoint::new(Point::new(cx.eval(t), cy.eval(t)), cp.eval(t));
        let (mut emitted, carried) = subdivide(last, wp, spacing_for, next_offset);
        next_offset = carried;
        waypoints.append(&mut emitted);
        last = wp;
    }
    (waypoints, next_offset)
}
