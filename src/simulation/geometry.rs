//! Planar geometry helpers used by the road network and vehicle motion

use super::types::{Direction, Position};

/// Determinants below this are treated as parallel lines
const PARALLEL_EPSILON: f64 = 1e-9;

/// Slack on the segment parameters so junctions that land exactly on an
/// endpoint survive floating point rounding
const PARAMETER_SLACK: f64 = 1e-9;

/// Intersection point of the segments `a1-a2` and `b1-b2`.
///
/// Returns `None` for parallel (including collinear) or degenerate
/// segments, and when the lines cross outside either segment.
pub fn segment_intersection(
    a1: Position,
    a2: Position,
    b1: Position,
    b2: Position,
) -> Option<Position> {
    let rx = a2.x - a1.x;
    let ry = a2.y - a1.y;
    let sx = b2.x - b1.x;
    let sy = b2.y - b1.y;

    let denominator = rx * sy - ry * sx;
    if denominator.abs() < PARALLEL_EPSILON {
        return None;
    }

    let qpx = b1.x - a1.x;
    let qpy = b1.y - a1.y;
    let t = (qpx * sy - qpy * sx) / denominator;
    let u = (qpx * ry - qpy * rx) / denominator;

    let within = |v: f64| (-PARAMETER_SLACK..=1.0 + PARAMETER_SLACK).contains(&v);
    if within(t) && within(u) {
        Some(Position::new(a1.x + t * rx, a1.y + t * ry))
    } else {
        None
    }
}

/// Cardinal direction of the displacement `from -> to`.
///
/// Ties between the axes resolve to the horizontal one. Map coordinates
/// grow downwards, so a positive y displacement is heading south.
pub fn cardinal_direction(from: Position, to: Position) -> Direction {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    if dx.abs() >= dy.abs() {
        if dx >= 0.0 {
            Direction::East
        } else {
            Direction::West
        }
    } else if dy > 0.0 {
        Direction::South
    } else {
        Direction::North
    }
}

/// Smoothstep easing on [0, 1]
pub fn ease_in_out(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Position along a two-leg turn: `origin -> junction` during the first
/// half of `progress`, `junction -> destination` during the second, each
/// leg eased.
pub fn turn_position(
    origin: Position,
    junction: Position,
    destination: Position,
    progress: f64,
) -> Position {
    if progress < 0.5 {
        origin.lerp(&junction, ease_in_out(progress * 2.0))
    } else {
        junction.lerp(&destination, ease_in_out((progress - 0.5) * 2.0))
    }
}

/// Parameter of the projection of `point` onto `start-end`, clamped to [0, 1]
pub fn project_onto_segment(point: Position, start: Position, end: Position) -> f64 {
    let vx = end.x - start.x;
    let vy = end.y - start.y;
    let length_sq = vx * vx + vy * vy;
    if length_sq < 0.001 {
        return 0.0;
    }
    (((point.x - start.x) * vx + (point.y - start.y) * vy) / length_sq).clamp(0.0, 1.0)
}
