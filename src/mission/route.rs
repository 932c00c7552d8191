//! Flat-plane kinematics along a waypoint route.

use crate::vehicle::Waypoint;

/// Distance under which a waypoint counts as already occupied.
const COINCIDENT: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Idle,
    Moved,
    Arrived,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Advance {
    pub position: Waypoint,
    pub index: usize,
    /// A waypoint was reached by this step.
    pub reached: bool,
    pub outcome: Outcome,
}

/// Moves at most `step` from `position` toward `route[index]`.
///
/// A waypoint within `step` is snapped to exactly, so a segment of length
/// `L` takes `ceil(L / step)` calls. Waypoints coincident with `position`
/// are passed over without consuming the step.
pub fn advance(position: Waypoint, route: &[Waypoint], index: usize, step: f64) -> Advance {
    if route.is_empty() {
        return Advance {
            position,
            index,
            reached: false,
            outcome: Outcome::Idle,
        };
    }

    let mut index = index.min(route.len());
    let mut reached = false;
    while index < route.len() && position.distance_to(&route[index]) < COINCIDENT {
        index += 1;
        reached = true;
    }

    let Some(target) = route.get(index) else {
        return Advance {
            position,
            index,
            reached,
            outcome: Outcome::Arrived,
        };
    };

    let distance = position.distance_to(target);
    let position = if distance <= step {
        index += 1;
        reached = true;
        *target
    } else {
        let ratio = step / distance;
        Waypoint::new(
            position.lat + (target.lat - position.lat) * ratio,
            position.lon + (target.lon - position.lon) * ratio,
        )
    };

    Advance {
        position,
        index,
        reached,
        outcome: if index == route.len() {
            Outcome::Arrived
        } else {
            Outcome::Moved
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_end(start: Waypoint, route: &[Waypoint], step: f64) -> (usize, Advance) {
        let mut position = start;
        let mut index = 0;
        for calls in 1..=10_000 {
            let next = advance(position, route, index, step);
            if next.outcome == Outcome::Arrived {
                return (calls, next);
            }
            position = next.position;
            index = next.index;
        }
        panic!("route never completed");
    }

    #[test]
    fn empty_route_is_idle() {
        let here = Waypoint::new(1.0, 2.0);
        let next = advance(here, &[], 0, 0.001);
        assert_eq!(next.outcome, Outcome::Idle);
        assert_eq!(next.position, here);
        assert!(!next.reached);
    }

    #[test]
    fn exhausted_route_reports_arrived_without_moving() {
        let route = [Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 1.0)];
        let here = Waypoint::new(5.0, 5.0);
        let next = advance(here, &route, 2, 0.001);
        assert_eq!(next.outcome, Outcome::Arrived);
        assert_eq!(next.position, here);
        assert_eq!(next.index, 2);
    }

    #[test]
    fn partial_step_moves_toward_target() {
        let route = [Waypoint::new(0.0, 0.0), Waypoint::new(3.0, 4.0)];
        let next = advance(route[0], &route, 1, 1.0);
        assert_eq!(next.outcome, Outcome::Moved);
        assert_eq!(next.index, 1);
        assert!(!next.reached);
        assert!((next.position.lat - 0.6).abs() < 1e-12);
        assert!((next.position.lon - 0.8).abs() < 1e-12);
    }

    #[test]
    fn coincident_waypoint_does_not_consume_step() {
        let route = [Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 0.002)];
        let first = advance(route[0], &route, 0, 0.001);
        assert_eq!(first.outcome, Outcome::Moved);
        assert_eq!(first.index, 1);
        assert!(first.reached);
        assert!((first.position.lon - 0.001).abs() < 1e-12);

        let second = advance(first.position, &route, first.index, 0.001);
        assert_eq!(second.outcome, Outcome::Arrived);
        assert_eq!(second.position, route[1]);
        assert_eq!(second.index, 2);
    }

    #[test]
    fn duplicate_waypoints_are_skipped() {
        let p = Waypoint::new(1.0, 1.0);
        let route = [p, p, p];
        let next = advance(p, &route, 0, 0.5);
        assert_eq!(next.outcome, Outcome::Arrived);
        assert_eq!(next.index, 3);
        assert_eq!(next.position, p);
    }

    #[test]
    fn segments_complete_within_bound() {
        let route = [
            Waypoint::new(0.0, 0.0),
            Waypoint::new(0.0, 0.0105),
            Waypoint::new(0.0042, 0.0105),
        ];
        let step = 0.001;
        let bound: usize = route
            .windows(2)
            .map(|pair| (pair[0].distance_to(&pair[1]) / step).ceil() as usize)
            .sum();

        let (calls, last) = run_to_end(route[0], &route, step);
        assert!(calls <= bound, "{} calls for bound {}", calls, bound);
        assert_eq!(last.position, route[2]);
        assert_eq!(last.index, route.len());
    }

    #[test]
    fn exact_multiple_of_step_is_not_overshot() {
        let route = [Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 0.5)];
        let (calls, _) = run_to_end(route[0], &route, 0.25);
        assert_eq!(calls, 2);
    }
}
