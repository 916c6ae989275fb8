//! Zone proximity checks and checkpoint zone derivation.

use crate::geo::distance_m;
use crate::models::{GeoPoint, Waypoint, WaypointKind, Zone, ZoneEffect};

/// Return every zone whose center is within its radius of `position`.
///
/// Detection is purely distance-based. Interpolated positions never compare
/// equal to a stored coordinate, so coordinate equality is never consulted.
pub fn zones_within<'a>(position: GeoPoint, zones: &'a [Zone]) -> Vec<&'a Zone> {
    zones
        .iter()
        .filter(|zone| distance_m(position, zone.center) < zone.radius_m)
        .collect()
}

/// Derive one pause zone per intermediate stop of an itinerary.
///
/// Zone ids are `checkpoint-<n>` where `n` is the waypoint's index in the
/// itinerary, so events about the zone can be traced back to the stop.
pub fn checkpoint_zones(waypoints: &[Waypoint], radius_m: f64, dwell_ms: u64) -> Vec<Zone> {
    waypoints
        .iter()
        .enumerate()
        .filter(|(_, waypoint)| waypoint.kind == WaypointKind::Checkpoint)
        .map(|(index, waypoint)| Zone {
            id: format!("checkpoint-{index}"),
            center: waypoint.point,
            radius_m,
            effect: ZoneEffect::Pause { dwell_ms },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::meters_to_lat;

    fn pause_zone(id: &str, center: GeoPoint, radius_m: f64) -> Zone {
        Zone {
            id: id.to_string(),
            center,
            radius_m,
            effect: ZoneEffect::Pause { dwell_ms: 5000 },
        }
    }

    #[test]
    fn position_inside_radius_matches() {
        let center = GeoPoint::new(22.9351, 88.5294);
        let zones = vec![pause_zone("traffic-1", center, 100.0)];
        // 50m north of the center
        let position = GeoPoint::new(center.lat + meters_to_lat(50.0, center.lat), center.lon);
        assert_eq!(zones_within(position, &zones).len(), 1);
    }

    #[test]
    fn position_outside_radius_does_not_match() {
        let center = GeoPoint::new(22.9351, 88.5294);
        let zones = vec![pause_zone("traffic-1", center, 100.0)];
        let position = GeoPoint::new(center.lat + meters_to_lat(150.0, center.lat), center.lon);
        assert!(zones_within(position, &zones).is_empty());
    }

    #[test]
    fn boundary_distance_is_exclusive() {
        let center = GeoPoint::new(0.0, 0.0);
        let zones = vec![pause_zone("z", center, 100.0)];
        let position = GeoPoint::new(meters_to_lat(100.0, 0.0), 0.0);
        // distance == radius is outside
        assert!(zones_within(position, &zones).is_empty());
    }

    #[test]
    fn checkpoint_zones_skip_terminals() {
        let waypoints = vec![
            Waypoint::origin(22.97, 88.43),
            Waypoint::checkpoint(22.94, 88.43),
            Waypoint::checkpoint(22.91, 88.42),
            Waypoint::destination(22.88, 88.42),
        ];
        let zones = checkpoint_zones(&waypoints, 50.0, 10_000);
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].id, "checkpoint-1");
        assert_eq!(zones[1].id, "checkpoint-2");
        assert!(matches!(
            zones[0].effect,
            ZoneEffect::Pause { dwell_ms: 10_000 }
        ));
    }
}
