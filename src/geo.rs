//! Geospatial queries over WGS84 coordinates: great-circle distance, service-zone
//! containment and radius-bounded nearest search. Pure functions, no state.

use std::cmp::Ordering;

use geo_types::{Coord, LineString, Polygon};

use crate::entities::{Coordinates, ServiceZone};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Average city speed used for pickup estimates (km/h).
const AVG_CITY_SPEED_KMH: f64 = 25.0;
const MIN_ETA_MINUTES: u32 = 5;

const EDGE_EPSILON: f64 = 1e-12;

/// Haversine distance in kilometers.
///
/// The haversine term is clamped to `[0, 1]` so antipodal points stay finite, and
/// `atan2` keeps precision for nearly coincident points.
pub fn distance(a: Coordinates, b: Coordinates) -> f64 {
    if a == b {
        return 0.0;
    }

    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.lng - a.lng).to_radians();

    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlng = (dlng * 0.5).sin();
    let h = (sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlng * sin_dlng).clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

pub fn eta_minutes(distance_km: f64) -> u32 {
    let minutes = (distance_km / AVG_CITY_SPEED_KMH * 60.0).ceil();

    (minutes as u32).max(MIN_ETA_MINUTES)
}

/// Points on the boundary count as inside; points inside a hole do not.
pub fn contains(polygon: &Polygon<f64>, point: Coordinates) -> bool {
    let p: Coord<f64> = point.into();

    if on_ring(polygon.exterior(), p) {
        return true;
    }

    if !ring_contains(polygon.exterior(), p) {
        return false;
    }

    for hole in polygon.interiors() {
        if on_ring(hole, p) {
            return true;
        }
        if ring_contains(hole, p) {
            return false;
        }
    }

    true
}

/// Smallest zone containing the point, ties broken by zone id.
pub fn containing_zone(zones: &[ServiceZone], point: Coordinates) -> Option<&ServiceZone> {
    zones
        .iter()
        .filter(|zone| contains(&zone.boundary, point))
        .min_by(|a, b| {
            a.planar_area()
                .total_cmp(&b.planar_area())
                .then_with(|| a.id.cmp(&b.id))
        })
}

#[derive(Clone, Debug, PartialEq)]
pub struct Nearby<K> {
    pub key: K,
    pub position: Coordinates,
    pub distance_km: f64,
}

/// Up to `limit` candidates within `radius_km`, closest first, ties broken by key.
pub fn nearest<K, I>(origin: Coordinates, candidates: I, radius_km: f64, limit: usize) -> Vec<Nearby<K>>
where
    K: Ord,
    I: IntoIterator<Item = (K, Coordinates)>,
{
    let mut found: Vec<Nearby<K>> = candidates
        .into_iter()
        .map(|(key, position)| Nearby {
            distance_km: distance(origin, position),
            key,
            position,
        })
        .filter(|nearby| nearby.distance_km <= radius_km)
        .collect();

    found.sort_by(|a, b| match a.distance_km.total_cmp(&b.distance_km) {
        Ordering::Equal => a.key.cmp(&b.key),
        ordering => ordering,
    });
    found.truncate(limit);

    found
}

fn ring_contains(ring: &LineString<f64>, p: Coord<f64>) -> bool {
    let mut inside = false;

    for line in ring.lines() {
        let (a, b) = (line.start, line.end);

        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x {
                inside = !inside;
            }
        }
    }

    inside
}

fn on_ring(ring: &LineString<f64>, p: Coord<f64>) -> bool {
    ring.lines().any(|line| {
        let (a, b) = (line.start, line.end);
        let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);

        cross.abs() <= EDGE_EPSILON
            && p.x >= a.x.min(b.x) - EDGE_EPSILON
            && p.x <= a.x.max(b.x) + EDGE_EPSILON
            && p.y >= a.y.min(b.y) - EDGE_EPSILON
            && p.y <= a.y.max(b.y) + EDGE_EPSILON
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ZoneDefinition, ZoneType};

    fn zone(name: &str, exterior: Vec<[f64; 2]>) -> ServiceZone {
        ServiceZone::try_from(ZoneDefinition {
            name: name.into(),
            zone_type: ZoneType::Standard,
            exterior,
            interiors: vec![],
        })
        .unwrap()
    }

    fn square(min: f64, max: f64) -> Vec<[f64; 2]> {
        vec![[min, min], [max, min], [max, max], [min, max]]
    }

    #[test]
    fn distance_identity_and_symmetry() {
        let lagos = Coordinates::new(6.5244, 3.3792);
        let lekki = Coordinates::new(6.4698, 3.5852);

        assert_eq!(distance(lagos, lagos), 0.0);
        assert_eq!(distance(lagos, lekki), distance(lekki, lagos));

        // roughly 23 km across the lagoon
        let d = distance(lagos, lekki);
        assert!(d > 20.0 && d < 26.0, "{}", d);
    }

    #[test]
    fn distance_is_stable_for_antipodes_and_tiny_steps() {
        let a = Coordinates::new(0.0, 0.0);
        let antipode = Coordinates::new(0.0, 180.0);
        let half_circumference = std::f64::consts::PI * EARTH_RADIUS_KM;

        let d = distance(a, antipode);
        assert!(d.is_finite());
        assert!((d - half_circumference).abs() < 1e-6);

        let near = Coordinates::new(1e-9, 0.0);
        let tiny = distance(a, near);
        assert!(tiny > 0.0 && tiny < 1e-6);
    }

    #[test]
    fn triangle_inequality() {
        let points = [
            Coordinates::new(6.5244, 3.3792),
            Coordinates::new(6.4698, 3.5852),
            Coordinates::new(6.6018, 3.3515),
            Coordinates::new(9.0765, 7.3986),
            Coordinates::new(-33.8688, 151.2093),
            Coordinates::new(51.5072, -0.1276),
        ];

        for a in points {
            for b in points {
                for c in points {
                    assert!(distance(a, c) <= distance(a, b) + distance(b, c) + 1e-9);
                }
            }
        }
    }

    #[test]
    fn eta_has_floor() {
        assert_eq!(eta_minutes(0.5), 5);
        assert_eq!(eta_minutes(12.5), 30);
    }

    #[test]
    fn polygon_containment() {
        let outer = zone("outer", square(0.0, 10.0));

        assert!(contains(&outer.boundary, Coordinates::new(5.0, 5.0)));
        assert!(contains(&outer.boundary, Coordinates::new(0.0, 5.0)));
        assert!(!contains(&outer.boundary, Coordinates::new(11.0, 5.0)));

        let donut = ServiceZone::try_from(ZoneDefinition {
            name: "donut".into(),
            zone_type: ZoneType::Standard,
            exterior: square(0.0, 10.0),
            interiors: vec![square(4.0, 6.0)],
        })
        .unwrap();

        assert!(!contains(&donut.boundary, Coordinates::new(5.0, 5.0)));
        assert!(contains(&donut.boundary, Coordinates::new(2.0, 2.0)));
    }

    #[test]
    fn picks_smallest_zone() {
        let zones = vec![
            zone("city", square(0.0, 10.0)),
            zone("island", square(2.0, 4.0)),
        ];

        let found = containing_zone(&zones, Coordinates::new(3.0, 3.0)).unwrap();
        assert_eq!(found.name, "island");

        let found = containing_zone(&zones, Coordinates::new(8.0, 8.0)).unwrap();
        assert_eq!(found.name, "city");

        assert!(containing_zone(&zones, Coordinates::new(20.0, 20.0)).is_none());
    }

    #[test]
    fn nearest_orders_by_distance_then_key() {
        let origin = Coordinates::new(6.5244, 3.3792);
        let same = Coordinates::new(6.5300, 3.3792);
        let candidates = vec![
            (3u32, Coordinates::new(6.5500, 3.3792)),
            (2u32, same),
            (1u32, same),
            (4u32, Coordinates::new(7.5, 3.3792)),
        ];

        let found = nearest(origin, candidates.clone(), 5.0, 10);
        let keys: Vec<u32> = found.iter().map(|n| n.key).collect();
        assert_eq!(keys, vec![1, 2, 3]);

        let found = nearest(origin, candidates, 5.0, 2);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn wider_radius_keeps_closer_results() {
        let origin = Coordinates::new(6.5244, 3.3792);
        let candidates: Vec<(u32, Coordinates)> = (0..20)
            .map(|i| (i, Coordinates::new(6.5244 + i as f64 * 0.01, 3.3792)))
            .collect();

        let narrow = nearest(origin, candidates.clone(), 3.0, 100);
        let wide = nearest(origin, candidates, 6.0, 100);

        for found in narrow.iter() {
            assert!(wide.iter().any(|w| w.key == found.key));
        }
        assert!(wide.len() > narrow.len());
    }
}
