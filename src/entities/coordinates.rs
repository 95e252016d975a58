use geo_types::{Coord, Point};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl From<Coordinates> for Point<f64> {
    fn from(coordinates: Coordinates) -> Self {
        Point::new(coordinates.lng, coordinates.lat)
    }
}

impl From<Coordinates> for Coord<f64> {
    fn from(coordinates: Coordinates) -> Self {
        Coord {
            x: coordinates.lng,
            y: coordinates.lat,
        }
    }
}

impl From<Point<f64>> for Coordinates {
    fn from(point: Point<f64>) -> Self {
        Self {
            lat: point.y(),
            lng: point.x(),
        }
    }
}

#[test]
fn point_is_lng_lat() {
    let point: Point<f64> = Coordinates::new(6.5244, 3.3792).into();

    assert_eq!(point.x(), 3.3792);
    assert_eq!(point.y(), 6.5244);
    assert_eq!(Coordinates::from(point), Coordinates::new(6.5244, 3.3792));
}

#[test]
fn rejects_out_of_range() {
    assert!(Coordinates::new(6.5, 3.3).is_valid());
    assert!(!Coordinates::new(91.0, 3.3).is_valid());
    assert!(!Coordinates::new(f64::NAN, 3.3).is_valid());
}
