use geo_types::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{invalid_input_error, Error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Standard,
    Premium,
    Airport,
    Restricted,
}

impl Default for ZoneType {
    fn default() -> Self {
        Self::Standard
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceZone {
    pub id: Uuid,
    pub name: String,
    pub zone_type: ZoneType,
    pub boundary: Polygon<f64>,
}

/// On-disk zone shape: rings of `[lng, lat]` pairs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneDefinition {
    pub name: String,
    #[serde(default)]
    pub zone_type: ZoneType,
    pub exterior: Vec<[f64; 2]>,
    #[serde(default)]
    pub interiors: Vec<Vec<[f64; 2]>>,
}

impl ServiceZone {
    pub fn new(name: String, zone_type: ZoneType, boundary: Polygon<f64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            zone_type,
            boundary,
        }
    }

    /// Planar area in squared degrees, only meaningful for comparing zones.
    pub fn planar_area(&self) -> f64 {
        let outer = ring_area(self.boundary.exterior());
        let holes: f64 = self.boundary.interiors().iter().map(ring_area).sum();

        (outer - holes).max(0.0)
    }

    pub fn accepts_requests(&self) -> bool {
        self.zone_type != ZoneType::Restricted
    }

    /// Reads a JSON array of zone definitions.
    #[tracing::instrument(name = "ServiceZone::load")]
    pub async fn load(path: &str) -> Result<Vec<Self>, Error> {
        let raw = tokio::fs::read(path).await?;
        let definitions: Vec<ZoneDefinition> = serde_json::from_slice(&raw)?;

        let zones = definitions
            .into_iter()
            .map(ServiceZone::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!("loaded {} service zones", zones.len());

        Ok(zones)
    }
}

impl TryFrom<ZoneDefinition> for ServiceZone {
    type Error = Error;

    fn try_from(definition: ZoneDefinition) -> Result<Self, Self::Error> {
        if definition.exterior.len() < 3 {
            return Err(invalid_input_error());
        }

        let exterior = to_ring(&definition.exterior);
        let interiors = definition
            .interiors
            .iter()
            .filter(|ring| ring.len() >= 3)
            .map(|ring| to_ring(ring))
            .collect();

        Ok(ServiceZone::new(
            definition.name,
            definition.zone_type,
            Polygon::new(exterior, interiors),
        ))
    }
}

fn to_ring(points: &[[f64; 2]]) -> LineString<f64> {
    // Polygon::new closes the ring
    points
        .iter()
        .map(|[lng, lat]| Coord { x: *lng, y: *lat })
        .collect::<Vec<_>>()
        .into()
}

fn ring_area(ring: &LineString<f64>) -> f64 {
    let twice: f64 = ring
        .lines()
        .map(|line| line.start.x * line.end.y - line.end.x * line.start.y)
        .sum();

    (twice / 2.0).abs()
}

#[test]
fn area_subtracts_holes() {
    let definition = ZoneDefinition {
        name: "block".into(),
        zone_type: ZoneType::Standard,
        exterior: vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0]],
        interiors: vec![vec![[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 2.0]]],
    };

    let zone = ServiceZone::try_from(definition).unwrap();

    assert!((zone.planar_area() - 15.0).abs() < 1e-9);
}

#[test]
fn parses_zone_file_entries() {
    let raw = r#"[{"name": "island", "zone_type": "premium", "exterior": [[3.3, 6.4], [3.5, 6.4], [3.5, 6.5]]}]"#;
    let definitions: Vec<ZoneDefinition> = serde_json::from_str(raw).unwrap();

    let zone = ServiceZone::try_from(definitions[0].clone()).unwrap();

    assert_eq!(zone.zone_type, ZoneType::Premium);
    assert!(zone.accepts_requests());
    assert!(zone.boundary.interiors().is_empty());
}

#[test]
fn rejects_degenerate_ring() {
    let definition = ZoneDefinition {
        name: "line".into(),
        zone_type: ZoneType::Standard,
        exterior: vec![[0.0, 0.0], [1.0, 1.0]],
        interiors: vec![],
    };

    assert!(ServiceZone::try_from(definition).is_err());
}
