use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Coordinates, VehicleClass};
use crate::error::{invalid_input_error, invalid_transition_error, Error};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Open,
    Matching,
    Negotiating,
    Assigned { driver_id: Uuid, price: f64 },
    Expired,
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RideRequest {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub pickup: Coordinates,
    pub destination: Coordinates,
    pub vehicle_class: VehicleClass,
    pub initial_price: f64,
    pub zone_id: Uuid,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RideRequest {
    pub fn new(
        rider_id: Uuid,
        pickup: Coordinates,
        destination: Coordinates,
        vehicle_class: VehicleClass,
        initial_price: f64,
        zone_id: Uuid,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            rider_id,
            pickup,
            destination,
            vehicle_class,
            initial_price,
            zone_id,
            status: Status::Open,
            created_at: now,
            expires_at: now + ttl,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            Status::Assigned {
                driver_id: _,
                price: _
            } | Status::Expired
                | Status::Cancelled
        )
    }

    pub fn assigned_driver(&self) -> Option<(Uuid, f64)> {
        match self.status {
            Status::Assigned { driver_id, price } => Some((driver_id, price)),
            _ => None,
        }
    }

    /// Inclusive band of prices either party may propose.
    pub fn price_band(&self, min_ratio: f64, max_ratio: f64) -> (f64, f64) {
        (self.initial_price * min_ratio, self.initial_price * max_ratio)
    }

    pub fn validate_price(&self, price: f64, min_ratio: f64, max_ratio: f64) -> Result<(), Error> {
        let (floor, ceiling) = self.price_band(min_ratio, max_ratio);

        if !price.is_finite() || price < floor || price > ceiling {
            tracing::info!(
                "price {} outside [{}, {}] for request {}",
                price,
                floor,
                ceiling,
                self.id
            );
            return Err(invalid_input_error());
        }

        Ok(())
    }

    pub fn start_matching(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        match self.status {
            Status::Open | Status::Matching | Status::Negotiating => {
                self.set_status(Status::Matching, now);
                Ok(())
            }
            status => Err(invalid_transition_error(status, Status::Matching)),
        }
    }

    pub fn start_negotiating(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        match self.status {
            Status::Matching | Status::Negotiating => {
                self.set_status(Status::Negotiating, now);
                Ok(())
            }
            status => Err(invalid_transition_error(status, Status::Negotiating)),
        }
    }

    pub fn assign(&mut self, driver_id: Uuid, price: f64, now: DateTime<Utc>) -> Result<(), Error> {
        match self.status {
            Status::Negotiating => {
                self.set_status(Status::Assigned { driver_id, price }, now);
                Ok(())
            }
            status => Err(invalid_transition_error(
                status,
                Status::Assigned { driver_id, price },
            )),
        }
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        match self.status {
            Status::Open | Status::Matching | Status::Negotiating => {
                self.set_status(Status::Expired, now);
                Ok(())
            }
            status => Err(invalid_transition_error(status, Status::Expired)),
        }
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        match self.status {
            Status::Open | Status::Matching | Status::Negotiating => {
                self.set_status(Status::Cancelled, now);
                Ok(())
            }
            status => Err(invalid_transition_error(status, Status::Cancelled)),
        }
    }

    fn set_status(&mut self, status: Status, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

#[cfg(test)]
fn request() -> RideRequest {
    RideRequest::new(
        Uuid::new_v4(),
        Coordinates::new(6.5244, 3.3792),
        Coordinates::new(6.4698, 3.5852),
        VehicleClass::Sedan,
        1500.0,
        Uuid::new_v4(),
        Duration::seconds(600),
    )
}

#[test]
fn assignment_is_terminal() {
    let mut ride = request();
    let now = Utc::now();
    let driver_id = Uuid::new_v4();

    ride.start_matching(now).unwrap();
    ride.start_negotiating(now).unwrap();
    ride.assign(driver_id, 1800.0, now).unwrap();

    assert!(ride.is_terminal());
    assert_eq!(ride.assigned_driver(), Some((driver_id, 1800.0)));
    assert!(ride.assign(Uuid::new_v4(), 1700.0, now).is_err());
    assert!(ride.cancel(now).is_err());
    assert!(ride.expire(now).is_err());
}

#[test]
fn assignment_requires_negotiation() {
    let mut ride = request();
    let now = Utc::now();

    let err = ride.assign(Uuid::new_v4(), 1500.0, now).unwrap_err();

    assert!(err.is_invalid_transition());
    assert_eq!(ride.status, Status::Open);
}

#[test]
fn price_band() {
    let ride = request();

    assert!(ride.validate_price(750.0, 0.5, 2.0).is_ok());
    assert!(ride.validate_price(3000.0, 0.5, 2.0).is_ok());
    assert!(ride.validate_price(749.0, 0.5, 2.0).is_err());
    assert!(ride.validate_price(3001.0, 0.5, 2.0).is_err());
    assert!(ride.validate_price(f64::NAN, 0.5, 2.0).is_err());
}
