use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Coordinates;
use crate::error::{invalid_transition_error, stale_location_update_error, Error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Motorcycle,
    Tricycle,
    Hatchback,
    Sedan,
    Suv,
    Bus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Status {
    Idle,
    Offered { request_id: Uuid },
    Assigned { request_id: Uuid },
    OnTrip { request_id: Uuid },
}

/// Live availability of one online driver.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverAvailabilityRecord {
    pub driver_id: Uuid,
    pub position: Coordinates,
    pub vehicle_class: VehicleClass,
    pub rating: Option<f64>,
    pub status: Status,
    pub last_seen: DateTime<Utc>,
    pub position_version: u64,
    pub online: bool,
}

impl DriverAvailabilityRecord {
    pub fn new(
        driver_id: Uuid,
        position: Coordinates,
        vehicle_class: VehicleClass,
        rating: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            driver_id,
            position,
            vehicle_class,
            rating,
            status: Status::Idle,
            last_seen: timestamp,
            position_version: 1,
            online: true,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.status, Status::Idle)
    }

    /// Applies a heartbeat unless it is older than the last one applied.
    pub fn update_position(
        &mut self,
        position: Coordinates,
        timestamp: DateTime<Utc>,
    ) -> Result<u64, Error> {
        if timestamp < self.last_seen {
            return Err(stale_location_update_error());
        }

        self.position = position;
        self.last_seen = timestamp;
        self.position_version += 1;

        Ok(self.position_version)
    }

    /// Allowed moves: `idle -> offered -> idle | assigned`, `assigned -> on_trip -> idle`.
    /// Offered, assigned and on-trip states must all refer to the same request.
    pub fn transition(&mut self, target: Status) -> Result<(), Error> {
        let allowed = match (self.status, target) {
            (Status::Idle, Status::Offered { request_id: _ }) => true,
            (Status::Offered { request_id: _ }, Status::Idle) => true,
            (Status::Offered { request_id: a }, Status::Assigned { request_id: b }) => a == b,
            (Status::Assigned { request_id: a }, Status::OnTrip { request_id: b }) => a == b,
            (Status::OnTrip { request_id: _ }, Status::Idle) => true,
            _ => false,
        };

        if !allowed {
            return Err(invalid_transition_error(self.status, target));
        }

        self.status = target;
        Ok(())
    }

    pub fn offer(&mut self, request_id: Uuid) -> Result<(), Error> {
        self.transition(Status::Offered { request_id })
    }

    /// Returns an offered driver to idle, only if the offer belongs to `request_id`.
    pub fn release(&mut self, request_id: Uuid) -> Result<(), Error> {
        match self.status {
            Status::Offered { request_id: held } if held == request_id => {
                self.transition(Status::Idle)
            }
            _ => Err(invalid_transition_error(self.status, Status::Idle)),
        }
    }

    pub fn assign(&mut self, request_id: Uuid) -> Result<(), Error> {
        self.transition(Status::Assigned { request_id })
    }

    pub fn start_trip(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Assigned { request_id } => self.transition(Status::OnTrip { request_id }),
            status => Err(invalid_transition_error(status, "on_trip")),
        }
    }

    pub fn finish_trip(&mut self) -> Result<(), Error> {
        match self.status {
            Status::OnTrip { request_id: _ } => self.transition(Status::Idle),
            status => Err(invalid_transition_error(status, Status::Idle)),
        }
    }

    pub fn can_go_offline(&self) -> bool {
        matches!(self.status, Status::Idle | Status::Offered { request_id: _ })
    }

    /// Takes the driver offline, returning the request it was holding an offer for.
    pub fn go_offline(&mut self) -> Result<Option<Uuid>, Error> {
        if !self.can_go_offline() {
            return Err(invalid_transition_error(self.status, "offline"));
        }

        let held = match self.status {
            Status::Offered { request_id } => Some(request_id),
            _ => None,
        };

        self.status = Status::Idle;
        self.online = false;

        Ok(held)
    }
}

#[cfg(test)]
fn record() -> DriverAvailabilityRecord {
    DriverAvailabilityRecord::new(
        Uuid::new_v4(),
        Coordinates::new(6.5244, 3.3792),
        VehicleClass::Sedan,
        None,
        Utc::now(),
    )
}

#[test]
fn full_lifecycle() {
    let mut driver = record();
    let request_id = Uuid::new_v4();

    driver.offer(request_id).unwrap();
    driver.assign(request_id).unwrap();
    driver.start_trip().unwrap();
    driver.finish_trip().unwrap();

    assert!(driver.is_idle());
}

#[test]
fn rejects_illegal_transitions() {
    let mut driver = record();
    let request_id = Uuid::new_v4();

    let err = driver.assign(request_id).unwrap_err();
    assert!(err.is_invalid_transition());
    assert!(driver.is_idle());

    driver.offer(request_id).unwrap();

    // offered to one request at a time
    assert!(driver.offer(Uuid::new_v4()).is_err());
    // cannot be assigned a different request than the one offered
    assert!(driver.assign(Uuid::new_v4()).is_err());
    assert!(driver.release(Uuid::new_v4()).is_err());
    assert_eq!(driver.status, Status::Offered { request_id });

    driver.release(request_id).unwrap();
    assert!(driver.start_trip().is_err());
}

#[test]
fn offline_only_when_not_committed() {
    let mut driver = record();
    let request_id = Uuid::new_v4();

    driver.offer(request_id).unwrap();
    assert_eq!(driver.go_offline().unwrap(), Some(request_id));
    assert!(!driver.online);

    let mut driver = record();
    driver.offer(request_id).unwrap();
    driver.assign(request_id).unwrap();
    assert!(driver.go_offline().unwrap_err().is_invalid_transition());
    assert!(driver.online);
}

#[test]
fn drops_out_of_order_heartbeats() {
    let mut driver = record();
    let seen = driver.last_seen;

    let version = driver
        .update_position(
            Coordinates::new(6.53, 3.38),
            seen + chrono::Duration::seconds(5),
        )
        .unwrap();
    assert_eq!(version, 2);

    let err = driver
        .update_position(
            Coordinates::new(6.0, 3.0),
            seen + chrono::Duration::seconds(2),
        )
        .unwrap_err();

    assert!(err.is_stale_location_update());
    assert_eq!(driver.position, Coordinates::new(6.53, 3.38));
    assert_eq!(driver.position_version, 2);
}

#[test]
fn repeated_heartbeat_timestamp_is_applied() {
    let mut driver = record();
    let seen = driver.last_seen;

    let version = driver
        .update_position(Coordinates::new(6.53, 3.38), seen)
        .unwrap();

    assert_eq!(version, 2);
    assert_eq!(driver.position, Coordinates::new(6.53, 3.38));
}
