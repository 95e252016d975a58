use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{invalid_input_error, Error};

/// How candidates of a matching round are offered a negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferPolicy {
    /// One candidate at a time, next candidate on decline or timeout.
    Sequential,
    /// Every candidate of the round at once, first acceptance wins.
    Simultaneous,
}

impl FromStr for OfferPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "simultaneous" => Ok(Self::Simultaneous),
            _ => Err(invalid_input_error()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RankingWeights {
    pub distance: f64,
    pub availability: f64,
    pub rating: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            distance: 0.6,
            availability: 0.25,
            rating: 0.15,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub zones_path: String,
    pub notification_webhook: Option<String>,
    /// Events held for subscribers before new ones are dropped.
    pub event_buffer: usize,

    pub initial_radius_km: f64,
    pub expansion_factor: f64,
    pub max_radius_km: f64,
    pub max_expansions: u32,
    pub min_candidates: usize,
    pub candidates_per_round: usize,
    pub offer_policy: OfferPolicy,
    pub weights: RankingWeights,

    pub offer_deadline: Duration,
    pub max_chain_length: usize,
    pub min_offer_ratio: f64,
    pub max_offer_ratio: f64,

    pub decline_cooldown: Duration,
    pub request_ttl: Duration,
    pub heartbeat_ttl: Duration,
    pub sweep_interval: Duration,
    pub retention: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            zones_path: "zones.json".into(),
            notification_webhook: None,
            event_buffer: 1024,

            initial_radius_km: 3.0,
            expansion_factor: 2.0,
            max_radius_km: 15.0,
            max_expansions: 3,
            min_candidates: 3,
            candidates_per_round: 3,
            offer_policy: OfferPolicy::Sequential,
            weights: RankingWeights::default(),

            offer_deadline: Duration::seconds(45),
            max_chain_length: 8,
            min_offer_ratio: 0.5,
            max_offer_ratio: 2.0,

            decline_cooldown: Duration::seconds(300),
            request_ttl: Duration::seconds(600),
            heartbeat_ttl: Duration::seconds(60),
            sweep_interval: Duration::seconds(5),
            retention: Duration::seconds(3600),
        }
    }
}

impl Config {
    /// Defaults overridden by `HAGGLER_*` variables, a `.env` file included.
    #[tracing::instrument(name = "Config::from_env")]
    pub fn from_env() -> Result<Self, Error> {
        if let Err(err) = dotenv::dotenv() {
            tracing::debug!("no .env file loaded: {}", err);
        }

        let mut config = Self::default();

        if let Some(addr) = var("HAGGLER_BIND_ADDR")? {
            config.bind_addr = parse(&addr)?;
        }
        if let Some(path) = var("HAGGLER_ZONES_PATH")? {
            config.zones_path = path;
        }
        config.notification_webhook = var("HAGGLER_NOTIFICATION_WEBHOOK")?;
        if let Some(v) = var("HAGGLER_EVENT_BUFFER")? {
            config.event_buffer = parse(&v)?;
        }

        if let Some(v) = var("HAGGLER_INITIAL_RADIUS_KM")? {
            config.initial_radius_km = parse(&v)?;
        }
        if let Some(v) = var("HAGGLER_EXPANSION_FACTOR")? {
            config.expansion_factor = parse(&v)?;
        }
        if let Some(v) = var("HAGGLER_MAX_RADIUS_KM")? {
            config.max_radius_km = parse(&v)?;
        }
        if let Some(v) = var("HAGGLER_MAX_EXPANSIONS")? {
            config.max_expansions = parse(&v)?;
        }
        if let Some(v) = var("HAGGLER_MIN_CANDIDATES")? {
            config.min_candidates = parse(&v)?;
        }
        if let Some(v) = var("HAGGLER_CANDIDATES_PER_ROUND")? {
            config.candidates_per_round = parse(&v)?;
        }
        if let Some(v) = var("HAGGLER_OFFER_POLICY")? {
            config.offer_policy = v.parse()?;
        }
        if let Some(v) = var("HAGGLER_OFFER_DEADLINE_SECS")? {
            config.offer_deadline = Duration::seconds(parse(&v)?);
        }
        if let Some(v) = var("HAGGLER_MAX_CHAIN_LENGTH")? {
            config.max_chain_length = parse(&v)?;
        }
        if let Some(v) = var("HAGGLER_MIN_OFFER_RATIO")? {
            config.min_offer_ratio = parse(&v)?;
        }
        if let Some(v) = var("HAGGLER_MAX_OFFER_RATIO")? {
            config.max_offer_ratio = parse(&v)?;
        }
        if let Some(v) = var("HAGGLER_DECLINE_COOLDOWN_SECS")? {
            config.decline_cooldown = Duration::seconds(parse(&v)?);
        }
        if let Some(v) = var("HAGGLER_REQUEST_TTL_SECS")? {
            config.request_ttl = Duration::seconds(parse(&v)?);
        }
        if let Some(v) = var("HAGGLER_HEARTBEAT_TTL_SECS")? {
            config.heartbeat_ttl = Duration::seconds(parse(&v)?);
        }
        if let Some(v) = var("HAGGLER_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::seconds(parse(&v)?);
        }
        if let Some(v) = var("HAGGLER_RETENTION_SECS")? {
            config.retention = Duration::seconds(parse(&v)?);
        }

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let valid = self.initial_radius_km > 0.0
            && self.max_radius_km >= self.initial_radius_km
            && self.expansion_factor > 1.0
            && self.candidates_per_round > 0
            && self.event_buffer > 0
            && self.max_chain_length > 0
            && self.min_offer_ratio > 0.0
            && self.max_offer_ratio >= self.min_offer_ratio
            && self.offer_deadline > Duration::zero()
            && self.sweep_interval > Duration::zero();

        if !valid {
            tracing::error!("rejecting configuration: {:?}", self);
            return Err(invalid_input_error());
        }

        Ok(())
    }
}

fn var(key: &str) -> Result<Option<String>, Error> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse<T: FromStr>(value: &str) -> Result<T, Error> {
    value.trim().parse().map_err(|_| invalid_input_error())
}

#[test]
fn default_config_is_valid() {
    let config = Config::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.offer_policy, OfferPolicy::Sequential);
}

#[test]
fn rejects_shrinking_expansion() {
    let config = Config {
        expansion_factor: 1.0,
        ..Config::default()
    };

    assert_eq!(config.validate().unwrap_err().code, 101);
}

#[test]
fn parses_offer_policy() {
    assert_eq!(
        "Simultaneous".parse::<OfferPolicy>().unwrap(),
        OfferPolicy::Simultaneous
    );
    assert!("broadcast".parse::<OfferPolicy>().is_err());
}
