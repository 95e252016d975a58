use axum::extract::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::env;
use std::fmt::{self, Debug, Display};

pub const INVALID_TRANSITION: i32 = 100;
pub const INVALID_INPUT: i32 = 101;
pub const NOT_FOUND: i32 = 102;
pub const OUT_OF_SERVICE_AREA: i32 = 110;
pub const NO_DRIVERS_AVAILABLE: i32 = 111;
pub const STALE_LOCATION_UPDATE: i32 = 112;
pub const PREAUTHORIZATION_FAILED: i32 = 113;
pub const NEGOTIATION_TIMEOUT: i32 = 114;
pub const ACTIVE_REQUEST_EXISTS: i32 = 115;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

impl Error {
    pub fn is_invalid_transition(&self) -> bool {
        self.code == INVALID_TRANSITION
    }

    pub fn is_stale_location_update(&self) -> bool {
        self.code == STALE_LOCATION_UPDATE
    }

    pub fn is_internal(&self) -> bool {
        (1..=99).contains(&self.code)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for Error {}

impl From<env::VarError> for Error {
    fn from(err: env::VarError) -> Self {
        env_var_error(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        reqwest_error(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        serialization_error(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        tracing::error!("io error: {}", err);
        unexpected_error()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.code {
            1..=99 => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
            NOT_FOUND => (StatusCode::NOT_FOUND, self.message.as_str()),
            INVALID_TRANSITION | ACTIVE_REQUEST_EXISTS | NEGOTIATION_TIMEOUT => {
                (StatusCode::CONFLICT, self.message.as_str())
            }
            OUT_OF_SERVICE_AREA | NO_DRIVERS_AVAILABLE | PREAUTHORIZATION_FAILED => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.message.as_str())
            }
            _ => (StatusCode::BAD_REQUEST, self.message.as_str()),
        };

        let body = Json(json!({
            "code": self.code,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

pub fn invalid_transition_error(from: impl Debug, to: impl Debug) -> Error {
    tracing::error!("invalid transition from {:?} to {:?}", from, to);

    Error {
        code: INVALID_TRANSITION,
        message: "invalid transition".into(),
    }
}

pub fn invalid_input_error() -> Error {
    Error {
        code: INVALID_INPUT,
        message: "invalid input".into(),
    }
}

pub fn not_found_error() -> Error {
    Error {
        code: NOT_FOUND,
        message: "not found".into(),
    }
}

pub fn out_of_service_area_error() -> Error {
    Error {
        code: OUT_OF_SERVICE_AREA,
        message: "pickup is outside every service zone".into(),
    }
}

pub fn no_drivers_available_error() -> Error {
    Error {
        code: NO_DRIVERS_AVAILABLE,
        message: "no drivers found, please retry".into(),
    }
}

pub fn stale_location_update_error() -> Error {
    Error {
        code: STALE_LOCATION_UPDATE,
        message: "stale location update".into(),
    }
}

pub fn preauthorization_failed_error() -> Error {
    Error {
        code: PREAUTHORIZATION_FAILED,
        message: "payment authorization failed, choose another method".into(),
    }
}

pub fn negotiation_timeout_error() -> Error {
    Error {
        code: NEGOTIATION_TIMEOUT,
        message: "offer expired".into(),
    }
}

pub fn active_request_exists_error() -> Error {
    Error {
        code: ACTIVE_REQUEST_EXISTS,
        message: "rider already has an active ride request".into(),
    }
}

pub fn env_var_error(_: env::VarError) -> Error {
    Error {
        code: 1,
        message: "environment variable error".into(),
    }
}

pub fn reqwest_error(err: reqwest::Error) -> Error {
    tracing::warn!("http error: {}", err);

    Error {
        code: 3,
        message: "reqwest error".into(),
    }
}

pub fn upstream_error() -> Error {
    Error {
        code: 4,
        message: "upstream error".into(),
    }
}

pub fn unexpected_error() -> Error {
    Error {
        code: 5,
        message: "unexpected error".into(),
    }
}

pub fn serialization_error<T: Debug>(err: T) -> Error {
    tracing::error!("serialization error: {:?}", err);

    Error {
        code: 6,
        message: "serialization error".into(),
    }
}

#[test]
fn internal_codes_are_hidden() {
    assert!(unexpected_error().is_internal());
    assert!(!invalid_transition_error("a", "b").is_internal());

    let response = upstream_error().into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = no_drivers_available_error().into_response();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = not_found_error().into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
