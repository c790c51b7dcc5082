// =============================================================================
// Error taxonomy — stable tags mapped onto HTTP status codes
// =============================================================================
//
// Every domain error in this crate implements `ApiError` so the ControlAPI
// can turn it into a `(StatusCode, Json)` response without each handler
// re-deriving the mapping. Validation and Auth errors short-circuit at the
// edge; Domain errors (trade rejections) are returned as ordinary 200
// responses with `status: "rejected"` on the bot-order path, and as 400
// everywhere else — see `TradeError::bot_order_response`.
// =============================================================================

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

/// Coarse error kind, serialized as a stable string tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    NotFound,
    Conflict,
    Domain,
    Backpressure,
    Transient,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Domain => StatusCode::BAD_REQUEST,
            ErrorKind::Backpressure => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    tag: &'static str,
    kind: ErrorKind,
    message: String,
}

/// Trait implemented by every domain error enum so handlers can convert it
/// into a wire response with one call. Never exposes internals: the
/// `message` field is always the `Display` text of the error, never a debug
/// dump or a stack trace (those go to `tracing`, not the client).
pub trait ApiError: std::error::Error {
    fn tag(&self) -> &'static str;
    fn kind(&self) -> ErrorKind;

    fn into_response_body(&self) -> (StatusCode, Json<serde_json::Value>) {
        let body = ErrorBody {
            tag: self.tag(),
            kind: self.kind(),
            message: self.to_string(),
        };
        (
            self.kind().status(),
            Json(serde_json::to_value(body).unwrap_or_default()),
        )
    }
}

/// Trade admission / execution errors (C6 Trader, spec.md §4.3, §7).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TradeError {
    #[error("unknown symbol '{0}'")]
    SymbolUnknown(String),
    #[error("quantity must be a positive integer")]
    InvalidQuantity,
    #[error("insufficient cash: need {needed:.2}, have {available:.2}")]
    InsufficientCash { needed: f64, available: f64 },
    #[error("insufficient shares: need {needed}, have {available}")]
    InsufficientShares { needed: u64, available: u64 },
    #[error("day-trade limit exceeded: {limit} trades already placed today")]
    DayTradeLimitExceeded { limit: u32 },
    #[error("cannot open a short position while a long position is held")]
    ConflictingLongPosition,
    #[error("cannot open a long position while a short position is held")]
    ConflictingShortPosition,
    #[error("no open short position for '{0}'")]
    NoShortPosition(String),
    #[error("quantity {requested} exceeds short position of {held}")]
    QuantityExceedsShort { requested: u64, held: u64 },
    #[error("the custom-mode week budget has been exhausted")]
    WeekBudgetExhausted,
}

impl ApiError for TradeError {
    fn tag(&self) -> &'static str {
        match self {
            TradeError::SymbolUnknown(_) => "SymbolUnknown",
            TradeError::InvalidQuantity => "InvalidQuantity",
            TradeError::InsufficientCash { .. } => "InsufficientCash",
            TradeError::InsufficientShares { .. } => "InsufficientShares",
            TradeError::DayTradeLimitExceeded { .. } => "DayTradeLimitExceeded",
            TradeError::ConflictingLongPosition => "ConflictingLongPosition",
            TradeError::ConflictingShortPosition => "ConflictingShortPosition",
            TradeError::NoShortPosition(_) => "NoShortPosition",
            TradeError::QuantityExceedsShort { .. } => "QuantityExceedsShort",
            TradeError::WeekBudgetExhausted => "WeekBudgetExhausted",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            TradeError::SymbolUnknown(_) => ErrorKind::NotFound,
            TradeError::InvalidQuantity => ErrorKind::Validation,
            TradeError::ConflictingLongPosition | TradeError::ConflictingShortPosition => {
                ErrorKind::Conflict
            }
            _ => ErrorKind::Domain,
        }
    }
}

impl TradeError {
    /// Shape the bot-order path response (spec.md §7: domain errors are 200
    /// with `status=rejected` there, never an HTTP error).
    pub fn bot_order_response(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "rejected",
            "tag": self.tag(),
            "message": self.to_string(),
        })
    }
}

impl IntoResponse for TradeError {
    fn into_response(self) -> axum::response::Response {
        self.into_response_body().into_response()
    }
}

/// Authentication / authorization errors (C10 AuthGate).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    #[error("missing or malformed Authorization header")]
    MissingCredential,
    #[error("invalid or expired credential")]
    InvalidCredential,
    #[error("bad credentials")]
    BadCredentials,
    #[error("role '{role}' is not permitted to access this resource")]
    RoleNotPermitted { role: String },
    #[error("invalid bot key")]
    BadBotKey,
}

impl ApiError for AuthError {
    fn tag(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "MissingCredential",
            AuthError::InvalidCredential => "InvalidCredential",
            AuthError::BadCredentials => "BadCredentials",
            AuthError::RoleNotPermitted { .. } => "RoleNotPermitted",
            AuthError::BadBotKey => "BadBotKey",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            AuthError::RoleNotPermitted { .. } => ErrorKind::Auth,
            _ => ErrorKind::Auth,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = self.into_response_body();
        let status = match self {
            AuthError::RoleNotPermitted { .. } => StatusCode::FORBIDDEN,
            _ => status,
        };
        (status, body).into_response()
    }
}

/// Save/restore errors (C9 SaveStore).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SaveError {
    #[error("unknown save code '{0}'")]
    UnknownCode(String),
    #[error("unknown preset '{preset}' for code '{code}'")]
    UnknownPreset { code: String, preset: String },
    #[error("exhausted retries generating a unique save code")]
    CollisionExhausted,
    #[error("snapshot failed validation: {0}")]
    InvalidSnapshot(String),
}

impl ApiError for SaveError {
    fn tag(&self) -> &'static str {
        match self {
            SaveError::UnknownCode(_) => "UnknownCode",
            SaveError::UnknownPreset { .. } => "UnknownPreset",
            SaveError::CollisionExhausted => "CollisionExhausted",
            SaveError::InvalidSnapshot(_) => "InvalidSnapshot",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            SaveError::UnknownCode(_) | SaveError::UnknownPreset { .. } => ErrorKind::NotFound,
            SaveError::CollisionExhausted => ErrorKind::Transient,
            SaveError::InvalidSnapshot(_) => ErrorKind::Validation,
        }
    }
}

impl IntoResponse for SaveError {
    fn into_response(self) -> axum::response::Response {
        let (mut status, body) = self.into_response_body();
        if matches!(self, SaveError::CollisionExhausted) {
            status = StatusCode::INTERNAL_SERVER_ERROR;
        }
        (status, body).into_response()
    }
}

/// Chat errors (spec.md §4.6).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChatError {
    #[error("message text must be 1..2000 characters")]
    InvalidText,
    #[error("unknown author")]
    UnknownAuthor,
}

impl ApiError for ChatError {
    fn tag(&self) -> &'static str {
        match self {
            ChatError::InvalidText => "InvalidText",
            ChatError::UnknownAuthor => "UnknownAuthor",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            ChatError::InvalidText => ErrorKind::Validation,
            ChatError::UnknownAuthor => ErrorKind::NotFound,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> axum::response::Response {
        self.into_response_body().into_response()
    }
}

/// Errors raised creating or looking up sessions (C7 SessionRegistry).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("unknown session '{0}'")]
    UnknownSession(String),
    #[error("a primary session already exists for this user")]
    PrimarySessionExists,
}

impl ApiError for SessionError {
    fn tag(&self) -> &'static str {
        match self {
            SessionError::UnknownSession(_) => "UnknownSession",
            SessionError::PrimarySessionExists => "PrimarySessionExists",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            SessionError::UnknownSession(_) => ErrorKind::NotFound,
            SessionError::PrimarySessionExists => ErrorKind::Conflict,
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> axum::response::Response {
        self.into_response_body().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_error_tags_are_stable() {
        assert_eq!(TradeError::InvalidQuantity.tag(), "InvalidQuantity");
        assert_eq!(TradeError::SymbolUnknown("X".into()).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn bot_order_response_never_leaks_internals() {
        let err = TradeError::InsufficientCash {
            needed: 100.0,
            available: 50.0,
        };
        let v = err.bot_order_response();
        assert_eq!(v["status"], "rejected");
        assert_eq!(v["tag"], "InsufficientCash");
    }

    #[test]
    fn auth_role_not_permitted_is_403() {
        let err = AuthError::RoleNotPermitted { role: "user".into() };
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn save_collision_exhausted_is_500() {
        let resp = SaveError::CollisionExhausted.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
