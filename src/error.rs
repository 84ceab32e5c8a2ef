use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::config::ConfigError;
use crate::storage::StorageError;

/// Errors surfaced by lobby, session and routing operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("lobby is no longer waiting for an opponent")]
    LobbyNotWaiting,
    #[error("lobby not found")]
    LobbyNotFound,
    #[error("game session not found")]
    SessionNotFound,
    #[error("not a participant of this lobby or game")]
    Unauthorized,
    #[error("not your turn")]
    NotYourTurn,
    #[error("game is not in progress")]
    InvalidPhase,
    #[error("spectator limit reached")]
    SpectatorLimitReached,
    #[error("spectating is disabled for this game")]
    SpectatingDisabled,
    #[error("cannot join your own lobby")]
    SelfJoin,
    #[error("invalid move: {0}")]
    InvalidMove(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("entity unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// Stable machine-readable kind.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::LobbyNotWaiting => "lobby_not_waiting",
            ServiceError::LobbyNotFound => "lobby_not_found",
            ServiceError::SessionNotFound => "session_not_found",
            ServiceError::Unauthorized => "unauthorized",
            ServiceError::NotYourTurn => "not_your_turn",
            ServiceError::InvalidPhase => "invalid_phase",
            ServiceError::SpectatorLimitReached => "spectator_limit_reached",
            ServiceError::SpectatingDisabled => "spectating_disabled",
            ServiceError::SelfJoin => "self_join",
            ServiceError::InvalidMove(_) => "invalid_move",
            ServiceError::InvalidRequest(_) => "invalid_request",
            ServiceError::Storage(_) => "storage",
            ServiceError::Unavailable(_) => "unavailable",
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Storage(err.to_string())
    }
}

impl From<ConfigError> for ServiceError {
    fn from(err: ConfigError) -> Self {
        ServiceError::InvalidRequest(err.to_string())
    }
}

impl From<actix::MailboxError> for ServiceError {
    fn from(err: actix::MailboxError) -> Self {
        ServiceError::Unavailable(err.to_string())
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::LobbyNotFound | ServiceError::SessionNotFound => StatusCode::NOT_FOUND,
            ServiceError::LobbyNotWaiting | ServiceError::NotYourTurn | ServiceError::InvalidPhase => {
                StatusCode::CONFLICT
            }
            ServiceError::Unauthorized
            | ServiceError::SpectatorLimitReached
            | ServiceError::SpectatingDisabled => StatusCode::FORBIDDEN,
            ServiceError::SelfJoin | ServiceError::InvalidMove(_) | ServiceError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(ServiceError::NotYourTurn.to_string(), "not your turn");
        assert_eq!(
            ServiceError::InvalidMove("bad square".into()).to_string(),
            "invalid move: bad square"
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ServiceError::LobbyNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ServiceError::LobbyNotWaiting.status_code(), StatusCode::CONFLICT);
        assert_eq!(ServiceError::Unauthorized.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ServiceError::SelfJoin.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ServiceError>();
    }
}
