use diesel::result::{DatabaseErrorKind, Error as DieselError};
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("authentication required")]
    Unauthorized,

    #[error("operator role is not allowed to perform this action")]
    Forbidden,

    #[error("{0}")]
    NotFound(String),

    #[error("token is not valid")]
    InvalidToken,

    #[error("this voter has already voted")]
    AlreadyVoted,

    #[error("voting has not started or has already ended")]
    VotingClosed,

    #[error("voting session is active; deactivate it first")]
    SessionActive,

    #[error("candidate is not valid")]
    UnknownCandidate,

    #[error("{0}")]
    Validation(String),

    #[error("no valid rows to import")]
    InvalidRoster(Vec<String>),

    #[error("{0}")]
    Conflict(String),

    #[error("could not issue a unique voting token, try again")]
    TokenCollision,

    #[error("internal server error")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> Status {
        match self {
            AppError::Unauthorized => Status::Unauthorized,
            AppError::Forbidden => Status::Forbidden,
            AppError::NotFound(_) | AppError::InvalidToken | AppError::UnknownCandidate => {
                Status::NotFound
            }
            AppError::AlreadyVoted | AppError::Conflict(_) => Status::Conflict,
            AppError::VotingClosed | AppError::SessionActive => Status::PreconditionFailed,
            AppError::Validation(_) | AppError::InvalidRoster(_) => Status::BadRequest,
            AppError::TokenCollision => Status::ServiceUnavailable,
            AppError::Internal(_) => Status::InternalServerError,
        }
    }
}

impl From<DieselError> for AppError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::NotFound => AppError::NotFound("record not found".into()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                AppError::Conflict("a record with the same unique value already exists".into())
            }
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                AppError::Conflict("record is still referenced by other records".into())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(e: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("password hashing: {e}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Internal(format!("io: {e}"))
    }
}

impl From<rust_xlsxwriter::XlsxError> for AppError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        AppError::Internal(format!("xlsx: {e}"))
    }
}

impl From<rocket::tokio::task::JoinError> for AppError {
    fn from(e: rocket::tokio::task::JoinError) -> Self {
        AppError::Internal(format!("blocking task: {e}"))
    }
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        if let AppError::Internal(detail) = &self {
            error!(method = %req.method(), uri = %req.uri(), %detail, "request failed");
        }

        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
            details: match self {
                AppError::InvalidRoster(details) => Some(details),
                _ => None,
            },
        };

        (status, Json(body)).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ballot_failures_map_to_distinct_statuses() {
        assert_eq!(AppError::InvalidToken.status(), Status::NotFound);
        assert_eq!(AppError::AlreadyVoted.status(), Status::Conflict);
        assert_eq!(AppError::VotingClosed.status(), Status::PreconditionFailed);
        assert_eq!(AppError::UnknownCandidate.status(), Status::NotFound);
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = AppError::Internal("Table 'voters' doesn't exist".into());
        assert_eq!(err.to_string(), "internal server error");
        assert_eq!(err.status(), Status::InternalServerError);
    }

    #[test]
    fn diesel_not_found_becomes_not_found() {
        let err = AppError::from(DieselError::NotFound);
        assert_eq!(err.status(), Status::NotFound);
    }

    #[test]
    fn rollback_errors_are_internal() {
        let err = AppError::from(DieselError::RollbackTransaction);
        assert!(matches!(err, AppError::Internal(_)));
    }
}
