use crate::database::DbError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

/// Errors a request handler can end with.
#[derive(Debug, Error)]
pub enum AppError {
    /// 401
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// 403
    #[error("Not allowed: {0}")]
    Authorization(String),

    /// 400
    #[error("Validation failed: {0}")]
    Validation(String),

    /// 404
    #[error("Not found: {0}")]
    NotFound(String),

    /// 409
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(DbError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(message) => AppError::NotFound(message),
            DbError::Conflict(message) => AppError::Conflict(message),
            other => AppError::Database(other),
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Internal(anyhow::anyhow!("password hashing error: {}", err))
    }
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Authentication(_) => "AUTHENTICATION_FAILED",
            AppError::Authorization(_) => "AUTHORIZATION_FAILED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    error_code: &'a str,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Internal details stay in the log.
        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("{}: {:?}", self.error_code(), self);
            "Internal server error".to_owned()
        } else {
            log::debug!("{}: {}", self.error_code(), self);
            self.to_string()
        };
        HttpResponse::build(status).json(ErrorBody {
            error,
            error_code: self.error_code(),
        })
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        let missing: AppError = DbError::NotFound("list 3 not found".to_owned()).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        let taken: AppError = DbError::Conflict("film already in list".to_owned()).into();
        assert_eq!(taken.status_code(), StatusCode::CONFLICT);
        let corrupt: AppError = DbError::Corrupt("short key".to_owned()).into();
        assert_eq!(corrupt.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(corrupt.error_code(), "DATABASE_ERROR");
    }

    #[actix_rt::test]
    async fn internal_details_are_hidden() {
        let err = AppError::Database(DbError::Corrupt("tree users".to_owned()));
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = actix_web::body::to_bytes(response.into_body()).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["error_code"], "DATABASE_ERROR");
    }
}
