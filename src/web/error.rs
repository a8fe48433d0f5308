use crate::core::VigilError;
use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum WebError {
    Domain(VigilError),
    /// No usable principal on the request.
    Unauthorized(String),
    /// Malformed body or path.
    Input(String),
}

impl From<VigilError> for WebError {
    fn from(err: VigilError) -> Self {
        WebError::Domain(err)
    }
}

impl From<JsonRejection> for WebError {
    fn from(rejection: JsonRejection) -> Self {
        WebError::Input(rejection.body_text())
    }
}

impl From<PathRejection> for WebError {
    fn from(rejection: PathRejection) -> Self {
        WebError::Input(rejection.body_text())
    }
}

fn status_of(err: &VigilError) -> StatusCode {
    match err {
        VigilError::NotFound(_) => StatusCode::NOT_FOUND,
        VigilError::InvalidTransition(_)
        | VigilError::NotAccepted(_)
        | VigilError::StaleCycle(_)
        | VigilError::NotEligible(_) => StatusCode::CONFLICT,
        VigilError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        VigilError::Forbidden(_) => StatusCode::FORBIDDEN,
        VigilError::Storage(_) | VigilError::LockError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            WebError::Domain(err) => {
                let status = status_of(&err);
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                }
                (status, err.to_string(), err.kind().to_string())
            }
            WebError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, msg, "unauthorized".to_string())
            }
            WebError::Input(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg,
                "input_error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            code,
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_statuses() {
        let cases = [
            (VigilError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (VigilError::StaleCycle("c".into()), StatusCode::CONFLICT),
            (VigilError::NotEligible("o".into()), StatusCode::CONFLICT),
            (VigilError::Validation("v".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (VigilError::Forbidden("f".into()), StatusCode::FORBIDDEN),
            (VigilError::Storage("s".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(WebError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn unauthorized_is_401() {
        let response = WebError::Unauthorized("missing principal".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
