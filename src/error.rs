use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

// Taken from https://github.com/tokio-rs/axum/blob/main/examples/anyhow-error-response/src/main.rs
#[derive(Debug)]
pub struct QaRunnerError {
    pub status: StatusCode,
    pub message: HttpErrorResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    pub error: String,
}

impl From<String> for HttpErrorResponse {
    fn from(message: String) -> Self {
        HttpErrorResponse { error: message }
    }
}

impl From<&str> for HttpErrorResponse {
    fn from(message: &str) -> Self {
        HttpErrorResponse {
            error: message.to_string(),
        }
    }
}

impl IntoResponse for QaRunnerError {
    fn into_response(self) -> Response {
        let mut res = Json(self.message).into_response();
        *res.status_mut() = self.status;
        res
    }
}

impl<E> From<E> for QaRunnerError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        QaRunnerError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: HttpErrorResponse::from(format!("{:#}", err.into())),
        }
    }
}

pub type ModelResult<T, E = QaRunnerError> = Result<T, E>;

#[macro_export]
macro_rules! bail_runner {
    ($error_message:expr) => {
        return Err($crate::error::QaRunnerError { status: ::axum::http::StatusCode::INTERNAL_SERVER_ERROR, message: $crate::error::HttpErrorResponse::from($error_message) })
    };
    ($status_code:expr, $error_message:expr) => {
        return Err($crate::error::QaRunnerError { status: $status_code, message: $crate::error::HttpErrorResponse::from($error_message) })
    };
    ($status:expr, $fmt:expr $(, $arg:expr)*) => {
        return Err($crate::error::QaRunnerError {
            status: $status,
            message: $crate::error::HttpErrorResponse::from(format!($fmt $(, $arg)*)),
        })
    };
}

#[macro_export]
macro_rules! exit_err {
    ($code:expr, $fmt:expr $(, $arg:expr)*) => {
        {
            ::tracing::error!($fmt $(, $arg)*);
            std::process::exit($code);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reject(question: &str) -> ModelResult<()> {
        if question.trim().is_empty() {
            bail_runner!(StatusCode::BAD_REQUEST, "The question must not be empty");
        }
        if question.len() > 8 {
            bail_runner!(StatusCode::PAYLOAD_TOO_LARGE, "Question of {} bytes", question.len());
        }
        bail_runner!("No model loaded");
    }

    #[test]
    fn bail_runner_sets_status_and_message() {
        let err = reject(" ").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message.error, "The question must not be empty");

        let err = reject("a long question").unwrap_err();
        assert_eq!(err.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.message.error, "Question of 15 bytes");

        let err = reject("short").unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message.error, "No model loaded");
    }
}
