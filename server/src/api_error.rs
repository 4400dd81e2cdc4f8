use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use mcctl_core::SupervisorError;
use tracing::error;

pub const ALREADY_STARTED: &str = "Server already started";
pub const NOT_RUNNING: &str = "Server is not running";

/// Maps supervisor failures onto status codes with a plain-text body.
#[derive(Debug)]
pub struct ApiError(SupervisorError);

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            SupervisorError::AlreadyRunning => StatusCode::BAD_REQUEST,
            SupervisorError::NotRunning => StatusCode::CONFLICT,
            SupervisorError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            SupervisorError::Spawn { .. } | SupervisorError::Stream { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if !self.0.is_rejection() {
            error!(error = %self.0, "request failed");
        }
        let body = match &self.0 {
            SupervisorError::AlreadyRunning => ALREADY_STARTED.to_string(),
            SupervisorError::NotRunning => NOT_RUNNING.to_string(),
            err => err.to_string(),
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rejections_use_client_error_codes() {
        assert_eq!(
            ApiError::from(SupervisorError::AlreadyRunning).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SupervisorError::NotRunning).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn process_failures_are_server_errors() {
        let err = SupervisorError::Spawn {
            error: std::io::Error::from(std::io::ErrorKind::NotFound),
        };

        assert_eq!(
            ApiError::from(err).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
