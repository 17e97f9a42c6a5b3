use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cr_certs::CertError;
use serde_json::json;
use tracing::error;

/// Repository error as seen by an HTTP client.
///
/// Lookup failures share one message so a caller cannot tell an unknown
/// domain from a missing artifact.
#[derive(Debug)]
pub struct ApiError(pub CertError);

impl From<CertError> for ApiError {
    fn from(err: CertError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CertError::Unauthorized | CertError::InvalidKeyEncoding => StatusCode::UNAUTHORIZED,
            CertError::DomainNotFound(_) | CertError::ArtifactNotFound(_) => StatusCode::NOT_FOUND,
            CertError::UnknownArtifactType(_) => StatusCode::BAD_REQUEST,
            CertError::MalformedRenewalState(_) => StatusCode::SERVICE_UNAVAILABLE,
            CertError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match &self.0 {
            CertError::Unauthorized | CertError::InvalidKeyEncoding => "unauthorized".to_string(),
            CertError::DomainNotFound(_) | CertError::ArtifactNotFound(_) => "not found".to_string(),
            CertError::UnknownArtifactType(tag) => format!("unknown artifact type: {}", tag),
            CertError::MalformedRenewalState(_) => "renewal state unavailable".to_string(),
            CertError::Io(_) => "internal error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self.0 {
            CertError::Io(e) => error!("Repository IO error: {}", e),
            CertError::MalformedRenewalState(reason) => error!("Unreadable renewal state: {}", reason),
            _ => {}
        }
        (self.status(), Json(json!({ "error": self.message() }))).into_response()
    }
}
