use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use cr_certs::{ApiKey, Artifact, ArtifactType, RenewalState};
use tracing::debug;

use crate::error::ApiError;
use crate::state::ApiState;

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/cert/{domain}", get(renewal_state))
        .route("/cert/{domain}/", get(renewal_state))
        .route("/cert/{domain}/{artifact}", get(artifact))
}

async fn renewal_state(
    State(state): State<ApiState>,
    Path(domain): Path<String>,
) -> Result<Json<RenewalState>, ApiError> {
    let renewal = state.backend.resolve_renewal_state(&domain).await?;
    debug!(domain = %domain, serial = %renewal.serial, "Served renewal state");
    Ok(Json(renewal))
}

async fn artifact(
    State(state): State<ApiState>,
    Path((domain, tag)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let kind: ArtifactType = tag.parse()?;
    let key = bearer_key(&headers);

    let artifact = state
        .backend
        .resolve_artifact(&domain, kind, key.as_ref())
        .await?;

    debug!(domain = %domain, artifact = %kind, size = artifact.size, "Served artifact");
    Ok(artifact_response(kind, artifact))
}

/// Extract the API key from `Authorization: Bearer <hex>`. A missing or
/// undecodable header yields `None`; the repository decides whether that
/// is acceptable for the requested artifact.
pub fn bearer_key(headers: &HeaderMap) -> Option<ApiKey> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    ApiKey::decode(token.trim()).ok()
}

/// HTTP date (IMF-fixdate) as used by `Last-Modified`
pub fn http_date(t: &chrono::DateTime<chrono::Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn artifact_response(kind: ArtifactType, artifact: Artifact) -> Response {
    let descriptor = kind.descriptor();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, descriptor.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", descriptor.filename),
            ),
            (header::CONTENT_LENGTH, artifact.data.len().to_string()),
            (header::LAST_MODIFIED, http_date(&artifact.modified)),
        ],
        artifact.data,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::TimeZone;

    #[test]
    fn test_bearer_key() {
        let key = ApiKey::from_bytes([7; 32]);
        let mut headers = HeaderMap::new();
        assert!(bearer_key(&headers).is_none());

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", key.encode())).unwrap(),
        );
        assert_eq!(bearer_key(&headers), Some(key));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(bearer_key(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert!(bearer_key(&headers).is_none());
    }

    #[test]
    fn test_http_date() {
        let t = chrono::Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(http_date(&t), "Wed, 21 Oct 2015 07:28:00 GMT");
    }
}
