use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use crate::state::ApiState;

const FAVICON: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 16 16"><text x="0" y="14">🔒</text></svg>"#;

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/favicon.ico", get(favicon))
}

async fn ping(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "message": format!("pong: {}", state.instance_id)
    }))
}

async fn favicon() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/svg+xml")], FAVICON)
}
