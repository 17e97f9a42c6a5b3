pub mod error;
pub mod routes;
pub mod state;

use axum::Router;
use state::ApiState;
use tower_http::trace::TraceLayer;

/// Build the distribution router: `/ping`, `/favicon.ico` and `/cert/*`.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::cert::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
