pub mod auth;
pub mod bus;
pub mod dispatcher;
pub mod http;
pub mod pattern;
pub mod state;
pub mod store;
pub mod validate;
pub mod web;

pub use dispatcher::Dispatcher;
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/", get(http::provision::homepage))
        .route("/api/auth", post(http::provision::post_auth))
        .route("/api/hello", get(http::provision::get_hello))
        .route("/api/cues", post(http::cues::post_cues))
        .route("/api/cues/:name", post(http::cues::post_cue_by_name))
        .route("/api/listen", get(http::listen::listen_handler))
        .route("/keyrequest/:request_id", get(web::get_key_request))
        .route(
            "/keyrequest/:request_id/accept",
            post(web::accept_key_request),
        )
        .route("/keys", get(web::list_keys))
        .route("/keys/:key_id/remove", post(web::remove_key))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
