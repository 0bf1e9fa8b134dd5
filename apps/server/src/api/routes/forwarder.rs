//! Forward trigger routes
//!
//! - `POST /forwarder/_event`: encounter forwarding
//! - `POST /forwarder/:flavor/_event`: one of `encounter`, `immunization`,
//!   `procedure`, `condition`, `medication-request`, `iti65`

use crate::api::handlers::forward;
use crate::state::AppState;
use axum::{routing::post, Router};

pub fn forwarder_routes() -> Router<AppState> {
    Router::new()
        .route("/forwarder/_event", post(forward::forward_event))
        .route(
            "/forwarder/:flavor/_event",
            post(forward::forward_flavor_event),
        )
}
