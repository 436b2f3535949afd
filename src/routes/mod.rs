//! Router construction.

pub mod common;
pub mod resource;

pub use common::{common_routes, common_routes_with_ready};
pub use resource::resource_routes;

use crate::state::AppState;
use axum::Router;

/// Full application router: health endpoints plus every registered resource route.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(common_routes_with_ready(state.clone()))
        .merge(resource_routes(state))
}
