//! HTTP surface.
//!
//! Thin handlers over `Vigil`: the extractor yields the caller, handlers
//! check the role and delegate; every domain error becomes a JSON
//! `{ error, code }` body via `WebError`.

pub mod error;
pub mod handlers;

pub use error::{ErrorResponse, Result, WebError};

use crate::facade::Vigil;
use axum::Router;
use axum::routing::{delete, get, post};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub type AppState = Arc<Vigil>;

pub fn router(vigil: AppState) -> Router {
    let me: Router<AppState> = Router::new()
        .route("/status", get(handlers::status))
        .route("/pulse", post(handlers::pulse))
        .route("/settings", axum::routing::put(handlers::update_settings))
        .route(
            "/trustees",
            get(handlers::list_trustees).post(handlers::invite_trustee),
        )
        .route("/trustees/:trustee_id", delete(handlers::remove_trustee))
        .route(
            "/beneficiaries",
            get(handlers::list_beneficiaries).post(handlers::add_beneficiary),
        )
        .route("/beneficiaries/:id", delete(handlers::remove_beneficiary));

    let trustee: Router<AppState> = Router::new()
        .route("/invitations", get(handlers::my_invitations))
        .route("/invitations/:trustee_id", post(handlers::answer_invitation))
        .route("/responses", post(handlers::cycle_response));

    let admin: Router<AppState> = Router::new()
        .route("/console", get(handlers::admin_console))
        .route("/users/:id", delete(handlers::purge_user))
        .route("/users/:id/trustees", get(handlers::user_trustees))
        .route("/users/:id/evaluate", post(handlers::evaluate_user))
        .route("/users/:id/release", post(handlers::release_user));

    let api: Router<AppState> = Router::new()
        .route("/users", post(handlers::register))
        .nest("/me", me)
        .nest("/trustee", trustee)
        .nest("/admin", admin);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(vigil)
}
