//! # dsagrind_api
//!
//! HTTP API for DSAGrind authentication.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use dsagrind_core::auth::{Collaborators, SessionService};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{auth, oauth};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SessionService>,
    /// API configuration.
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(config: ApiConfig, deps: Collaborators) -> Self {
        let service = Arc::new(SessionService::new(config.session.clone(), deps));
        Self { service, config }
    }
}

/// Run embedded database migrations.
///
/// Delegates to `dsagrind_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    dsagrind_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_REGISTER, post(auth::register_handler))
        .route(routes::POST_AUTH_REFRESH, post(auth::refresh_handler))
        .route(routes::POST_AUTH_REVOKE, post(auth::revoke_handler))
        .route(routes::POST_AUTH_VERIFY_EMAIL, post(auth::verify_email_handler))
        .route(
            routes::POST_AUTH_RESEND_VERIFICATION,
            post(auth::resend_verification_handler),
        )
        .route(
            routes::POST_AUTH_FORGOT_PASSWORD,
            post(auth::forgot_password_handler),
        )
        .route(
            routes::POST_AUTH_RESET_PASSWORD,
            post(auth::reset_password_handler),
        )
        .route(routes::GET_AUTH_OAUTH_URL, get(oauth::oauth_url_handler))
        .route(
            routes::GET_AUTH_OAUTH_CALLBACK,
            get(oauth::oauth_callback_handler),
        );

    // Protected routes (require auth)
    let protected = Router::new()
        .route(routes::GET_AUTH_ME, get(auth::me_handler))
        .route(routes::PUT_AUTH_PROFILE, put(auth::update_profile_handler))
        .route(
            routes::POST_AUTH_CHANGE_PASSWORD,
            post(auth::change_password_handler),
        )
        .route(routes::POST_AUTH_REVOKE_ALL, post(auth::revoke_all_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
