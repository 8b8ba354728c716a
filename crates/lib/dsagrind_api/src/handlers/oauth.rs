//! OAuth sign-in handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum_extra::extract::cookie::CookieJar;
use dsagrind_core::oauth::OAuthProvider;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::handlers::auth::session_cookies;
use crate::middleware::client_ip::ClientIp;
use crate::models::{AuthResponse, OAuthCallbackParams, OAuthUrlParams, OAuthUrlResponse};

fn parse_provider(raw: &str) -> AppResult<OAuthProvider> {
    raw.parse::<OAuthProvider>()
        .map_err(|e| AppError::Validation(e.to_string()))
}

/// `GET /api/auth/oauth/{provider}/url` — provider authorization URL.
pub async fn oauth_url_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<OAuthUrlParams>,
) -> AppResult<Json<OAuthUrlResponse>> {
    let provider = parse_provider(&provider)?;
    let url = state
        .service
        .generate_oauth_url(provider, params.state.as_deref())
        .await?;
    Ok(Json(OAuthUrlResponse { url }))
}

/// `GET /api/auth/oauth/{provider}/callback` — finish sign-in with the
/// provider's `code` and `state`.
pub async fn oauth_callback_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<OAuthCallbackParams>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<AuthResponse>)> {
    let provider = parse_provider(&provider)?;
    let session = state
        .service
        .oauth_login(provider, &params.code, &params.state, &ip)
        .await?;
    let jar = session_cookies(&state, jar, &session);
    Ok((jar, Json(session.into())))
}
