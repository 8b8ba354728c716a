//! Authentication request handlers.

use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use dsagrind_core::auth::{AuthError, Registration};
use dsagrind_core::models::auth::{AuthSession, ProfileUpdate, UserView};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::middleware::client_ip::ClientIp;
use crate::models::{
    AuthResponse, ChangePasswordRequest, EmailRequest, LoginRequest, RefreshTokenRequest,
    RegisterRequest, ResetPasswordRequest, RevokeAllResponse, SuccessResponse,
    VerifyEmailRequest,
};
use crate::services::cookies;

/// Attach access/refresh cookies for a freshly opened session.
pub(crate) fn session_cookies(state: &AppState, jar: CookieJar, session: &AuthSession) -> CookieJar {
    let secure = state.config.cookie_secure;
    let access_secs = (session.expires_at - Utc::now()).num_seconds();
    let refresh_secs = state.config.session.refresh_token_ttl.as_secs() as i64;
    jar.add(cookies::access_cookie(
        &session.access_token,
        access_secs,
        secure,
    ))
    .add(cookies::refresh_cookie(
        &session.refresh_token,
        refresh_secs,
        secure,
    ))
}

/// Report soft failures as `{ "success": false }`; hard ones as errors.
fn soft(result: Result<(), AuthError>) -> AppResult<Json<SuccessResponse>> {
    match result {
        Ok(()) => Ok(Json(SuccessResponse::ok())),
        Err(e) if e.is_soft() => Ok(Json(SuccessResponse::failed(e.to_string()))),
        Err(e) => Err(e.into()),
    }
}

/// Refresh token from the JSON body, else the refresh cookie.
fn refresh_token_input(body: &Bytes, jar: &CookieJar) -> AppResult<String> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RefreshTokenRequest::default()
    } else {
        serde_json::from_slice::<RefreshTokenRequest>(body)
            .map_err(|e| AppError::Validation(format!("Invalid request body: {e}")))?
    };
    request
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| cookies::refresh_token_from(jar))
        .ok_or_else(|| AppError::Unauthorized("Missing refresh token".into()))
}

/// `POST /api/auth/login` — authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<AuthResponse>)> {
    let session = state.service.login(&body.email, &body.password, &ip).await?;
    let jar = session_cookies(&state, jar, &session);
    Ok((jar, Json(session.into())))
}

/// `POST /api/auth/register` — create an account and sign it in.
pub async fn register_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(CookieJar, Json<AuthResponse>)> {
    let registration = Registration {
        username: body.username,
        email: body.email,
        password: body.password,
        first_name: body.first_name,
        last_name: body.last_name,
    };
    let session = state.service.register(registration, &ip).await?;
    let jar = session_cookies(&state, jar, &session);
    Ok((jar, Json(session.into())))
}

/// `POST /api/auth/refresh` — rotate a refresh token into a new pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    body: Bytes,
) -> AppResult<(CookieJar, Json<AuthResponse>)> {
    let token = refresh_token_input(&body, &jar)?;
    let session = state.service.refresh_token(&token, &ip).await?;
    let jar = session_cookies(&state, jar, &session);
    Ok((jar, Json(session.into())))
}

/// `POST /api/auth/revoke` — revoke one refresh token (logout).
pub async fn revoke_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    body: Bytes,
) -> AppResult<(CookieJar, Json<SuccessResponse>)> {
    let token = refresh_token_input(&body, &jar)?;
    let result = soft(state.service.revoke_token(&token, &ip).await)?;
    Ok((cookies::clear_auth_cookies(jar, state.config.cookie_secure), result))
}

/// `POST /api/auth/revoke-all` — sign the caller out everywhere.
pub async fn revoke_all_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<RevokeAllResponse>)> {
    let response = match state.service.revoke_all_tokens(&claims.sub, &ip).await {
        Ok(revoked) => RevokeAllResponse {
            success: true,
            revoked,
        },
        Err(e) if e.is_soft() => RevokeAllResponse {
            success: false,
            revoked: 0,
        },
        Err(e) => return Err(e.into()),
    };
    Ok((
        cookies::clear_auth_cookies(jar, state.config.cookie_secure),
        Json(response),
    ))
}

/// `POST /api/auth/verify-email` — consume an email verification token.
pub async fn verify_email_handler(
    State(state): State<AppState>,
    Json(body): Json<VerifyEmailRequest>,
) -> AppResult<Json<SuccessResponse>> {
    soft(state.service.verify_email(&body.token).await)
}

/// `POST /api/auth/resend-verification` — send a fresh verification email.
pub async fn resend_verification_handler(
    State(state): State<AppState>,
    Json(body): Json<EmailRequest>,
) -> AppResult<Json<SuccessResponse>> {
    soft(state.service.resend_email_verification(&body.email).await)
}

/// `POST /api/auth/forgot-password` — start a reset. Always reports success.
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<EmailRequest>,
) -> AppResult<Json<SuccessResponse>> {
    state.service.forgot_password(&body.email, &ip).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// `POST /api/auth/reset-password` — set a new password with a reset token.
pub async fn reset_password_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<Json<SuccessResponse>> {
    soft(
        state
            .service
            .reset_password(&body.token, &body.new_password, &ip)
            .await,
    )
}

/// `POST /api/auth/change-password` — change the caller's password.
pub async fn change_password_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    Json(body): Json<ChangePasswordRequest>,
) -> AppResult<Json<SuccessResponse>> {
    soft(
        state
            .service
            .change_password(&claims.sub, &body.current_password, &body.new_password)
            .await,
    )
}

/// `GET /api/auth/me` — the caller's profile.
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
) -> AppResult<Json<UserView>> {
    Ok(Json(state.service.get_user(&claims.sub).await?))
}

/// `PUT /api/auth/profile` — update the caller's profile fields.
pub async fn update_profile_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
    Json(body): Json<ProfileUpdate>,
) -> AppResult<Json<UserView>> {
    Ok(Json(state.service.update_profile(&claims.sub, body).await?))
}
