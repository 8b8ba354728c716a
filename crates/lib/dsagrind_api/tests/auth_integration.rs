//! Integration tests: build the router over in-memory collaborators and
//! drive the auth endpoints end to end.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use dsagrind_api::{AppState, config::ApiConfig};
use dsagrind_core::auth::Collaborators;
use dsagrind_core::auth::tokens::digest;
use dsagrind_core::cache::MemoryCache;
use dsagrind_core::config::SessionConfig;
use dsagrind_core::email::{EmailError, EmailSender, EmailTemplate};
use dsagrind_core::events::TracingEventSink;
use dsagrind_core::oauth::{OAuthClient, OAuthError, OAuthProvider, OAuthUser};
use dsagrind_core::store::{MemoryUserStore, UserStore};
use serde_json::{Value, json};
use tower::ServiceExt;

#[derive(Default)]
struct Outbox {
    links: Mutex<Vec<(String, String)>>,
}

impl Outbox {
    fn token_for(&self, to: &str) -> String {
        let links = self.links.lock().unwrap();
        let (_, link) = links
            .iter()
            .rev()
            .find(|(addr, _)| addr == to)
            .expect("email sent");
        link.split("token=").nth(1).expect("token in link").to_string()
    }
}

#[async_trait]
impl EmailSender for Outbox {
    async fn send(&self, to: &str, template: EmailTemplate) -> Result<(), EmailError> {
        if let EmailTemplate::Verification { link, .. } | EmailTemplate::PasswordReset { link, .. } =
            template
        {
            self.links.lock().unwrap().push((to.to_string(), link));
        }
        Ok(())
    }
}

struct StaticOAuth;

#[async_trait]
impl OAuthClient for StaticOAuth {
    async fn authorization_url(
        &self,
        provider: OAuthProvider,
        state: Option<&str>,
    ) -> Result<String, OAuthError> {
        Ok(format!(
            "https://{provider}.test/authorize?state={}",
            state.unwrap_or("s")
        ))
    }

    async fn exchange(
        &self,
        provider: OAuthProvider,
        code: &str,
        state: &str,
    ) -> Result<OAuthUser, OAuthError> {
        if state != "expected" {
            return Err(OAuthError::InvalidState);
        }
        Ok(OAuthUser {
            provider,
            id: format!("ext-{code}"),
            email: format!("{code}@oauth.test"),
            username: Some(code.to_string()),
            first_name: None,
            last_name: None,
            avatar_url: None,
        })
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryUserStore>,
    outbox: Arc<Outbox>,
}

fn app() -> TestApp {
    let mut session = SessionConfig::new("integration-secret");
    session.bcrypt_cost = 4;
    let store = Arc::new(MemoryUserStore::new());
    let outbox = Arc::new(Outbox::default());
    let state = AppState::new(
        ApiConfig::new(session),
        Collaborators {
            store: store.clone(),
            cache: Arc::new(MemoryCache::new()),
            events: Arc::new(TracingEventSink),
            email: outbox.clone(),
            oauth: Arc::new(StaticOAuth),
        },
    );
    TestApp {
        router: dsagrind_api::router(state),
        store,
        outbox,
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", "198.51.100.20")
        .body(Body::from(body.to_string()))
        .unwrap()
}

impl TestApp {
    async fn call(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let resp = self.router.clone().oneshot(request).await.expect("request");
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).expect("parse JSON")
        };
        (status, headers, json)
    }

    async fn register(&self, username: &str, email: &str) -> Value {
        let (status, _, body) = self
            .call(post_json(
                "/api/auth/register",
                json!({ "username": username, "email": email, "password": "Secret123!" }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "register failed: {body}");
        body
    }

    async fn verified_login(&self, username: &str, email: &str) -> Value {
        self.register(username, email).await;
        let token = self.outbox.token_for(email);
        let (_, _, body) = self
            .call(post_json("/api/auth/verify-email", json!({ "token": token })))
            .await;
        assert_eq!(body["success"], true);
        let (status, _, body) = self
            .call(post_json(
                "/api/auth/login",
                json!({ "email": email, "password": "Secret123!" }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }
}

fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn register_verify_login_flow() {
    let app = app();
    let registered = app.register("bob", "bob@x.com").await;
    assert_eq!(registered["tokenType"], "Bearer");
    assert_eq!(registered["user"]["username"], "bob");
    assert_eq!(registered["user"]["emailVerified"], false);

    let (status, _, body) = app
        .call(post_json(
            "/api/auth/login",
            json!({ "email": "bob@x.com", "password": "Secret123!" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let token = app.outbox.token_for("bob@x.com");
    let (_, _, body) = app
        .call(post_json("/api/auth/verify-email", json!({ "token": token })))
        .await;
    assert_eq!(body["success"], true);

    let (status, headers, body) = app
        .call(post_json(
            "/api/auth/login",
            json!({ "email": "bob@x.com", "password": "Secret123!" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["accessToken"].as_str().is_some_and(|t| !t.is_empty()));
    assert_ne!(body["refreshToken"], registered["refreshToken"]);

    let cookies = set_cookies(&headers);
    assert!(cookies.iter().any(|c| c.starts_with("dsagrind_access=") && c.contains("HttpOnly")));
    assert!(cookies.iter().any(|c| c.starts_with("dsagrind_refresh=")));
}

#[tokio::test]
async fn forwarded_address_is_recorded_on_tokens() {
    let app = app();
    let body = app.register("bob", "bob@x.com").await;
    let refresh = body["refreshToken"].as_str().unwrap();
    let user = app
        .store
        .find_by_refresh_token(&digest(refresh))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.refresh_tokens[0].created_by_ip, "198.51.100.20");
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = app();
    app.register("bob", "bob@x.com").await;
    let (status, _, body) = app
        .call(post_json(
            "/api/auth/register",
            json!({ "username": "bobby", "email": "bob@x.com", "password": "Secret123!" }),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn repeated_failures_are_throttled() {
    let app = app();
    app.verified_login("bob", "bob@x.com").await;
    for _ in 0..5 {
        let (status, _, _) = app
            .call(post_json(
                "/api/auth/login",
                json!({ "email": "bob@x.com", "password": "wrong-password" }),
            ))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, headers, body) = app
        .call(post_json(
            "/api/auth/login",
            json!({ "email": "bob@x.com", "password": "Secret123!" }),
        ))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");
    assert!(headers.contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn refresh_accepts_cookie_and_rotates() {
    let app = app();
    let body = app.register("bob", "bob@x.com").await;
    let old = body["refreshToken"].as_str().unwrap().to_string();

    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/refresh")
        .header(header::COOKIE, format!("dsagrind_refresh={old}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, rotated) = app.call(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(rotated["refreshToken"].as_str().unwrap(), old);

    let (status, _, _) = app
        .call(post_json("/api/auth/refresh", json!({ "refreshToken": old })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = app
        .call(post_json("/api/auth/refresh", json!({})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn revoke_reports_soft_failure_for_unknown_tokens() {
    let app = app();
    let body = app.register("bob", "bob@x.com").await;
    let token = body["refreshToken"].as_str().unwrap();

    let (status, headers, body) = app
        .call(post_json("/api/auth/revoke", json!({ "refreshToken": token })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(
        set_cookies(&headers)
            .iter()
            .any(|c| c.starts_with("dsagrind_refresh=") && c.contains("Max-Age=0"))
    );

    let (status, _, body) = app
        .call(post_json("/api/auth/revoke", json!({ "refreshToken": token })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let app = app();
    let login = app.verified_login("bob", "bob@x.com").await;
    let access = login["accessToken"].as_str().unwrap();

    let (status, _, _) = app
        .call(Request::get("/api/auth/me").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = app
        .call(
            Request::get("/api/auth/me")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, me) = app
        .call(
            Request::get("/api/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {access}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "bob");
    assert_eq!(me["hasPassword"], true);

    let (status, _, me) = app
        .call(
            Request::put("/api/auth/profile")
                .header(header::AUTHORIZATION, format!("Bearer {access}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "bio": "grinding" }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["profile"]["bio"], "grinding");
}

#[tokio::test]
async fn change_password_mismatch_is_soft() {
    let app = app();
    let login = app.verified_login("bob", "bob@x.com").await;
    let access = login["accessToken"].as_str().unwrap();

    let request = Request::post("/api/auth/change-password")
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "currentPassword": "nope-nope", "newPassword": "BrandNew456!" }).to_string(),
        ))
        .unwrap();
    let (status, _, body) = app.call(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn revoke_all_signs_out_everywhere() {
    let app = app();
    let login = app.verified_login("bob", "bob@x.com").await;
    let access = login["accessToken"].as_str().unwrap();
    let refresh = login["refreshToken"].as_str().unwrap();

    let (status, _, body) = app
        .call(
            Request::post("/api/auth/revoke-all")
                .header(header::AUTHORIZATION, format!("Bearer {access}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["revoked"], 2);

    let (status, _, _) = app
        .call(post_json("/api/auth/refresh", json!({ "refreshToken": refresh })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn password_reset_flow() {
    let app = app();
    app.verified_login("bob", "bob@x.com").await;

    let (_, _, body) = app
        .call(post_json(
            "/api/auth/forgot-password",
            json!({ "email": "nobody@x.com" }),
        ))
        .await;
    assert_eq!(body["success"], true);

    let (_, _, body) = app
        .call(post_json("/api/auth/forgot-password", json!({ "email": "bob@x.com" })))
        .await;
    assert_eq!(body["success"], true);
    let token = app.outbox.token_for("bob@x.com");

    let (_, _, body) = app
        .call(post_json(
            "/api/auth/reset-password",
            json!({ "token": token, "newPassword": "BrandNew456!" }),
        ))
        .await;
    assert_eq!(body["success"], true);

    let (_, _, body) = app
        .call(post_json(
            "/api/auth/reset-password",
            json!({ "token": token, "newPassword": "BrandNew456!" }),
        ))
        .await;
    assert_eq!(body["success"], false);

    let (status, _, _) = app
        .call(post_json(
            "/api/auth/login",
            json!({ "email": "bob@x.com", "password": "BrandNew456!" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn oauth_routes() {
    let app = app();

    let (status, _, body) = app
        .call(
            Request::get("/api/auth/oauth/myspace/url")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _, body) = app
        .call(
            Request::get("/api/auth/oauth/google/url?state=abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://google.test/authorize?state=abc");

    let (status, _, _) = app
        .call(
            Request::get("/api/auth/oauth/github/callback?code=carol&state=forged")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, body) = app
        .call(
            Request::get("/api/auth/oauth/github/callback?code=carol&state=expected")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "carol");
    assert_eq!(body["user"]["emailVerified"], true);
    assert_eq!(app.store.user_count().await, 1);
}
