//! httpOnly auth cookies: `dsagrind_access`, `dsagrind_refresh`.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

/// Cookie name for the access token.
pub const ACCESS_COOKIE: &str = "dsagrind_access";
/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "dsagrind_refresh";

fn auth_cookie(name: &str, value: String, max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .build()
}

/// Build a httpOnly cookie for the access token.
pub fn access_cookie(token: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    auth_cookie(
        ACCESS_COOKIE,
        token.to_string(),
        Duration::seconds(max_age_secs.max(0)),
        secure,
    )
}

/// Build a httpOnly cookie for the refresh token.
pub fn refresh_cookie(token: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    auth_cookie(
        REFRESH_COOKIE,
        token.to_string(),
        Duration::seconds(max_age_secs.max(0)),
        secure,
    )
}

/// Replace both auth cookies with expired ones.
pub fn clear_auth_cookies(jar: CookieJar, secure: bool) -> CookieJar {
    jar.add(auth_cookie(ACCESS_COOKIE, String::new(), Duration::ZERO, secure))
        .add(auth_cookie(REFRESH_COOKIE, String::new(), Duration::ZERO, secure))
}

/// Refresh token carried by the request's cookie, if any.
pub fn refresh_token_from(jar: &CookieJar) -> Option<String> {
    jar.get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookies_are_http_only_and_scoped_to_root() {
        let cookie = refresh_cookie("abc", 60, true);
        assert_eq!(cookie.name(), REFRESH_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(60)));
    }

    #[test]
    fn negative_lifetimes_clamp_to_zero() {
        let cookie = access_cookie("abc", -5, false);
        assert_eq!(cookie.max_age(), Some(Duration::ZERO));
    }

    #[test]
    fn cleared_jar_drops_refresh_token() {
        let jar = CookieJar::new().add(refresh_cookie("abc", 60, false));
        assert_eq!(refresh_token_from(&jar).as_deref(), Some("abc"));
        let jar = clear_auth_cookies(jar, false);
        assert!(refresh_token_from(&jar).is_none());
    }
}
