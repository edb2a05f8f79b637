use axum::http::{self, HeaderMap, Uri};
use chrono::Utc;
use cookie::{Cookie, SameSite};
use jsonwebtoken::dangerous::insecure_decode;
use tracing::{debug, warn};

/// Newtype carried in request extensions by the session middleware
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionToken(pub Option<String>);

// Get the session token from the request cookies
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    for header in headers.get_all(http::header::COOKIE) {
        let Ok(cookie_header) = header.to_str() else {
            debug!("Ignoring non-ASCII Cookie header");
            continue;
        };
        for cookie in cookie::Cookie::split_parse(cookie_header) {
            if let Ok(c) = cookie {
                if c.name() == cookie_name && !c.value().is_empty() {
                    return Some(c.value().to_string());
                }
            }
        }
    }
    None
}

/// The cookie minted by the auth callback
pub fn session_cookie(name: &str, token: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(cookie::time::Duration::seconds(max_age_secs))
        .build()
}

/// A cookie that makes the browser drop the session cookie
pub fn removal_cookie(name: &str, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::build((name.to_string(), ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build();
    cookie.make_removal();
    cookie
}

/// Seconds the session cookie may live: never past `max_age_secs`, and never
/// past the token's own `exp` when the token is a JWT.
pub fn token_lifetime(token: &str, max_age_secs: i64) -> i64 {
    match token_expiry(token) {
        Some(exp) => {
            let remaining = exp - Utc::now().timestamp();
            if remaining <= 0 {
                warn!("Backend issued an already expired token");
            }
            remaining.clamp(0, max_age_secs)
        }
        None => max_age_secs,
    }
}

// The backend owns signature checks; only the expiry is read here.
fn token_expiry(token: &str) -> Option<i64> {
    let data = insecure_decode::<serde_json::Value>(token).ok()?;
    let exp = data.claims.get("exp")?;
    exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))
}

/// Whether the browser reached us over TLS (directly or via a terminating proxy)
pub fn is_secure_request(headers: &HeaderMap, uri: &Uri, force: bool) -> bool {
    if force || uri.scheme_str() == Some("https") {
        return true;
    }
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

/// Only same-origin paths are honoured as post-login destinations.
pub fn safe_redirect(candidate: Option<&str>, default: &str) -> String {
    match candidate {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => path.to_string(),
        Some(other) => {
            warn!("Ignoring off-origin redirect '{}'", other);
            default.to_string()
        }
        None => default.to_string(),
    }
}
