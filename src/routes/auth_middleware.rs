use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use crate::AppState;
use crate::services::auth_service::{session_token, SessionToken};

/// Resolve the browser session once per request and hand it to the handlers
/// through request extensions. A missing cookie is not an error: the request
/// is forwarded unauthenticated and the backend decides.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {

    // 1. Read the session cookie
    let token = session_token(req.headers(), &state.config.session_cookie_name);

    // 2. Log whether the request carries a session
    if token.is_some() {
        debug!("{} {} with session", req.method(), req.uri().path());
    } else {
        debug!("{} {} without session", req.method(), req.uri().path());
    }

    // 3. Set the session into request extensions for downstream handlers
    req.extensions_mut().insert(SessionToken(token));

    next.run(req).await
}
