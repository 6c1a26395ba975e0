use axum::{
    Router,
    extract::Query,
    response::IntoResponse,
    routing::{get, post},
};
use log::info;
use serde::Deserialize;

use crate::state::AppState;

mod authorize;
mod consent;
mod discovery;
mod magic;
mod register;
mod session;
mod sso;
mod stream;
mod token;

/// Creates the router for all endpoints. Everything except the health probe
/// is rooted under the tenant path.
pub fn router() -> Router<AppState> {
    let tenant_routes = Router::new()
        .route(
            "/.well-known/openid-configuration",
            get(discovery::openid_configuration),
        )
        .route("/.well-known/jwks.json", get(discovery::jwks))
        .route("/oauth/authorize", get(authorize::authorize))
        .route("/oauth/magic/request", post(magic::request))
        .route(
            "/oauth/magic/consume",
            get(magic::consume).post(magic::resume),
        )
        .route("/oauth/consent", post(consent::decide))
        .route("/oauth/sse", get(stream::subscribe))
        .route("/oauth/token", post(token::token))
        .route("/oauth/introspect", post(token::introspect))
        .route("/oauth/revoke", post(token::revoke))
        .route("/oauth/register", post(register::register))
        .route("/oauth/userinfo", get(session::userinfo))
        .route("/logout", post(session::logout))
        .route("/sso/{provider}/start", get(sso::start))
        .route("/sso/{provider}/callback", get(sso::callback));

    Router::new()
        .route("/ping", get(ping))
        .nest("/a/{tenant}", tenant_routes)
}

#[derive(Deserialize, Debug)]
pub struct PingParams {
    msg: Option<String>,
}

pub async fn ping(Query(params): Query<PingParams>) -> impl IntoResponse {
    info!("GET /ping?msg={:?}", params.msg);
    match params.msg {
        Some(msg) => format!("pong: \"{msg}\""),
        None => "pong".to_string(),
    }
}
