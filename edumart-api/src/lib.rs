use axum::{
    extract::{ConnectInfo, FromRequestParts, State},
    http::{request::Parts, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod orders;
pub mod payments;
pub mod state;
pub mod wallets;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .merge(payments::routes())
        .merge(orders::routes(state.clone()))
        .merge(wallets::routes(state.clone()))
        .merge(admin::routes(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.gather() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

/// Fixed window per client IP. Redis errors let the request through.
async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<impl IntoResponse, impl IntoResponse> {
    let Some(redis) = state.redis.as_ref() else {
        return Ok(next.run(req).await);
    };

    let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let key = format!("ratelimit:{}", client_ip(req.headers(), peer));

    match redis.check_rate_limit(&key, state.rate_limit_per_minute, 60).await {
        Ok(true) => Ok(next.run(req).await),
        Ok(false) => Err((StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")),
        Err(e) => {
            tracing::warn!("Rate limiter unavailable, letting request through: {}", e);
            Ok(next.run(req).await)
        }
    }
}

/// First hop of `X-Forwarded-For` when behind a proxy, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}

/// Request facts recorded on orders and sent to the gateway.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub origin: Option<String>,
    pub referer: Option<String>,
}

impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
        Ok(RequestMeta {
            client_ip: client_ip(&parts.headers, peer),
            user_agent: header_value(&parts.headers, "user-agent"),
            origin: header_value(&parts.headers, "origin"),
            referer: header_value(&parts.headers, "referer"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let peer: SocketAddr = "10.0.0.2:5000".parse().unwrap();

        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.9");
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "10.0.0.2");
        assert_eq!(client_ip(&HeaderMap::new(), None), "127.0.0.1");
    }
}
