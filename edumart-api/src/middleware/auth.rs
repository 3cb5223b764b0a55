use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{AppState, AuthConfig};

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Instructor,
    Admin,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
}

/// Signs a token for `user_id`. Tokens normally come from the identity service; this exists
/// for local runs and tests.
pub fn issue_token(auth: &AuthConfig, user_id: Uuid, role: Role) -> jsonwebtoken::errors::Result<String> {
    let claims = Claims {
        sub: user_id,
        role,
        exp: (Utc::now() + Duration::seconds(auth.expiration as i64)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(auth.secret.as_bytes()))
}

fn bearer_claims(state: &AppState, req: &Request) -> Result<Claims, StatusCode> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| StatusCode::UNAUTHORIZED)
}

async fn require_roles(
    state: &AppState,
    mut req: Request,
    next: Next,
    allowed: &[Role],
) -> Result<Response, StatusCode> {
    let claims = bearer_claims(state, &req)?;
    if !allowed.contains(&claims.role) {
        return Err(StatusCode::FORBIDDEN);
    }
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

// ============================================================================
// Middlewares
// ============================================================================

/// Any signed-in buyer. Instructors buy courses too.
pub async fn user_auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    require_roles(&state, req, next, &[Role::Customer, Role::Instructor]).await
}

pub async fn instructor_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    require_roles(&state, req, next, &[Role::Instructor]).await
}

pub async fn admin_auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    require_roles(&state, req, next, &[Role::Admin]).await
}
