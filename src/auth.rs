use std::env;
use std::future::Future;

use anyhow::Context;
use axum::{
    extract::{FromRequestParts, Json, State},
    http::{header, request::Parts, StatusCode},
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::models::{Role, User};
use crate::db::{self, NewUser};
use crate::error::ApiError;
use crate::AppState;

/// Bearer tokens are valid for 7 days.
const TOKEN_TTL_DAYS: i64 = 7;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    exp: usize,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub area: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

/// Caller identity resolved from the bearer token. Handlers take this
/// explicitly; routes without it are public.
pub struct AuthenticatedUser {
    pub id: i64,
    pub role: Role,
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync + 'static,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let token = extract_token(parts)
                .ok_or_else(|| ApiError::Unauthorized("Token is missing".to_string()))?;
            let secret = env::var("JWT_SECRET").map_err(|_| {
                tracing::error!("JWT_SECRET not set");
                ApiError::Internal(anyhow::anyhow!("JWT_SECRET not set"))
            })?;

            let mut validation = Validation::default();
            validation.validate_exp = true;

            let data = decode::<Claims>(
                &token,
                &DecodingKey::from_secret(secret.as_ref()),
                &validation,
            )
            .map_err(|e| {
                tracing::warn!("token rejected: {}", e);
                ApiError::Unauthorized("Token is invalid".to_string())
            })?;

            let id = data
                .claims
                .sub
                .parse::<i64>()
                .map_err(|_| ApiError::Unauthorized("Token is invalid".to_string()))?;

            Ok(AuthenticatedUser {
                id,
                role: data.claims.role,
            })
        }
    }
}

fn extract_token(parts: &Parts) -> Option<String> {
    let auth_header = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    auth_header
        .strip_prefix("Bearer ")
        .map(|token| token.to_string())
}

pub fn create_jwt(user: &User) -> anyhow::Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::days(TOKEN_TTL_DAYS))
        .context("valid timestamp")?
        .timestamp();

    let claims = Claims {
        sub: user.id.to_string(),
        role: user.role,
        exp: expiration as usize,
    };

    let secret =
        env::var("JWT_SECRET").map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable not set"))?;
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;
    Ok(token)
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.trim().is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation(
            "username, email and password are required".to_string(),
        ));
    }

    if db::find_user_by_username(&state.db, &req.username).await?.is_some() {
        return Err(ApiError::Validation("Username already exists".to_string()));
    }
    if db::find_user_by_email(&state.db, &req.email).await?.is_some() {
        return Err(ApiError::Validation("Email already registered".to_string()));
    }

    let password_hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST).context("hashing password")?;
    let user = db::create_user(
        &state.db,
        &NewUser {
            username: req.username,
            email: req.email,
            password_hash,
            role: req.role,
            phone: req.phone,
            city: req.city,
            area: req.area,
            latitude: req.latitude,
            longitude: req.longitude,
        },
        Utc::now(),
    )
    .await?;

    tracing::info!(user_id = user.id, role = user.role.as_str(), "registered user");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Registration successful" })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = db::find_user_by_username(&state.db, &req.username)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;

    let valid = bcrypt::verify(&req.password, &user.password_hash).context("verifying password")?;
    if !valid {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    let token = create_jwt(&user)?;
    Ok(Json(LoginResponse { token, user }))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let profile = db::get_user(&state.db, user.id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;
    Ok(Json(profile))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use chrono::Utc;

    fn sample_user(id: i64, role: Role) -> User {
        User {
            id,
            username: "sample".to_string(),
            email: "sample@example.com".to_string(),
            password_hash: "unused".to_string(),
            role,
            phone: None,
            city: None,
            area: None,
            latitude: None,
            longitude: None,
            points: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn token_round_trips_id_and_role() {
        std::env::set_var("JWT_SECRET", "test-secret");
        let token = create_jwt(&sample_user(42, Role::Volunteer)).expect("create token");

        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret("test-secret".as_ref()),
            &Validation::default(),
        )
        .expect("decode token");
        assert_eq!(data.claims.sub, "42");
        assert_eq!(data.claims.role, Role::Volunteer);

        // Expiry sits about a week out.
        let remaining = data.claims.exp as i64 - Utc::now().timestamp();
        assert!((TOKEN_TTL_DAYS * 86_400 - 60..=TOKEN_TTL_DAYS * 86_400).contains(&remaining));
    }

    #[test]
    fn bearer_token_is_read_from_the_authorization_header() {
        let (parts, _) = Request::builder()
            .header(header::AUTHORIZATION, "Bearer abc.def.ghi")
            .body(())
            .expect("request")
            .into_parts();
        assert_eq!(extract_token(&parts).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn missing_or_malformed_authorization_header_yields_no_token() {
        let (parts, _) = Request::builder().body(()).expect("request").into_parts();
        assert!(extract_token(&parts).is_none());

        let (parts, _) = Request::builder()
            .header(header::AUTHORIZATION, "Token abc")
            .body(())
            .expect("request")
            .into_parts();
        assert!(extract_token(&parts).is_none());
    }
}
