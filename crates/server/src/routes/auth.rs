use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{
    config::GoogleOAuthConfig,
    db::{models::User, new_id},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const USER_COLUMNS: &str =
    "id, email, name, password_hash, oauth_provider, oauth_subject, picture, role, plan, team_id, created_at";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/google", get(google_auth_url))
        .route("/google/session", get(google_session))
}

/// Merged at the API root, behind the auth middleware.
pub fn protected_router() -> Router<AppState> {
    Router::new().route("/auth/me", get(me))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub email: String,
    pub name: String,
    pub exp: usize,
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AppError::Internal("Failed to hash password".to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn create_token(user: &User, secret: &str, expiry_hours: i64) -> Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(chrono::Duration::hours(expiry_hours))
        .ok_or_else(|| AppError::Internal("Token expiry out of range".to_string()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        name: user.name.clone(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal("Failed to create token".to_string()))
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized)
}

async fn find_user_by_email(state: &AppState, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = ?"
    ))
    .bind(email)
    .fetch_optional(&state.db.pool)
    .await?;
    Ok(user)
}

async fn fetch_user(state: &AppState, user_id: &str) -> Result<User> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>> {
    let email = body.email.trim().to_lowercase();

    // Validate input
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    if body.password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    if find_user_by_email(&state, &email).await?.is_some() {
        return Err(AppError::Validation("Email already registered".to_string()));
    }

    let password_hash = hash_password(&body.password)?;
    let user_id = new_id("user");
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO users (id, email, name, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&user_id)
    .bind(&email)
    .bind(body.name.trim())
    .bind(&password_hash)
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    tracing::info!("Registered user {user_id}");

    let user = fetch_user(&state, &user_id).await?;
    let token = create_token(&user, &state.config.jwt_secret, state.config.jwt_expiry_hours)?;

    Ok(Json(AuthResponse { token, user }))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let user = find_user_by_email(&state, &body.email.trim().to_lowercase())
        .await?
        .ok_or(AppError::Unauthorized)?;

    // OAuth-only accounts have no password to check
    let password_hash = user.password_hash.as_deref().ok_or(AppError::Unauthorized)?;
    if !verify_password(&body.password, password_hash)? {
        return Err(AppError::Unauthorized);
    }

    let token = create_token(&user, &state.config.jwt_secret, state.config.jwt_expiry_hours)?;

    Ok(Json(AuthResponse { token, user }))
}

async fn me(State(state): State<AppState>, user: AuthUser) -> Result<Json<User>> {
    Ok(Json(fetch_user(&state, &user.id).await?))
}

#[derive(Debug, Serialize)]
pub struct GoogleAuthUrl {
    pub auth_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn google_consent_url(google: &GoogleOAuthConfig) -> Result<String> {
    let url = reqwest::Url::parse_with_params(
        GOOGLE_AUTH_URL,
        &[
            ("client_id", google.client_id.as_str()),
            ("redirect_uri", google.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", "openid email profile"),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|err| AppError::Internal(format!("Invalid OAuth URL: {err}")))?;
    Ok(url.to_string())
}

async fn google_auth_url(State(state): State<AppState>) -> Result<Json<GoogleAuthUrl>> {
    let response = match &state.config.google {
        Some(google) => GoogleAuthUrl {
            auth_url: Some(google_consent_url(google)?),
            message: None,
        },
        None => GoogleAuthUrl {
            auth_url: None,
            message: Some("Google sign-in is not configured".to_string()),
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct GoogleSessionQuery {
    pub code: String,
}

#[derive(Deserialize)]
struct GoogleTokenResponse {
    id_token: String,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct GoogleProfile {
    pub sub: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Read the profile claims from an id_token. The token came straight from
/// Google's token endpoint over TLS, so the signature is not re-verified.
pub fn decode_id_token_payload(id_token: &str) -> Result<GoogleProfile> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| AppError::BadRequest("Malformed id_token".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| AppError::BadRequest("Malformed id_token payload".to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| AppError::BadRequest("id_token is missing profile claims".to_string()))
}

async fn exchange_code(state: &AppState, google: &GoogleOAuthConfig, code: &str) -> Result<String> {
    let response = state
        .http
        .post(GOOGLE_TOKEN_URL)
        .form(&[
            ("code", code),
            ("client_id", google.client_id.as_str()),
            ("client_secret", google.client_secret.as_str()),
            ("redirect_uri", google.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .map_err(|err| AppError::Upstream(format!("Google token exchange failed: {err}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::warn!("Google token exchange returned {status}: {body}");
        return Err(AppError::Unauthorized);
    }

    let token: GoogleTokenResponse = response
        .json()
        .await
        .map_err(|err| AppError::Upstream(format!("Unexpected Google token response: {err}")))?;
    Ok(token.id_token)
}

/// Create the user on first sign-in, otherwise link the Google identity to
/// the existing account with the same email.
async fn upsert_google_user(state: &AppState, profile: &GoogleProfile) -> Result<User> {
    let email = profile.email.trim().to_lowercase();

    match find_user_by_email(state, &email).await? {
        Some(existing) => {
            sqlx::query(
                "UPDATE users SET oauth_provider = 'google', oauth_subject = ?, picture = COALESCE(?, picture) WHERE id = ?",
            )
            .bind(&profile.sub)
            .bind(&profile.picture)
            .bind(&existing.id)
            .execute(&state.db.pool)
            .await?;
            fetch_user(state, &existing.id).await
        }
        None => {
            let user_id = new_id("user");
            let name = profile
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

            sqlx::query(
                "INSERT INTO users (id, email, name, oauth_provider, oauth_subject, picture, created_at) VALUES (?, ?, ?, 'google', ?, ?, ?)",
            )
            .bind(&user_id)
            .bind(&email)
            .bind(&name)
            .bind(&profile.sub)
            .bind(&profile.picture)
            .bind(Utc::now().to_rfc3339())
            .execute(&state.db.pool)
            .await?;

            tracing::info!("Registered user {user_id} via Google");
            fetch_user(state, &user_id).await
        }
    }
}

async fn google_session(
    State(state): State<AppState>,
    Query(query): Query<GoogleSessionQuery>,
) -> Result<Redirect> {
    let google = state
        .config
        .google
        .clone()
        .ok_or_else(|| AppError::BadRequest("Google sign-in is not configured".to_string()))?;

    let id_token = exchange_code(&state, &google, &query.code).await?;
    let profile = decode_id_token_payload(&id_token)?;
    let user = upsert_google_user(&state, &profile).await?;
    let token = create_token(&user, &state.config.jwt_secret, state.config.jwt_expiry_hours)?;

    let target = format!(
        "{}/login?token={}",
        state.config.frontend_url.trim_end_matches('/'),
        token
    );
    Ok(Redirect::to(&target))
}
