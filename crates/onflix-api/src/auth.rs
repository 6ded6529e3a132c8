//! Bearer-token authentication and password hashing.

use std::time::Duration;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use onflix_models::User;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Lifetime of a password reset token.
pub const RESET_TOKEN_TTL_HOURS: i64 = 1;

/// Lifetime of an email verification token.
pub const VERIFICATION_TOKEN_TTL_HOURS: i64 = 24;

const ONE_TIME_TOKEN_LEN: usize = 32;

/// Access token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    pub email: String,
    pub role: String,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// HS256 signing and verification keys.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, expiry: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry,
        }
    }

    /// Issue an access token for `user`.
    pub fn issue(&self, user: &User, now: DateTime<Utc>) -> ApiResult<String> {
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: user.role.as_str().to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + self.expiry.as_secs() as i64,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ApiError::internal(format!("Failed to sign token: {}", e)))
    }

    /// Verify signature and expiry.
    pub fn verify(&self, token: &str) -> ApiResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| ApiError::unauthorized(format!("Token validation failed: {}", e)))
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }
}

/// Hash a password into an Argon2 PHC string.
pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))
}

/// Check a password against a stored PHC string.
///
/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            debug!("Unparseable password hash: {}", e);
            false
        }
    }
}

/// A fresh reset or verification token and the digest to store in its place.
pub fn generate_one_time_token() -> (String, String) {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ONE_TIME_TOKEN_LEN)
        .map(char::from)
        .collect();
    let digest = hash_one_time_token(&token);
    (token, digest)
}

pub fn hash_one_time_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn bearer_token(parts: &Parts) -> ApiResult<&str> {
    let auth_header = parts
        .headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header format"))
}

/// Authenticated, active account.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub claims: Claims,
}

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }
}

/// Axum extractor for authenticated user.
#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims = state.jwt.verify(token)?;

        // Deactivated accounts lose access even with a live token
        let user = state
            .repos
            .users
            .find_active(&claims.sub)
            .await?
            .ok_or_else(|| ApiError::unauthorized("User not found or inactive"))?;

        Ok(AuthUser { user, claims })
    }
}

/// Authenticated account with the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser { user, .. } = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::forbidden("Admin access required"));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onflix_models::{Role, UserPreferences};

    fn user() -> User {
        let now = Utc::now();
        User {
            id: "user-1".to_string(),
            email: "ada@example.com".to_string(),
            password_hash: String::new(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            phone: String::new(),
            avatar: String::new(),
            is_active: true,
            is_email_verified: false,
            email_verified_at: None,
            email_verification_token: None,
            email_verification_expiry: None,
            role: Role::Admin,
            stripe_customer_id: None,
            subscription: None,
            profiles: vec![],
            preferences: UserPreferences::default(),
            last_login_at: None,
            password_reset_token: None,
            password_reset_expiry: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_token_round_trip() {
        let keys = JwtKeys::new("secret", Duration::from_secs(3600));
        let token = keys.issue(&user(), Utc::now()).unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn test_token_rejected_with_other_secret() {
        let token = JwtKeys::new("secret", Duration::from_secs(3600))
            .issue(&user(), Utc::now())
            .unwrap();
        let other = JwtKeys::new("other", Duration::from_secs(3600));
        assert!(matches!(other.verify(&token), Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let keys = JwtKeys::new("secret", Duration::from_secs(60));
        let issued = Utc::now() - chrono::Duration::hours(2);
        let token = keys.issue(&user(), issued).unwrap();
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn test_password_hashing() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn test_reset_token_digest() {
        let (token, digest) = generate_one_time_token();
        assert_eq!(token.len(), ONE_TIME_TOKEN_LEN);
        assert_eq!(hash_one_time_token(&token), digest);
        assert_ne!(token, digest);
    }
}
