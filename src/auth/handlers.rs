use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    Json,
};
use lazy_static::lazy_static;
use regex::Regex;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{error, info, instrument, warn};

use crate::auth::dto::{
    LoginRequest, LoginResponse, MeResponse, RegisterRequest, RegisterResponse,
};
use crate::auth::extractors::AuthUser;
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify_password};
use crate::error::ApiError;
use crate::state::AppState;
use crate::store::UserRecord;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if payload.email.is_empty() || payload.password.is_empty() {
        warn!("registration with missing email or password");
        return Err(ApiError::MissingField);
    }
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email format");
        return Err(ApiError::InvalidEmailFormat);
    }
    // Count characters, not bytes: a short password made of multibyte
    // characters must not slip past the length gate.
    if payload.password.chars().count() < 8 {
        warn!("password too short");
        return Err(ApiError::WeakPassword);
    }

    if state.store.get_by_email(&payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(ApiError::DuplicateUser);
    }

    let hash = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        ApiError::Internal(e.to_string())
    })?;

    // KMS variant seals the optional profile fields before persistence;
    // the plain variant stores them as given.
    let (first_name, last_name) = match &state.encryptor {
        Some(encryptor) => {
            let mut sealed = Vec::with_capacity(2);
            for field in [payload.first_name, payload.last_name] {
                let value = match field {
                    Some(plain) => Some(
                        encryptor
                            .encrypt(&plain)
                            .await
                            .map_err(|e| ApiError::StoreUnavailable(e.to_string()))?,
                    ),
                    None => None,
                };
                sealed.push(value);
            }
            (sealed.remove(0), sealed.remove(0))
        }
        None => (payload.first_name, payload.last_name),
    };

    let record = UserRecord::new(payload.email, hash, first_name, last_name);
    state.store.create_if_absent(&record).await?;

    info!(user_id = %record.user_id, email = %record.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User created successfully".to_string(),
            user_id: record.user_id,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if payload.email.is_empty() || payload.password.is_empty() {
        warn!("login with missing email or password");
        return Err(ApiError::MissingField);
    }

    // Unknown email and wrong password report the same error, so a
    // caller cannot probe which addresses are registered.
    let user = match state.store.get_by_email(&payload.email).await? {
        Some(user) => user,
        None => {
            warn!(email = %payload.email, "login with unknown email");
            return Err(ApiError::InvalidCredentials);
        }
    };
    if !verify_password(&payload.password, &user.password_hash) {
        warn!(user_id = %user.user_id, "login with invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    let keys = JwtKeys::from_ref(&state);
    let access_token = keys.issue(user.user_id, &user.email).map_err(|e| {
        error!(error = %e, "jwt issue failed");
        ApiError::Internal(e.to_string())
    })?;
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!(user_id = %user.user_id, email = %user.email, "user logged in");
    Ok(Json(LoginResponse {
        token: keys.oauth_response(access_token),
        timestamp,
    }))
}

#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<MeResponse>, ApiError> {
    let user = state
        .store
        .get_by_id(claims.sub)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    let (first_name, last_name) = match &state.encryptor {
        Some(encryptor) => {
            let mut opened = Vec::with_capacity(2);
            for field in [user.first_name, user.last_name] {
                let value = match field {
                    Some(blob) => Some(
                        encryptor
                            .decrypt(&blob)
                            .await
                            .map_err(|e| ApiError::StoreUnavailable(e.to_string()))?,
                    ),
                    None => None,
                };
                opened.push(value);
            }
            (opened.remove(0), opened.remove(0))
        }
        None => (user.first_name, user.last_name),
    };

    let created_at = user
        .created_at
        .format(&Rfc3339)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(MeResponse {
        user_id: user.user_id,
        email: user.email,
        first_name,
        last_name,
        created_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encrypt::FieldEncryptor;
    use async_trait::async_trait;
    use axum::extract::FromRequestParts;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use std::sync::Arc;
    use uuid::Uuid;

    fn register_payload(email: &str, password: &str) -> Json<RegisterRequest> {
        Json(RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            first_name: Some("John".to_string()),
            last_name: Some("Doe".to_string()),
        })
    }

    fn login_payload(email: &str, password: &str) -> Json<LoginRequest> {
        Json(LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        })
    }

    async fn register_ok(state: &AppState, email: &str, password: &str) -> Uuid {
        let (status, Json(body)) = register(State(state.clone()), register_payload(email, password))
            .await
            .expect("register should succeed");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body.message, "User created successfully");
        body.user_id
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("first.last+tag@sub.example.co"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("missing@dot"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@.c"));
    }

    #[tokio::test]
    async fn register_rejects_missing_fields() {
        let state = AppState::fake();
        let err = register(State(state.clone()), register_payload("", "password123"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingField));
        let err = register(State(state), register_payload("a@b.com", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingField));
    }

    #[tokio::test]
    async fn register_rejects_invalid_email() {
        let state = AppState::fake();
        let err = register(State(state), register_payload("not-an-email", "password123"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidEmailFormat));
    }

    #[tokio::test]
    async fn register_rejects_weak_password() {
        let state = AppState::fake();
        let err = register(State(state), register_payload("a@b.com", "short1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::WeakPassword));
    }

    #[tokio::test]
    async fn register_rejects_short_multibyte_password() {
        // "ññññ" is 8 bytes but only 4 characters.
        let state = AppState::fake();
        let err = register(State(state.clone()), register_payload("a@b.com", "ññññ"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::WeakPassword));

        // 8 multibyte characters are long enough.
        register_ok(&state, "a@b.com", "ññññññññ").await;
    }

    #[tokio::test]
    async fn register_twice_reports_duplicate() {
        let state = AppState::fake();
        register_ok(&state, "a@b.com", "password123").await;
        let err = register(State(state), register_payload("a@b.com", "password123"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::DuplicateUser));
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn register_never_stores_the_plaintext_password() {
        let state = AppState::fake();
        register_ok(&state, "a@b.com", "password123").await;
        let record = state
            .store
            .get_by_email("a@b.com")
            .await
            .expect("lookup")
            .expect("present");
        assert_ne!(record.password_hash, "password123");
        assert!(verify_password("password123", &record.password_hash));
    }

    #[tokio::test]
    async fn login_missing_fields_rejected() {
        let state = AppState::fake();
        let err = login(State(state), login_payload("a@b.com", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingField));
    }

    #[tokio::test]
    async fn login_does_not_reveal_which_credential_was_wrong() {
        let state = AppState::fake();
        register_ok(&state, "a@b.com", "password123").await;

        let wrong_password = login(State(state.clone()), login_payload("a@b.com", "wrong-pass"))
            .await
            .unwrap_err();
        let unknown_email = login(State(state), login_payload("nobody@b.com", "password123"))
            .await
            .unwrap_err();

        assert_eq!(wrong_password.status(), unknown_email.status());
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert!(matches!(wrong_password, ApiError::InvalidCredentials));
    }

    #[tokio::test]
    async fn register_then_login_end_to_end() {
        let state = AppState::fake();
        let user_id = register_ok(&state, "a@b.com", "password123").await;

        let Json(response) = login(State(state.clone()), login_payload("a@b.com", "password123"))
            .await
            .expect("login should succeed");

        assert_eq!(response.token.token_type, "Bearer");
        assert_eq!(
            response.token.expires_in,
            state.config.jwt.expiration_hours * 3600
        );
        assert_eq!(response.token.scope, "read write");
        OffsetDateTime::parse(&response.timestamp, &Rfc3339).expect("timestamp is RFC 3339");

        let keys = JwtKeys::from_ref(&state);
        let claims = keys
            .verify(&response.token.access_token)
            .expect("token verifies");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "a@b.com");
    }

    #[tokio::test]
    async fn me_returns_profile_for_valid_token() {
        let state = AppState::fake();
        let user_id = register_ok(&state, "a@b.com", "password123").await;
        let keys = JwtKeys::from_ref(&state);
        let token = keys.issue(user_id, "a@b.com").expect("issue");

        let mut parts = axum::http::Request::builder()
            .header(
                axum::http::header::AUTHORIZATION,
                format!("Bearer {token}"),
            )
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let auth = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .expect("extractor accepts token");

        let Json(profile) = me(State(state), auth).await.expect("me succeeds");
        assert_eq!(profile.user_id, user_id);
        assert_eq!(profile.email, "a@b.com");
        assert_eq!(profile.first_name.as_deref(), Some("John"));
        assert_eq!(profile.last_name.as_deref(), Some("Doe"));
    }

    #[tokio::test]
    async fn me_rejects_garbage_and_missing_tokens() {
        let state = AppState::fake();

        let mut parts = axum::http::Request::builder()
            .header(axum::http::header::AUTHORIZATION, "Bearer garbage")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let err = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::TokenInvalid));

        let mut parts = axum::http::Request::builder()
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let err = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingToken));
    }

    struct FakeEncryptor;

    #[async_trait]
    impl FieldEncryptor for FakeEncryptor {
        async fn encrypt(&self, plaintext: &str) -> anyhow::Result<String> {
            Ok(BASE64.encode(plaintext))
        }
        async fn decrypt(&self, blob: &str) -> anyhow::Result<String> {
            Ok(String::from_utf8(BASE64.decode(blob)?)?)
        }
    }

    #[tokio::test]
    async fn kms_variant_stores_opaque_profile_fields_and_opens_them_on_read() {
        let base = AppState::fake();
        let state = AppState::from_parts(
            base.store.clone(),
            Some(Arc::new(FakeEncryptor)),
            base.config.clone(),
        );
        let user_id = register_ok(&state, "a@b.com", "password123").await;

        let record = state
            .store
            .get_by_id(user_id)
            .await
            .expect("lookup")
            .expect("present");
        assert_ne!(record.first_name.as_deref(), Some("John"));
        assert_ne!(record.last_name.as_deref(), Some("Doe"));

        let keys = JwtKeys::from_ref(&state);
        let token = keys.issue(user_id, "a@b.com").expect("issue");
        let mut parts = axum::http::Request::builder()
            .header(
                axum::http::header::AUTHORIZATION,
                format!("Bearer {token}"),
            )
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let auth = AuthUser::from_request_parts(&mut parts, &state)
            .await
            .expect("extractor accepts token");
        let Json(profile) = me(State(state), auth).await.expect("me succeeds");
        assert_eq!(profile.first_name.as_deref(), Some("John"));
        assert_eq!(profile.last_name.as_deref(), Some("Doe"));
    }
}
