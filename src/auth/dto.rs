use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request body for user registration. `email`/`password` default to
/// empty so missing fields surface as a 400 instead of a decode error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Response returned after registration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub message: String,
    pub user_id: Uuid,
}

/// OAuth 2.0 token response (RFC 6749 §5.1 field names).
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
}

/// Login response: the OAuth token response plus a generation timestamp.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub token: TokenResponse,
    pub timestamp: String,
}

/// Public profile returned by `GET /me`. Never carries the password hash.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_response_flattens_oauth_fields() {
        let response = LoginResponse {
            token: TokenResponse {
                access_token: "tok".into(),
                token_type: "Bearer".into(),
                expires_in: 86400,
                scope: "read write".into(),
            },
            timestamp: "2024-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["access_token"], "tok");
        assert_eq!(json["token_type"], "Bearer");
        assert_eq!(json["expires_in"], 86400);
        assert_eq!(json["scope"], "read write");
        assert_eq!(json["timestamp"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn register_request_accepts_camel_case_profile_fields() {
        let payload: RegisterRequest = serde_json::from_str(
            r#"{"email":"a@b.com","password":"password123","firstName":"John","lastName":"Doe"}"#,
        )
        .unwrap();
        assert_eq!(payload.first_name.as_deref(), Some("John"));
        assert_eq!(payload.last_name.as_deref(), Some("Doe"));
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let payload: LoginRequest = serde_json::from_str("{}").unwrap();
        assert!(payload.email.is_empty());
        assert!(payload.password.is_empty());
    }
}
