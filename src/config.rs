use serde::Deserialize;

/// Token signing configuration, process-wide and fixed at startup.
/// Rotating the secret invalidates every previously issued token.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub algorithm: String,
    pub expiration_hours: i64,
}

/// Whether optional profile fields are stored plaintext or KMS-encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileEncryption {
    Plain,
    Kms,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub table_name: String,
    pub kms_key_id: String,
    pub profile_encryption: ProfileEncryption,
    /// Endpoint override for local DynamoDB/KMS stacks.
    pub endpoint_url: Option<String>,
    pub jwt: JwtConfig,
}

/// Reject typo'd algorithm identifiers at startup; a misconfigured
/// value must not quietly change which algorithm signs tokens.
fn validate_jwt_algorithm(algorithm: &str) -> anyhow::Result<()> {
    use std::str::FromStr;
    jsonwebtoken::Algorithm::from_str(algorithm)
        .map(|_| ())
        .map_err(|_| anyhow::anyhow!("unsupported JWT_ALGORITHM: {algorithm}"))
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let algorithm = std::env::var("JWT_ALGORITHM").unwrap_or_else(|_| "HS256".into());
        validate_jwt_algorithm(&algorithm)?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            algorithm,
            expiration_hours: std::env::var("JWT_EXPIRATION_HOURS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(24),
        };
        let profile_encryption = match std::env::var("PROFILE_ENCRYPTION").as_deref() {
            Ok("kms") => ProfileEncryption::Kms,
            _ => ProfileEncryption::Plain,
        };
        Ok(Self {
            table_name: std::env::var("DYNAMODB_TABLE_NAME").unwrap_or_else(|_| "users".into()),
            kms_key_id: std::env::var("KMS_KEY_ID")
                .unwrap_or_else(|_| "alias/auth-system-key".into()),
            profile_encryption,
            endpoint_url: std::env::var("AWS_ENDPOINT_URL").ok(),
            jwt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_algorithms_are_accepted() {
        validate_jwt_algorithm("HS256").expect("HS256 is supported");
        validate_jwt_algorithm("HS512").expect("HS512 is supported");
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let err = validate_jwt_algorithm("HS257").unwrap_err();
        assert!(err.to_string().contains("HS257"));
        validate_jwt_algorithm("").unwrap_err();
    }
}
