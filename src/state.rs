use std::sync::Arc;

use aws_config::BehaviorVersion;

use crate::config::{AppConfig, ProfileEncryption};
use crate::encrypt::{FieldEncryptor, KmsEncryptor};
use crate::store::{DynamoStore, MemoryStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    /// Present only in the KMS-backed deployment variant; the plain
    /// variant stores profile fields as given.
    pub encryptor: Option<Arc<dyn FieldEncryptor>>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let store = Arc::new(DynamoStore::new(
            aws_sdk_dynamodb::Client::new(&shared),
            &config.table_name,
        )) as Arc<dyn UserStore>;

        let encryptor = match config.profile_encryption {
            ProfileEncryption::Kms => Some(Arc::new(KmsEncryptor::new(
                aws_sdk_kms::Client::new(&shared),
                &config.kms_key_id,
            )) as Arc<dyn FieldEncryptor>),
            ProfileEncryption::Plain => None,
        };

        Ok(Self {
            store,
            encryptor,
            config,
        })
    }

    pub fn from_parts(
        store: Arc<dyn UserStore>,
        encryptor: Option<Arc<dyn FieldEncryptor>>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            encryptor,
            config,
        }
    }

    /// In-memory state for tests: `MemoryStore`, no encryptor, a
    /// one-hour token window.
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            table_name: "users".into(),
            kms_key_id: "alias/test".into(),
            profile_encryption: ProfileEncryption::Plain,
            endpoint_url: None,
            jwt: crate::config::JwtConfig {
                secret: "test-secret".into(),
                algorithm: "HS256".into(),
                expiration_hours: 1,
            },
        });
        Self {
            store: Arc::new(MemoryStore::default()),
            encryptor: None,
            config,
        }
    }
}
