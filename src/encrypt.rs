use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_kms::{primitives::Blob, Client};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Envelope encryption for optional profile fields. Ciphertext is
/// transported as base64 so it can live in a plain string attribute.
#[async_trait]
pub trait FieldEncryptor: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> anyhow::Result<String>;
    async fn decrypt(&self, blob: &str) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct KmsEncryptor {
    client: Client,
    key_id: String,
}

impl KmsEncryptor {
    pub fn new(client: Client, key_id: &str) -> Self {
        Self {
            client,
            key_id: key_id.to_string(),
        }
    }
}

#[async_trait]
impl FieldEncryptor for KmsEncryptor {
    async fn encrypt(&self, plaintext: &str) -> anyhow::Result<String> {
        let output = self
            .client
            .encrypt()
            .key_id(&self.key_id)
            .plaintext(Blob::new(plaintext.as_bytes()))
            .send()
            .await
            .context("kms encrypt")?;
        let ciphertext = output
            .ciphertext_blob()
            .context("kms encrypt returned no ciphertext")?;
        Ok(BASE64.encode(ciphertext.as_ref()))
    }

    async fn decrypt(&self, blob: &str) -> anyhow::Result<String> {
        let ciphertext = BASE64.decode(blob).context("decode ciphertext blob")?;
        let output = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext))
            .send()
            .await
            .context("kms decrypt")?;
        let plaintext = output
            .plaintext()
            .context("kms decrypt returned no plaintext")?;
        String::from_utf8(plaintext.as_ref().to_vec()).context("ciphertext was not utf-8")
    }
}
