use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, Put, TransactWriteItem};
use aws_sdk_dynamodb::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

/// User record as persisted in the users table.
///
/// `first_name`/`last_name` hold either plaintext or opaque base64
/// ciphertext depending on the configured profile-encryption variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserRecord {
    pub fn new(
        email: String,
        password_hash: String,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            user_id: Uuid::new_v4(),
            email,
            password_hash,
            first_name,
            last_name,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Profile-field changes applied by `update`. `updated_at` is refreshed
/// on every update regardless of which fields change.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The conditional write lost: the id or the email already exists.
    #[error("record already exists")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Capability contract for the user record store. Implemented by
/// `DynamoStore` in production and `MemoryStore` for tests.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Atomic conditional insert covering both the generated id and the
    /// email, so two registrations racing on the same email cannot both
    /// succeed.
    async fn create_if_absent(&self, record: &UserRecord) -> Result<(), StoreError>;
    async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;
    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<(), StoreError>;
}

const EMAIL_INDEX: &str = "Email_Index";
const EMAIL_GUARD_PREFIX: &str = "email#";

/// DynamoDB-backed store. Single table keyed on `userId` with an
/// `Email_Index` GSI on `email`. Email uniqueness is enforced with a
/// guard item (`userId = "email#<addr>"`) written in the same
/// transaction as the user item; guard items carry no `email` attribute
/// and are therefore invisible to the index.
#[derive(Clone)]
pub struct DynamoStore {
    client: Client,
    table: String,
}

impl DynamoStore {
    pub fn new(client: Client, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }
}

fn format_ts(ts: OffsetDateTime) -> Result<String, StoreError> {
    ts.format(&Rfc3339)
        .map_err(|e| StoreError::Unavailable(e.to_string()))
}

fn to_item(record: &UserRecord) -> Result<HashMap<String, AttributeValue>, StoreError> {
    let mut item = HashMap::from([
        (
            "userId".to_string(),
            AttributeValue::S(record.user_id.to_string()),
        ),
        ("email".to_string(), AttributeValue::S(record.email.clone())),
        (
            "passwordHash".to_string(),
            AttributeValue::S(record.password_hash.clone()),
        ),
        (
            "createdAt".to_string(),
            AttributeValue::S(format_ts(record.created_at)?),
        ),
        (
            "updatedAt".to_string(),
            AttributeValue::S(format_ts(record.updated_at)?),
        ),
    ]);
    if let Some(first) = &record.first_name {
        item.insert("firstName".to_string(), AttributeValue::S(first.clone()));
    }
    if let Some(last) = &record.last_name {
        item.insert("lastName".to_string(), AttributeValue::S(last.clone()));
    }
    Ok(item)
}

fn get_s(item: &HashMap<String, AttributeValue>, name: &str) -> Result<String, StoreError> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| StoreError::Unavailable(format!("missing attribute {name}")))
}

fn get_opt_s(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name).and_then(|v| v.as_s().ok()).cloned()
}

fn from_item(item: &HashMap<String, AttributeValue>) -> Result<UserRecord, StoreError> {
    let parse_ts = |name: &str| -> Result<OffsetDateTime, StoreError> {
        OffsetDateTime::parse(&get_s(item, name)?, &Rfc3339)
            .map_err(|e| StoreError::Unavailable(format!("bad {name}: {e}")))
    };
    Ok(UserRecord {
        user_id: get_s(item, "userId")?
            .parse()
            .map_err(|e| StoreError::Unavailable(format!("bad userId: {e}")))?,
        email: get_s(item, "email")?,
        password_hash: get_s(item, "passwordHash")?,
        first_name: get_opt_s(item, "firstName"),
        last_name: get_opt_s(item, "lastName"),
        created_at: parse_ts("createdAt")?,
        updated_at: parse_ts("updatedAt")?,
    })
}

#[async_trait]
impl UserStore for DynamoStore {
    async fn create_if_absent(&self, record: &UserRecord) -> Result<(), StoreError> {
        let put_user = Put::builder()
            .table_name(&self.table)
            .set_item(Some(to_item(record)?))
            .condition_expression("attribute_not_exists(userId)")
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let guard = HashMap::from([
            (
                "userId".to_string(),
                AttributeValue::S(format!("{EMAIL_GUARD_PREFIX}{}", record.email)),
            ),
            (
                "ownerId".to_string(),
                AttributeValue::S(record.user_id.to_string()),
            ),
        ]);
        let put_guard = Put::builder()
            .table_name(&self.table)
            .set_item(Some(guard))
            .condition_expression("attribute_not_exists(userId)")
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let result = self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().put(put_user).build())
            .transact_items(TransactWriteItem::builder().put(put_guard).build())
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_transaction_canceled_exception() {
                    Err(StoreError::Conflict)
                } else {
                    Err(StoreError::Unavailable(service_err.to_string()))
                }
            }
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let output = self
            .client
            .query()
            .table_name(&self.table)
            .index_name(EMAIL_INDEX)
            .key_condition_expression("email = :email")
            .expression_attribute_values(":email", AttributeValue::S(email.to_string()))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.into_service_error().to_string()))?;

        output.items().first().map(from_item).transpose()
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("userId", AttributeValue::S(id.to_string()))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.into_service_error().to_string()))?;

        output.item().map(from_item).transpose()
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<(), StoreError> {
        let mut sets = vec!["updatedAt = :updatedAt".to_string()];
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("userId", AttributeValue::S(id.to_string()))
            .condition_expression("attribute_exists(userId)")
            .expression_attribute_values(
                ":updatedAt",
                AttributeValue::S(format_ts(OffsetDateTime::now_utc())?),
            );
        if let Some(first) = changes.first_name {
            sets.push("firstName = :firstName".to_string());
            request = request.expression_attribute_values(":firstName", AttributeValue::S(first));
        }
        if let Some(last) = changes.last_name {
            sets.push("lastName = :lastName".to_string());
            request = request.expression_attribute_values(":lastName", AttributeValue::S(last));
        }

        request
            .update_expression(format!("SET {}", sets.join(", ")))
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_conditional_check_failed_exception() {
                    StoreError::Unavailable(format!("record {id} not found"))
                } else {
                    StoreError::Unavailable(service_err.to_string())
                }
            })?;
        Ok(())
    }
}

/// In-memory store for tests and local runs. Id and email uniqueness are
/// checked under a single lock, matching the transactional guarantee of
/// the DynamoDB implementation.
#[derive(Default)]
pub struct MemoryStore {
    records: std::sync::Mutex<HashMap<Uuid, UserRecord>>,
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_if_absent(&self, record: &UserRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("store lock");
        if records.contains_key(&record.user_id)
            || records.values().any(|r| r.email == record.email)
        {
            return Err(StoreError::Conflict);
        }
        records.insert(record.user_id, record.clone());
        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let records = self.records.lock().expect("store lock");
        Ok(records.values().find(|r| r.email == email).cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let records = self.records.lock().expect("store lock");
        Ok(records.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("store lock");
        let record = records
            .get_mut(&id)
            .ok_or_else(|| StoreError::Unavailable(format!("record {id} not found")))?;
        if let Some(first) = changes.first_name {
            record.first_name = Some(first);
        }
        if let Some(last) = changes.last_name {
            record.last_name = Some(last);
        }
        record.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}
