use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Identifier the remote store assigns to a participant record.
///
/// Kept opaque: participant tables keyed by serial integers and by uuids
/// both exist, so the wire value is carried as text either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ParticipantId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Self(n.to_string()),
            Raw::Text(s) => Self(s),
        })
    }
}

/// Errors from the remote store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The request never produced an HTTP response.
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The store answered with a non-success status.
    #[error("{endpoint} returned {status}: {message}")]
    Remote {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// The response body was not what the protocol promises.
    #[error("unexpected response from {endpoint}: {detail}")]
    Decode { endpoint: String, detail: String },
}

/// Remote persistence operations a submission needs.
///
/// `RestStore` implements this against the real service; tests substitute
/// their own implementation to script failures.
#[async_trait::async_trait]
pub trait PersistenceClient: Send + Sync {
    /// Create the participant record clips will hang off. The record starts
    /// with `upload_completed = false`.
    async fn create_participant(
        &self,
        age: u16,
        created_at: DateTime<Utc>,
    ) -> Result<ParticipantId, StoreError>;

    /// Store one clip payload at `path` inside the clip bucket.
    async fn upload_clip(
        &self,
        path: &str,
        payload: Vec<u8>,
        content_type: &str,
        overwrite: bool,
    ) -> Result<(), StoreError>;

    /// Flip the participant record's `upload_completed` flag to true.
    async fn mark_uploads_complete(&self, id: &ParticipantId) -> Result<(), StoreError>;
}
