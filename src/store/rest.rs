use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::client::{ParticipantId, PersistenceClient, StoreError};
use crate::config::StoreConfig;

/// REST client for the participant table and the clip bucket.
///
/// Speaks the PostgREST + storage dialect: participant rows go through
/// `rest/v1/participants`, clip objects through
/// `storage/v1/object/{bucket}/{path}`, both authenticated with the same
/// service key.
pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: String,
}

#[derive(Serialize)]
struct NewParticipant {
    age: u16,
    created_at: String,
    upload_completed: bool,
}

#[derive(Deserialize)]
struct ParticipantRow {
    id: ParticipantId,
}

impl RestStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| StoreError::Transport {
                endpoint: config.base_url.clone(),
                source,
            })?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            bucket: config.bucket.clone(),
        })
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

#[async_trait::async_trait]
impl PersistenceClient for RestStore {
    async fn create_participant(
        &self,
        age: u16,
        created_at: DateTime<Utc>,
    ) -> Result<ParticipantId, StoreError> {
        let endpoint = format!("{}/rest/v1/participants", self.base_url);
        let rows = [NewParticipant {
            age,
            created_at: created_at.to_rfc3339(),
            upload_completed: false,
        }];

        let response = self
            .authed(self.http.post(&endpoint))
            .header("Prefer", "return=representation")
            .json(&rows)
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        let response = check_status(response, &endpoint).await?;

        let mut rows: Vec<ParticipantRow> =
            response.json().await.map_err(|e| StoreError::Decode {
                endpoint: endpoint.clone(),
                detail: e.to_string(),
            })?;
        let row = rows.pop().ok_or_else(|| StoreError::Decode {
            endpoint: endpoint.clone(),
            detail: "empty representation for inserted row".to_string(),
        })?;

        info!("Created participant record {}", row.id);
        Ok(row.id)
    }

    async fn upload_clip(
        &self,
        path: &str,
        payload: Vec<u8>,
        content_type: &str,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let endpoint = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, path
        );
        let size = payload.len();

        let response = self
            .authed(self.http.post(&endpoint))
            .header(CONTENT_TYPE, content_type)
            .header(CACHE_CONTROL, "max-age=3600")
            .header("x-upsert", if overwrite { "true" } else { "false" })
            .body(payload)
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        check_status(response, &endpoint).await?;

        debug!("Uploaded {} ({} bytes)", path, size);
        Ok(())
    }

    async fn mark_uploads_complete(&self, id: &ParticipantId) -> Result<(), StoreError> {
        let endpoint = format!("{}/rest/v1/participants?id=eq.{}", self.base_url, id);

        let response = self
            .authed(self.http.patch(&endpoint))
            .json(&serde_json::json!({ "upload_completed": true }))
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        check_status(response, &endpoint).await?;

        info!("Marked participant {} upload-complete", id);
        Ok(())
    }
}

async fn check_status(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(StoreError::Remote {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        // Error bodies can be arbitrarily large; keep logs readable.
        message: message.chars().take(200).collect(),
    })
}
