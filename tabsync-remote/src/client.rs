//! Raw client for the gist-style document API.
//!
//! Thin, token-per-call HTTP layer. Wire shapes here are bit-exact with the
//! hosted API; everything engine-facing lives in [`crate::store`].

use crate::error::{StoreError, StoreResult};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Documents fetched per page when listing.
const PAGE_SIZE: usize = 100;

/// Who the credential belongs to.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteIdentity {
    pub login: String,
}

/// One document as returned by the API.
///
/// List responses omit `history` and inline no file content; single-document
/// responses carry both.
#[derive(Debug, Clone, Deserialize)]
pub struct GistDocument {
    pub id: String,
    pub description: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, GistFile>,
    #[serde(default)]
    pub history: Vec<GistRevision>,
}

impl GistDocument {
    /// The current revision fingerprint (newest history entry).
    #[must_use]
    pub fn revision_head(&self) -> Option<&str> {
        self.history.first().map(|r| r.version.as_str())
    }
}

/// One named file inside a document.
#[derive(Debug, Clone, Deserialize)]
pub struct GistFile {
    pub content: Option<String>,
    pub raw_url: Option<String>,
    #[serde(default)]
    pub truncated: bool,
    pub size: Option<u64>,
}

/// One entry of a document's revision history.
#[derive(Debug, Clone, Deserialize)]
pub struct GistRevision {
    pub version: String,
}

#[derive(Debug, Serialize)]
struct FilePatch<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    description: &'a str,
    public: bool,
    files: BTreeMap<&'a str, FilePatch<'a>>,
}

#[derive(Debug, Serialize)]
struct UpdateBody<'a> {
    files: BTreeMap<&'a str, FilePatch<'a>>,
}

/// Raw gist API client.
pub struct GistApi {
    client: Client,
    base_url: String,
}

impl GistApi {
    /// Creates a client against the given API base URL
    /// (e.g. `https://api.github.com`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("tabsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Checks that the token is usable at all.
    pub async fn validate_credential(&self, token: &str) -> StoreResult<RemoteIdentity> {
        let response = self
            .client
            .get(format!("{}/user", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StoreError::Network(format!("credential check failed: {e}")))?;

        let response = ensure_success(response, "user").await?;
        parse_json(response).await
    }

    /// Lists the caller's documents, following pagination to the end.
    pub async fn list_documents(&self, token: &str) -> StoreResult<Vec<GistDocument>> {
        let mut all = Vec::new();
        let mut page = 1usize;

        loop {
            let response = self
                .client
                .get(format!("{}/gists", self.base_url))
                .bearer_auth(token)
                .query(&[
                    ("per_page", PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await
                .map_err(|e| StoreError::Network(format!("document list failed: {e}")))?;

            let response = ensure_success(response, "gists").await?;
            let batch: Vec<GistDocument> = parse_json(response).await?;
            let batch_len = batch.len();
            all.extend(batch);

            if batch_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        debug!(count = all.len(), "listed remote documents");
        Ok(all)
    }

    /// Fetches one document with content and history.
    pub async fn get_document(&self, token: &str, id: &str) -> StoreResult<GistDocument> {
        let response = self
            .client
            .get(format!("{}/gists/{id}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StoreError::Network(format!("document fetch failed: {e}")))?;

        let response = ensure_success(response, id).await?;
        parse_json(response).await
    }

    /// Creates a private document.
    pub async fn create_document(
        &self,
        token: &str,
        description: &str,
        files: &BTreeMap<String, String>,
    ) -> StoreResult<GistDocument> {
        let body = CreateBody {
            description,
            public: false,
            files: patch_map(files),
        };

        let response = self
            .client
            .post(format!("{}/gists", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Network(format!("document create failed: {e}")))?;

        let response = ensure_success(response, "gists").await?;
        parse_json(response).await
    }

    /// Patches the named files of a document. Files not named are untouched.
    pub async fn update_document(
        &self,
        token: &str,
        id: &str,
        files: &BTreeMap<String, String>,
    ) -> StoreResult<GistDocument> {
        let body = UpdateBody {
            files: patch_map(files),
        };

        let response = self
            .client
            .patch(format!("{}/gists/{id}", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Network(format!("document update failed: {e}")))?;

        let response = ensure_success(response, id).await?;
        parse_json(response).await
    }

    /// Fetches a file body the API declined to inline (truncated).
    pub async fn fetch_raw(&self, token: &str, raw_url: &str) -> StoreResult<String> {
        let response = self
            .client
            .get(raw_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StoreError::Network(format!("raw fetch failed: {e}")))?;

        let response = ensure_success(response, raw_url).await?;
        response
            .text()
            .await
            .map_err(|e| StoreError::Network(format!("raw fetch body failed: {e}")))
    }
}

fn patch_map(files: &BTreeMap<String, String>) -> BTreeMap<&str, FilePatch<'_>> {
    files
        .iter()
        .map(|(name, content)| (name.as_str(), FilePatch { content }))
        .collect()
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> StoreResult<T> {
    response
        .json()
        .await
        .map_err(|e| StoreError::Parse(e.to_string()))
}

/// Maps non-success statuses onto the store error taxonomy.
async fn ensure_success(response: Response, context: &str) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED => Err(StoreError::TokenInvalid),
        StatusCode::FORBIDDEN => {
            let remaining = header_str(&response, "x-ratelimit-remaining");
            if remaining.as_deref() == Some("0") {
                let retry_after_secs =
                    header_str(&response, "retry-after").and_then(|v| v.parse().ok());
                Err(StoreError::RateLimited { retry_after_secs })
            } else {
                Err(StoreError::TokenInvalid)
            }
        }
        StatusCode::NOT_FOUND => Err(StoreError::NotFound(context.to_string())),
        _ => {
            let message = response.text().await.unwrap_or_default();
            Err(StoreError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

fn header_str(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}
