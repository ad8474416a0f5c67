//! Document store abstraction over the gist API.
//!
//! The engine talks to [`DocumentStore`] only. [`GistStore`] is the real
//! transport; [`mock::MemoryStore`] backs tests.

use crate::client::{GistApi, RemoteIdentity};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tabsync_types::{DocumentId, Revision, SecretString};
use tokio::sync::RwLock;
use tracing::debug;

/// Configuration for the hosted document store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// API base URL. Overridable for tests.
    pub base_url: String,
    /// Description stamped on the sync document; also how we find it again.
    pub description: String,
    /// Name of the primary file inside the document.
    pub filename: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            description: "TabSync encrypted snapshot (do not edit)".to_string(),
            filename: "tabsync.sync.json".to_string(),
        }
    }
}

/// Identity and revision of a newly created document.
#[derive(Debug, Clone)]
pub struct DocumentRef {
    pub id: DocumentId,
    pub revision: Revision,
}

/// A document read back from the store.
#[derive(Debug, Clone)]
pub struct RemoteDocument {
    pub id: DocumentId,
    pub revision: Revision,
    /// Primary file body. `None` when the document exists but the file
    /// was removed out from under us.
    pub content: Option<String>,
}

/// Abstract store holding one encrypted sync document per account.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Installs (or clears) the credential used by subsequent calls.
    async fn set_token(&self, token: Option<SecretString>);

    /// Checks the credential against the live API.
    async fn validate_credential(&self) -> StoreResult<RemoteIdentity>;

    /// Looks for an existing sync document owned by this account.
    async fn find_document(&self) -> StoreResult<Option<DocumentId>>;

    /// Reads the document's revision and primary file content.
    async fn read_document(&self, id: &DocumentId) -> StoreResult<RemoteDocument>;

    /// Creates a fresh private document holding the primary file.
    async fn create_document(&self, content: &str) -> StoreResult<DocumentRef>;

    /// Writes the named files into the document, returning the new revision.
    async fn update_document(
        &self,
        id: &DocumentId,
        files: &BTreeMap<String, String>,
    ) -> StoreResult<Revision>;
}

/// Gist-backed document store.
pub struct GistStore {
    api: GistApi,
    config: StoreConfig,
    token: RwLock<Option<SecretString>>,
}

impl GistStore {
    pub fn new(config: StoreConfig) -> Self {
        let api = GistApi::new(config.base_url.clone());
        Self {
            api,
            config,
            token: RwLock::new(None),
        }
    }

    async fn token(&self) -> StoreResult<SecretString> {
        self.token.read().await.clone().ok_or(StoreError::NoToken)
    }

    fn revision_of(&self, doc: &crate::client::GistDocument) -> StoreResult<Revision> {
        doc.revision_head()
            .map(Revision::from)
            .ok_or_else(|| StoreError::Parse("document response carries no history".to_string()))
    }
}

#[async_trait]
impl DocumentStore for GistStore {
    async fn set_token(&self, token: Option<SecretString>) {
        *self.token.write().await = token;
    }

    async fn validate_credential(&self) -> StoreResult<RemoteIdentity> {
        let token = self.token().await?;
        self.api.validate_credential(token.expose()).await
    }

    async fn find_document(&self) -> StoreResult<Option<DocumentId>> {
        let token = self.token().await?;
        let documents = self.api.list_documents(token.expose()).await?;

        let found = documents.into_iter().find(|doc| {
            doc.description.as_deref() == Some(self.config.description.as_str())
                && doc.files.contains_key(&self.config.filename)
        });

        match found {
            Some(doc) => {
                debug!(id = %doc.id, "found existing sync document");
                Ok(Some(DocumentId::from(doc.id)))
            }
            None => Ok(None),
        }
    }

    async fn read_document(&self, id: &DocumentId) -> StoreResult<RemoteDocument> {
        let token = self.token().await?;
        let doc = self.api.get_document(token.expose(), id.as_str()).await?;
        let revision = self.revision_of(&doc)?;

        let content = match doc.files.get(&self.config.filename) {
            None => None,
            Some(file) if file.truncated => {
                let raw_url = file.raw_url.as_deref().ok_or_else(|| {
                    StoreError::Parse("truncated file carries no raw url".to_string())
                })?;
                Some(self.api.fetch_raw(token.expose(), raw_url).await?)
            }
            Some(file) => file.content.clone(),
        };

        Ok(RemoteDocument {
            id: id.clone(),
            revision,
            content,
        })
    }

    async fn create_document(&self, content: &str) -> StoreResult<DocumentRef> {
        let token = self.token().await?;
        let files = BTreeMap::from([(self.config.filename.clone(), content.to_string())]);
        let doc = self
            .api
            .create_document(token.expose(), &self.config.description, &files)
            .await?;
        let revision = self.revision_of(&doc)?;

        debug!(id = %doc.id, "created sync document");
        Ok(DocumentRef {
            id: DocumentId::from(doc.id),
            revision,
        })
    }

    async fn update_document(
        &self,
        id: &DocumentId,
        files: &BTreeMap<String, String>,
    ) -> StoreResult<Revision> {
        let token = self.token().await?;
        let doc = self
            .api
            .update_document(token.expose(), id.as_str(), files)
            .await?;
        self.revision_of(&doc)
    }
}

pub mod mock {
    //! In-memory document store for engine tests.

    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct MockDocument {
        pub description: String,
        pub files: BTreeMap<String, String>,
        pub revision: Revision,
    }

    #[derive(Default)]
    struct MemoryState {
        token: Option<SecretString>,
        valid_token: Option<String>,
        documents: BTreeMap<String, MockDocument>,
        revision_counter: u64,
        offline: bool,
        write_latency: Option<Duration>,
        write_count: u64,
    }

    /// Fake store with knobs for failure injection.
    pub struct MemoryStore {
        config: StoreConfig,
        state: Mutex<MemoryState>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::with_config(StoreConfig::default())
        }

        pub fn with_config(config: StoreConfig) -> Self {
            Self {
                config,
                state: Mutex::new(MemoryState::default()),
            }
        }

        /// Declares which token the fake API accepts.
        pub async fn set_valid_token(&self, token: impl Into<String>) {
            self.state.lock().await.valid_token = Some(token.into());
        }

        /// Simulates a network partition.
        pub async fn set_offline(&self, offline: bool) {
            self.state.lock().await.offline = offline;
        }

        /// Holds writes open for the given duration before committing.
        pub async fn set_write_latency(&self, latency: Duration) {
            self.state.lock().await.write_latency = Some(latency);
        }

        /// Seeds a document directly, as another device would have created it.
        pub async fn insert_document(
            &self,
            files: BTreeMap<String, String>,
        ) -> DocumentRef {
            let mut state = self.state.lock().await;
            state.revision_counter += 1;
            let id = format!("doc-{}", state.documents.len() + 1);
            let revision = Revision::new(format!("r{}", state.revision_counter));
            state.documents.insert(
                id.clone(),
                MockDocument {
                    description: self.config.description.clone(),
                    files,
                    revision: revision.clone(),
                },
            );
            DocumentRef {
                id: DocumentId::from(id),
                revision,
            }
        }

        /// Reads a document back for assertions.
        pub async fn document(&self, id: &DocumentId) -> Option<MockDocument> {
            self.state.lock().await.documents.get(id.as_str()).cloned()
        }

        /// Deletes a file out from under the engine, bumping the revision.
        pub async fn remove_file(&self, id: &DocumentId, name: &str) {
            let mut state = self.state.lock().await;
            state.revision_counter += 1;
            let revision = Revision::new(format!("r{}", state.revision_counter));
            if let Some(doc) = state.documents.get_mut(id.as_str()) {
                doc.files.remove(name);
                doc.revision = revision;
            }
        }

        /// How many update/create calls have landed.
        pub async fn write_count(&self) -> u64 {
            self.state.lock().await.write_count
        }

        async fn check_online(&self) -> StoreResult<()> {
            if self.state.lock().await.offline {
                return Err(StoreError::Network("offline".to_string()));
            }
            Ok(())
        }

        async fn check_token(&self) -> StoreResult<()> {
            let state = self.state.lock().await;
            let token = state.token.as_ref().ok_or(StoreError::NoToken)?;
            match &state.valid_token {
                Some(valid) if valid == token.expose() => Ok(()),
                _ => Err(StoreError::TokenInvalid),
            }
        }

        async fn write_delay(&self) {
            let latency = self.state.lock().await.write_latency;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
        }
    }

    impl Default for MemoryStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl DocumentStore for MemoryStore {
        async fn set_token(&self, token: Option<SecretString>) {
            self.state.lock().await.token = token;
        }

        async fn validate_credential(&self) -> StoreResult<RemoteIdentity> {
            self.check_online().await?;
            self.check_token().await?;
            Ok(RemoteIdentity {
                login: "mock-user".to_string(),
            })
        }

        async fn find_document(&self) -> StoreResult<Option<DocumentId>> {
            self.check_online().await?;
            self.check_token().await?;
            let state = self.state.lock().await;
            let found = state.documents.iter().find(|(_, doc)| {
                doc.description == self.config.description
                    && doc.files.contains_key(&self.config.filename)
            });
            Ok(found.map(|(id, _)| DocumentId::from(id.as_str())))
        }

        async fn read_document(&self, id: &DocumentId) -> StoreResult<RemoteDocument> {
            self.check_online().await?;
            self.check_token().await?;
            let state = self.state.lock().await;
            let doc = state
                .documents
                .get(id.as_str())
                .ok_or_else(|| StoreError::NotFound(id.as_str().to_string()))?;
            Ok(RemoteDocument {
                id: id.clone(),
                revision: doc.revision.clone(),
                content: doc.files.get(&self.config.filename).cloned(),
            })
        }

        async fn create_document(&self, content: &str) -> StoreResult<DocumentRef> {
            self.check_online().await?;
            self.check_token().await?;
            self.write_delay().await;
            let files = BTreeMap::from([(self.config.filename.clone(), content.to_string())]);
            let doc_ref = self.insert_document(files).await;
            self.state.lock().await.write_count += 1;
            Ok(doc_ref)
        }

        async fn update_document(
            &self,
            id: &DocumentId,
            files: &BTreeMap<String, String>,
        ) -> StoreResult<Revision> {
            self.check_online().await?;
            self.check_token().await?;
            self.write_delay().await;
            let mut state = self.state.lock().await;
            state.revision_counter += 1;
            let revision = Revision::new(format!("r{}", state.revision_counter));
            let doc = state
                .documents
                .get_mut(id.as_str())
                .ok_or_else(|| StoreError::NotFound(id.as_str().to_string()))?;
            for (name, content) in files {
                doc.files.insert(name.clone(), content.clone());
            }
            doc.revision = revision.clone();
            state.write_count += 1;
            Ok(revision)
        }
    }
}
